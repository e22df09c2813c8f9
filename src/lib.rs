pub mod agent_log;
pub mod agent_loop;
pub mod agents;
pub mod decision;
pub mod error;
pub mod events;
pub mod images;
pub mod logging;
pub mod message;
pub mod narrator;
pub mod openai;
pub mod pipeline;
pub mod prestep;
pub mod provider;
pub mod session;
pub mod settings;
pub mod stakes;
pub mod tool_calls;
pub mod tools;
pub mod translator;
pub mod world;

#[cfg(test)]
mod test_support;

// Re-export commonly used items for easier access
pub use agent_log::{AgentKind, AgentLogEntry, AgentLogStatus, AgentLogger, LogStore};
pub use decision::{Decision, DecisionEngine, PreStep, Twist};
pub use error::{AppError, PipelineError, ProviderError, TurnFailure};
pub use events::{ModelEvent, UiEvent};
pub use message::{ChatMessage, MessagePart, Role};
pub use pipeline::{ProgressEvent, TurnPipeline, TurnRequest, TurnState, TurnSummary};
pub use prestep::{AgentRunResult, PreStepExecutor};
pub use provider::{LanguageModel, Usage};
pub use settings::Settings;
pub use stakes::{RollResult, StakesSpec, twist_of_fate};
pub use translator::{EventSink, StreamTranslator};
