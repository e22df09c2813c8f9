//! Sub-agents that advance the world off-screen before the narrator speaks.
//!
//! An executor never returns an error. Provider failures and refusals become
//! summaries the coordinator appends to the turn's digest.

use crate::agent_log::{AgentKind, AgentLogger};
use crate::agent_loop::run_agent;
use crate::agents::{
    FACTION_TURN_PREAMBLE, Refusal, WORLD_ADVANCE_PREAMBLE, system_prompt_with_world,
};
use crate::decision::PreStep;
use crate::images::ImageLibrary;
use crate::message::ChatMessage;
use crate::provider::{LanguageModel, Usage};
use crate::tool_calls::{ToolCall, extract_from_steps};
use crate::tools::ToolBox;
use crate::world::WorldStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const PRE_STEP_FAILED_MARKER: &str = "[pre-step failed]";
pub const PRE_STEP_REFUSED_MARKER: &str = "[pre-step refused]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreStepStatus {
    Completed,
    Refused,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunResult {
    pub summary: String,
    pub tool_calls: Vec<ToolCall>,
    pub status: PreStepStatus,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy)]
pub struct PreStepInput<'a> {
    pub step: &'a PreStep,
    /// Game system plus whatever earlier steps of this turn reported.
    pub shared_context: &'a str,
    pub conversation_id: Option<&'a str>,
    pub game_id: &'a str,
}

#[derive(Clone)]
pub struct PreStepExecutor {
    model: Arc<dyn LanguageModel>,
    world: Arc<dyn WorldStore>,
    images: Arc<dyn ImageLibrary>,
    logger: AgentLogger,
    max_rounds: usize,
}

impl PreStepExecutor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        world: Arc<dyn WorldStore>,
        images: Arc<dyn ImageLibrary>,
        logger: AgentLogger,
    ) -> Self {
        Self {
            model,
            world,
            images,
            logger,
            max_rounds: 5,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub async fn execute(&self, input: PreStepInput<'_>) -> AgentRunResult {
        let (kind, preamble, instruction) = match input.step {
            PreStep::WorldAdvance { description } => (
                AgentKind::WorldAdvance,
                WORLD_ADVANCE_PREAMBLE,
                format!("Advance the world: {description}"),
            ),
            PreStep::FactionTurn { faction, situation } => (
                AgentKind::FactionTurn,
                FACTION_TURN_PREAMBLE,
                format!("You are the faction \"{faction}\". Situation: {situation}"),
            ),
        };
        let label = input.step.to_string();
        let log_id = self
            .logger
            .start(input.conversation_id, kind, serde_json::to_value(input.step).ok())
            .await;

        let world = match self.world.read_context(input.game_id) {
            Ok(world) => world,
            Err(e) => {
                log::error!("{label}: could not read world state: {e}");
                self.logger.fail(log_id, e.to_string());
                return failed(&label, Usage::default());
            }
        };

        let system = system_prompt_with_world(preamble, input.shared_context, &world);
        let tools = ToolBox::new()
            .with_world(&self.world, input.game_id)
            .with_images(&self.images, input.game_id);

        let run = match run_agent(
            self.model.as_ref(),
            &system,
            vec![ChatMessage::user(instruction)],
            &tools,
            self.max_rounds,
        )
        .await
        {
            Ok(run) => run,
            Err(e) => {
                log::error!("{label}: sub-agent failed: {e}");
                self.logger.fail(log_id, e.to_string());
                return failed(&label, Usage::default());
            }
        };

        let tool_calls = extract_from_steps(&run.steps);
        if let Some(refusal) = Refusal::detect(&run.text) {
            log::info!("{label}: refused ({})", refusal.reason);
            self.logger.refuse(log_id, run.text.trim());
            return AgentRunResult {
                summary: format!("{PRE_STEP_REFUSED_MARKER} {label}: {}", refusal.reason),
                tool_calls,
                status: PreStepStatus::Refused,
                usage: run.usage,
            };
        }

        let summary = match run.text.trim() {
            "" if tool_calls.is_empty() => format!("{label}: nothing changed."),
            "" => format!("{label}: {} world updates, no summary given.", tool_calls.len()),
            text => text.to_string(),
        };
        if run.exhausted {
            log::warn!("{label}: round budget ran out before the agent finished");
        }
        self.logger.complete(
            log_id,
            Some(json!({
                "summary": summary,
                "toolCalls": tool_calls,
                "exhausted": run.exhausted,
            })),
        );
        log::info!("{label}: completed with {} tool calls", tool_calls.len());
        AgentRunResult {
            summary,
            tool_calls,
            status: PreStepStatus::Completed,
            usage: run.usage,
        }
    }
}

fn failed(label: &str, usage: Usage) -> AgentRunResult {
    AgentRunResult {
        summary: format!("{PRE_STEP_FAILED_MARKER} {label}"),
        tool_calls: Vec::new(),
        status: PreStepStatus::Failed,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_log::{AgentLogStatus, MemoryLogStore};
    use crate::test_support::{NoImages, Reply, ScriptedModel};
    use crate::world::FsWorldStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        world: Arc<dyn WorldStore>,
        logs: Arc<MemoryLogStore>,
        logger: AgentLogger,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let world: Arc<dyn WorldStore> = Arc::new(FsWorldStore::new(dir.path()));
        world.write_file("g", "clock.md", "Day 1, dusk").unwrap();
        let logs = Arc::new(MemoryLogStore::new());
        let logger = AgentLogger::new(logs.clone());
        Fixture {
            _dir: dir,
            world,
            logs,
            logger,
        }
    }

    fn executor(f: &Fixture, replies: Vec<Reply>) -> (Arc<ScriptedModel>, PreStepExecutor) {
        let model = Arc::new(ScriptedModel::new("sub", replies));
        let executor =
            PreStepExecutor::new(model.clone(), f.world.clone(), Arc::new(NoImages), f.logger.clone());
        (model, executor)
    }

    fn advance() -> PreStep {
        PreStep::WorldAdvance {
            description: "Night falls".into(),
        }
    }

    fn input<'a>(step: &'a PreStep) -> PreStepInput<'a> {
        PreStepInput {
            step,
            shared_context: "A harbor town.",
            conversation_id: Some("conv"),
            game_id: "g",
        }
    }

    #[tokio::test]
    async fn world_advance_edits_files_and_summarizes() {
        let f = fixture();
        let (model, executor) = executor(
            &f,
            vec![
                Reply::tool_call(
                    "c1",
                    "edit_world_file",
                    json!({"path": "clock.md", "old_text": "dusk", "new_text": "midnight"}),
                ),
                Reply::text("The clock moved to midnight."),
            ],
        );
        let step = advance();
        let result = executor.execute(input(&step)).await;
        f.logger.drain().await;

        assert_eq!(result.status, PreStepStatus::Completed);
        assert_eq!(result.summary, "The clock moved to midnight.");
        assert_eq!(result.tool_calls[0].tool_name, "edit_world_file");
        assert_eq!(f.world.read_file("g", "clock.md").unwrap(), "Day 1, midnight");

        let system = &model.requests.lock().unwrap()[0].system;
        assert!(system.contains("A harbor town."));
        assert!(system.contains("Day 1, dusk"));

        let entries = f.logs.entries().await;
        assert_eq!(entries[0].agent_type, AgentKind::WorldAdvance);
        assert_eq!(entries[0].status, AgentLogStatus::Completed);
        assert_eq!(entries[0].output.as_ref().unwrap()["exhausted"], false);
    }

    #[tokio::test]
    async fn spent_round_budget_is_recorded() {
        let f = fixture();
        let (_model, executor) = executor(
            &f,
            vec![Reply::tool_call(
                "c1",
                "read_world_file",
                json!({"path": "clock.md"}),
            )],
        );
        let executor = executor.with_max_rounds(1);
        let step = advance();
        let result = executor.execute(input(&step)).await;
        f.logger.drain().await;

        assert_eq!(result.status, PreStepStatus::Completed);
        assert_eq!(result.tool_calls.len(), 1);
        let entry = &f.logs.entries().await[0];
        assert_eq!(entry.output.as_ref().unwrap()["exhausted"], true);
    }

    #[tokio::test]
    async fn refusal_is_logged_distinctly() {
        let f = fixture();
        let (_model, executor) = executor(
            &f,
            vec![Reply::text("REFUSED: the Lamplighters were disbanded last week")],
        );
        let step = PreStep::FactionTurn {
            faction: "Lamplighters".into(),
            situation: "a rival docked".into(),
        };
        let result = executor.execute(input(&step)).await;
        f.logger.drain().await;

        assert_eq!(result.status, PreStepStatus::Refused);
        assert!(result.summary.starts_with(PRE_STEP_REFUSED_MARKER));
        assert!(result.summary.contains("disbanded"));
        assert_eq!(f.logs.entries().await[0].status, AgentLogStatus::Refused);
    }

    #[tokio::test]
    async fn provider_failure_becomes_placeholder() {
        let f = fixture();
        let (_model, executor) = executor(&f, vec![Reply::Fail("503")]);
        let step = advance();
        let result = executor.execute(input(&step)).await;
        f.logger.drain().await;

        assert_eq!(result.status, PreStepStatus::Failed);
        assert_eq!(result.summary, "[pre-step failed] World advance: Night falls");
        let entry = &f.logs.entries().await[0];
        assert_eq!(entry.status, AgentLogStatus::Failed);
        assert!(entry.error.as_deref().is_some_and(|e| e.contains("503")));
    }
}
