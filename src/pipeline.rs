//! Turn coordinator.
//!
//! ```text
//! Init -> DecisionPending -> PreStepsRunning(0..N) -> NarratorStreaming -> SessionRecording -> Done
//!   \____________________________ Failed ____________________________/
//! ```
//!
//! One coordinator call per turn. Callers serialize turns of the same
//! conversation; nothing here locks.

use crate::agent_log::{AgentKind, AgentLogger};
use crate::decision::{Decision, DecisionEngine, DecisionSource, PreStep};
use crate::error::{PipelineError, TurnFailure};
use crate::events::UiEvent;
use crate::message::{ChatMessage, last_user_index};
use crate::narrator::{Narrator, NarratorInput};
use crate::prestep::{AgentRunResult, PreStepExecutor, PreStepInput, PreStepStatus};
use crate::provider::Usage;
use crate::session::{SessionRecorder, TurnTranscript};
use crate::translator::{DEFAULT_SUPPRESSED_INPUT_TOOLS, EventSink, StreamTranslator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

pub const GENERIC_FAILURE: &str = "Something went wrong while preparing this turn. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Init,
    DecisionPending,
    PreStepsRunning { index: usize, total: usize },
    NarratorStreaming,
    SessionRecording,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Completed,
    Failed,
    Refused,
}

impl From<PreStepStatus> for ProgressStatus {
    fn from(status: PreStepStatus) -> Self {
        match status {
            PreStepStatus::Completed => ProgressStatus::Completed,
            PreStepStatus::Refused => ProgressStatus::Refused,
            PreStepStatus::Failed => ProgressStatus::Failed,
        }
    }
}

/// Caller-visible feedback, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub agent: AgentKind,
    pub status: ProgressStatus,
    pub metadata: Value,
}

impl ProgressEvent {
    pub fn new(agent: AgentKind, status: ProgressStatus, metadata: Value) -> Self {
        Self {
            agent,
            status,
            metadata,
        }
    }

    pub fn into_ui_event(self) -> UiEvent {
        UiEvent::data(
            "agent-progress",
            serde_json::to_value(&self).unwrap_or(Value::Null),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub game_id: String,
    pub conversation_id: Option<String>,
    pub game_system: String,
    /// Full conversation, ending with the player's new message.
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub state: TurnState,
    pub decision: Decision,
    pub decision_source: DecisionSource,
    pub pre_steps: Vec<AgentRunResult>,
    pub digest: String,
    pub narration: String,
    pub finish_reason: Option<String>,
    pub narration_error: Option<String>,
    pub session_recorded: bool,
    pub usage: Usage,
}

pub struct TurnPipeline {
    decision: DecisionEngine,
    pre_steps: PreStepExecutor,
    narrator: Narrator,
    recorder: Option<SessionRecorder>,
    logger: AgentLogger,
    suppressed_input_tools: Vec<String>,
    debug_mode: bool,
}

fn step_kind(step: &PreStep) -> AgentKind {
    match step {
        PreStep::WorldAdvance { .. } => AgentKind::WorldAdvance,
        PreStep::FactionTurn { .. } => AgentKind::FactionTurn,
    }
}

/// Game system followed by what earlier steps of this turn reported.
fn shared_context(game_system: &str, digest: &str) -> String {
    if digest.trim().is_empty() {
        return game_system.to_string();
    }
    format!("{game_system}\n\n# Earlier this turn\n\n{}", digest.trim_end())
}

fn advance(state: &mut TurnState, next: TurnState) {
    log::debug!("Turn state {state:?} -> {next:?}");
    *state = next;
}

fn append_digest(digest: &mut String, step: &PreStep, summary: &str) {
    digest.push_str(&format!("### {step}\n{}\n\n", summary.trim()));
}

/// Writes after narration has started are best-effort.
async fn emit_late(sink: &mut dyn EventSink, event: UiEvent) {
    if let Err(e) = sink.send(event).await {
        log::warn!("Dropping late event for the client: {e}");
    }
}

impl TurnPipeline {
    pub fn new(
        decision: DecisionEngine,
        pre_steps: PreStepExecutor,
        narrator: Narrator,
        logger: AgentLogger,
    ) -> Self {
        Self {
            decision,
            pre_steps,
            narrator,
            recorder: None,
            logger,
            suppressed_input_tools: DEFAULT_SUPPRESSED_INPUT_TOOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debug_mode: false,
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_suppressed_input_tools(mut self, tools: Vec<String>) -> Self {
        self.suppressed_input_tools = tools;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn logger(&self) -> &AgentLogger {
        &self.logger
    }

    /// Run one turn, writing progress, narration and the final metadata to
    /// `sink`. A coordinator fault still ends the client stream with an
    /// `error` event before it is returned, tagged with the stage it hit.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: &mut dyn EventSink,
    ) -> Result<TurnSummary, TurnFailure> {
        let mut state = TurnState::Init;
        let outcome = self.drive(&request, sink, &mut state).await;
        match outcome {
            Ok(summary) => {
                log::info!(
                    "Turn done for game {}: {} pre-steps, {} tokens",
                    request.game_id,
                    summary.pre_steps.len(),
                    summary.usage.total_tokens
                );
                Ok(summary)
            }
            Err(error) => {
                let stage = state;
                advance(&mut state, TurnState::Failed);
                log::error!(
                    "Turn failed for game {} during {stage:?}: {error}",
                    request.game_id
                );
                let text = if self.debug_mode {
                    error.to_string()
                } else {
                    GENERIC_FAILURE.to_string()
                };
                emit_late(sink, UiEvent::error(text)).await;
                Err(TurnFailure {
                    state: stage,
                    error,
                })
            }
        }
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        sink: &mut dyn EventSink,
        state: &mut TurnState,
    ) -> Result<TurnSummary, PipelineError> {
        advance(state, TurnState::Init);
        let player_index =
            last_user_index(&request.messages).ok_or(PipelineError::NoPlayerMessage)?;
        let player_message = request.messages[player_index].text();
        let conversation_id = request.conversation_id.as_deref();
        let mut usage = Usage::default();

        // Decision
        advance(state, TurnState::DecisionPending);
        sink.send(
            ProgressEvent::new(AgentKind::Orchestrator, ProgressStatus::Started, json!({}))
                .into_ui_event(),
        )
        .await?;
        let log_id = self
            .logger
            .start(conversation_id, AgentKind::Orchestrator, None)
            .await;
        let outcome = self
            .decision
            .decide(&request.game_system, &request.messages)
            .await;
        usage += outcome.usage;
        let decision_status = if outcome.source == DecisionSource::Default {
            self.logger.fail(log_id, outcome.decision.reasoning.clone());
            ProgressStatus::Failed
        } else {
            self.logger
                .complete(log_id, serde_json::to_value(&outcome.decision).ok());
            ProgressStatus::Completed
        };
        sink.send(
            ProgressEvent::new(
                AgentKind::Orchestrator,
                decision_status,
                json!({
                    "preSteps": outcome.decision.pre_steps.len(),
                    "suggestedTwists": outcome.decision.suggested_twists.len(),
                    "source": outcome.source,
                }),
            )
            .into_ui_event(),
        )
        .await?;
        let decision = outcome.decision;

        // Pre-steps, strictly in order
        let total = decision.pre_steps.len();
        let mut digest = String::new();
        let mut results = Vec::with_capacity(total);
        for (index, step) in decision.pre_steps.iter().enumerate() {
            advance(state, TurnState::PreStepsRunning { index, total });
            let kind = step_kind(step);
            sink.send(
                ProgressEvent::new(
                    kind,
                    ProgressStatus::Started,
                    json!({ "index": index, "total": total, "step": step }),
                )
                .into_ui_event(),
            )
            .await?;

            let context = shared_context(&request.game_system, &digest);
            let result = self
                .pre_steps
                .execute(PreStepInput {
                    step,
                    shared_context: &context,
                    conversation_id,
                    game_id: &request.game_id,
                })
                .await;
            usage += result.usage;
            append_digest(&mut digest, step, &result.summary);

            sink.send(
                ProgressEvent::new(
                    kind,
                    result.status.into(),
                    json!({
                        "index": index,
                        "total": total,
                        "toolCalls": result.tool_calls.len(),
                    }),
                )
                .into_ui_event(),
            )
            .await?;
            results.push(result);
        }

        // Narration, streamed live
        advance(state, TurnState::NarratorStreaming);
        let events = self
            .narrator
            .stream(NarratorInput {
                game_system: &request.game_system,
                messages: &request.messages,
                digest: &digest,
                twists: &decision.suggested_twists,
                conversation_id,
                game_id: &request.game_id,
            })
            .await;
        let report = StreamTranslator::new(self.suppressed_input_tools.iter().cloned())
            .with_message_id(format!("msg_{}", Uuid::new_v4().simple()))
            .pipe(events, sink)
            .await;
        usage += report.usage;

        // Journal
        let mut session_recorded = false;
        if let Some(recorder) = &self.recorder {
            if report.error.is_none() {
                advance(state, TurnState::SessionRecording);
                emit_late(
                    sink,
                    ProgressEvent::new(AgentKind::SessionRecorder, ProgressStatus::Started, json!({}))
                        .into_ui_event(),
                )
                .await;
                let recorded = recorder
                    .record(TurnTranscript {
                        game_id: &request.game_id,
                        conversation_id,
                        game_system: &request.game_system,
                        player_message: &player_message,
                        digest: &digest,
                        narration: &report.text,
                    })
                    .await;
                match recorded {
                    Ok(recorder_usage) => {
                        usage += recorder_usage;
                        session_recorded = true;
                    }
                    Err(e) => log::warn!("Session recording skipped: {e}"),
                }
                emit_late(
                    sink,
                    ProgressEvent::new(
                        AgentKind::SessionRecorder,
                        ProgressStatus::Completed,
                        json!({ "recorded": session_recorded }),
                    )
                    .into_ui_event(),
                )
                .await;
            }
        }

        advance(state, TurnState::Done);
        // A forwarded narrator error stays the last event the client sees.
        if report.error.is_none() {
            emit_late(
                sink,
                UiEvent::MessageMetadata {
                    message_metadata: json!({
                        "usage": usage,
                        "preSteps": decision.pre_steps,
                        "suggestedTwists": decision.suggested_twists,
                        "finishReason": report.finish_reason,
                    }),
                },
            )
            .await;
        }

        Ok(TurnSummary {
            state: *state,
            decision,
            decision_source: outcome.source,
            pre_steps: results,
            digest,
            narration: report.text,
            finish_reason: report.finish_reason,
            narration_error: report.error,
            session_recorded,
            usage,
        })
    }
}
