//! Internal model stream → client UI message stream.
//!
//! One event in, at most one event out, in the same order. Two things are not
//! a plain rename: `tool-input-delta` is swallowed for tools whose input can be
//! arbitrarily large, and tool calls/results become the client's
//! `tool-input-available` / `tool-output-available` events.

use crate::error::SinkError;
use crate::events::{ModelEvent, UiEvent};
use crate::provider::Usage;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Bulk content writers; their argument deltas would flood the transport.
pub const DEFAULT_SUPPRESSED_INPUT_TOOLS: &[&str] = &["write_world_file"];

#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: UiEvent) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for Vec<UiEvent> {
    async fn send(&mut self, event: UiEvent) -> Result<(), SinkError> {
        self.push(event);
        Ok(())
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<UiEvent> {
    async fn send(&mut self, event: UiEvent) -> Result<(), SinkError> {
        mpsc::UnboundedSender::send(self, event).map_err(|_| SinkError::Closed)
    }
}

/// Writes each event as a server-sent-events `data:` frame.
pub struct SseSink<W> {
    writer: W,
}

impl<W> SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> EventSink for SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, event: UiEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(&event)?;
        self.writer
            .write_all(format!("data: {json}\n\n").as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationReport {
    pub emitted: usize,
    pub suppressed: usize,
    pub dropped: usize,
    /// Concatenated text deltas, i.e. the narration the player saw.
    pub text: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
    pub sink_failed: bool,
}

#[derive(Debug, Default)]
pub struct StreamTranslator {
    suppressed: HashSet<String>,
    tool_names: HashMap<String, String>,
    message_id: Option<String>,
}

impl StreamTranslator {
    pub fn new<I, S>(suppressed_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suppressed: suppressed_tools.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    fn is_suppressed(&self, tool_call_id: &str) -> bool {
        self.tool_names
            .get(tool_call_id)
            .is_some_and(|name| self.suppressed.contains(name))
    }

    pub fn translate(&mut self, event: ModelEvent) -> Option<UiEvent> {
        let translated = match event {
            ModelEvent::Start => UiEvent::Start {
                message_id: self.message_id.clone(),
            },
            ModelEvent::TextStart { id } => UiEvent::TextStart { id },
            ModelEvent::TextDelta { id, delta } => UiEvent::TextDelta { id, delta },
            ModelEvent::TextEnd { id } => UiEvent::TextEnd { id },
            ModelEvent::ReasoningStart { id } => UiEvent::ReasoningStart { id },
            ModelEvent::ReasoningDelta { id, delta } => UiEvent::ReasoningDelta { id, delta },
            ModelEvent::ReasoningEnd { id } => UiEvent::ReasoningEnd { id },
            ModelEvent::ToolInputStart { id, tool_name } => {
                self.tool_names.insert(id.clone(), tool_name.clone());
                UiEvent::ToolInputStart {
                    tool_call_id: id,
                    tool_name,
                }
            }
            ModelEvent::ToolInputDelta { id, delta } => {
                if self.is_suppressed(&id) {
                    return None;
                }
                UiEvent::ToolInputDelta {
                    tool_call_id: id,
                    input_text_delta: delta,
                }
            }
            ModelEvent::ToolInputEnd { id } => UiEvent::ToolInputEnd { tool_call_id: id },
            ModelEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => UiEvent::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            },
            ModelEvent::ToolResult {
                tool_call_id,
                output,
                ..
            } => UiEvent::ToolOutputAvailable {
                tool_call_id,
                output,
            },
            ModelEvent::ToolError {
                tool_call_id,
                error,
                ..
            } => UiEvent::ToolOutputError {
                tool_call_id,
                error_text: error,
            },
            ModelEvent::StartStep => UiEvent::StartStep,
            ModelEvent::FinishStep { .. } => UiEvent::FinishStep,
            ModelEvent::Finish { finish_reason, .. } => UiEvent::Finish {
                finish_reason: Some(finish_reason),
            },
            ModelEvent::Error { error } => UiEvent::Error { error_text: error },
            ModelEvent::Abort { reason } => UiEvent::Abort { reason },
            ModelEvent::Other { kind, .. } => {
                log::warn!("Dropping unknown stream event type {kind:?}");
                return None;
            }
        };
        Some(translated)
    }

    /// Drain `events` into `sink`. Stream errors arrive as data and are forwarded;
    /// a failing sink stops writes but not the drain.
    pub async fn pipe<S>(mut self, events: S, sink: &mut dyn EventSink) -> TranslationReport
    where
        S: Stream<Item = ModelEvent>,
    {
        let mut events = std::pin::pin!(events);
        let mut report = TranslationReport::default();

        while let Some(event) = events.next().await {
            match &event {
                ModelEvent::TextDelta { delta, .. } => report.text.push_str(delta),
                ModelEvent::Finish {
                    finish_reason,
                    usage,
                } => {
                    report.finish_reason = Some(finish_reason.clone());
                    report.usage = *usage;
                }
                ModelEvent::Error { error } => report.error = Some(error.clone()),
                _ => {}
            }

            let is_delta = matches!(event, ModelEvent::ToolInputDelta { .. });
            let Some(translated) = self.translate(event) else {
                if is_delta {
                    report.suppressed += 1;
                } else {
                    report.dropped += 1;
                }
                continue;
            };

            if report.sink_failed {
                continue;
            }
            match sink.send(translated).await {
                Ok(()) => report.emitted += 1,
                Err(e) => {
                    log::error!("Client sink failed, draining the rest of the stream: {e}");
                    report.sink_failed = true;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_start(id: &str, name: &str) -> ModelEvent {
        ModelEvent::ToolInputStart {
            id: id.into(),
            tool_name: name.into(),
        }
    }

    fn tool_delta(id: &str, delta: &str) -> ModelEvent {
        ModelEvent::ToolInputDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    #[test]
    fn suppresses_deltas_only_for_bulk_tools() {
        let mut translator = StreamTranslator::new(DEFAULT_SUPPRESSED_INPUT_TOOLS.iter().copied());
        assert!(translator.translate(tool_start("a", "write_world_file")).is_some());
        assert!(translator.translate(tool_start("b", "twist_of_fate")).is_some());

        assert_eq!(translator.translate(tool_delta("a", "{\"content\":\"")), None);
        assert_eq!(
            translator.translate(tool_delta("b", "{\"stakes\"")),
            Some(UiEvent::ToolInputDelta {
                tool_call_id: "b".into(),
                input_text_delta: "{\"stakes\"".into()
            })
        );
    }

    #[test]
    fn tool_call_and_result_become_availability_events() {
        let mut translator = StreamTranslator::default();
        assert_eq!(
            translator.translate(ModelEvent::ToolCall {
                tool_call_id: "c".into(),
                tool_name: "search_images".into(),
                input: json!({"tags": ["harbor"]}),
            }),
            Some(UiEvent::ToolInputAvailable {
                tool_call_id: "c".into(),
                tool_name: "search_images".into(),
                input: json!({"tags": ["harbor"]}),
            })
        );
        assert_eq!(
            translator.translate(ModelEvent::ToolResult {
                tool_call_id: "c".into(),
                tool_name: "search_images".into(),
                output: json!([]),
            }),
            Some(UiEvent::ToolOutputAvailable {
                tool_call_id: "c".into(),
                output: json!([]),
            })
        );
    }

    #[test]
    fn unknown_events_are_dropped() {
        let mut translator = StreamTranslator::default();
        assert_eq!(
            translator.translate(ModelEvent::Other {
                kind: "source".into(),
                payload: json!({}),
            }),
            None
        );
    }

    #[tokio::test]
    async fn pipe_preserves_order_and_counts() {
        let events = vec![
            ModelEvent::Start,
            ModelEvent::StartStep,
            ModelEvent::TextStart { id: "t0".into() },
            ModelEvent::TextDelta {
                id: "t0".into(),
                delta: "The tide ".into(),
            },
            tool_start("w", "write_world_file"),
            tool_delta("w", "{\"path\":"),
            tool_start("f", "twist_of_fate"),
            tool_delta("f", "{}"),
            ModelEvent::Other {
                kind: "raw".into(),
                payload: json!(null),
            },
            ModelEvent::TextDelta {
                id: "t0".into(),
                delta: "turns.".into(),
            },
            ModelEvent::TextEnd { id: "t0".into() },
            ModelEvent::FinishStep {
                usage: Usage::default(),
            },
            ModelEvent::Finish {
                finish_reason: "stop".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                },
            },
        ];

        let mut sink: Vec<UiEvent> = Vec::new();
        let report = StreamTranslator::new(["write_world_file"])
            .with_message_id("msg_1")
            .pipe(futures::stream::iter(events), &mut sink)
            .await;

        let kinds: Vec<String> = sink
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            [
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "tool-input-start",
                "tool-input-start",
                "tool-input-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish",
            ]
        );
        assert_eq!(
            sink[0],
            UiEvent::Start {
                message_id: Some("msg_1".into())
            }
        );
        assert_eq!(report.emitted, 11);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.text, "The tide turns.");
        assert_eq!(report.usage.total_tokens, 15);
        assert_eq!(report.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn stream_errors_are_forwarded_as_terminal_events() {
        let events = vec![
            ModelEvent::Start,
            ModelEvent::Error {
                error: "connection reset".into(),
            },
        ];
        let mut sink: Vec<UiEvent> = Vec::new();
        let report = StreamTranslator::default()
            .pipe(futures::stream::iter(events), &mut sink)
            .await;
        assert_eq!(sink.last(), Some(&UiEvent::error("connection reset")));
        assert!(sink.last().is_some_and(UiEvent::is_terminal));
        assert_eq!(report.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn closed_sink_still_drains_the_stream() {
        let (mut tx, rx) = mpsc::unbounded_channel::<UiEvent>();
        drop(rx);
        let events = vec![
            ModelEvent::Start,
            ModelEvent::TextDelta {
                id: "t".into(),
                delta: "lost".into(),
            },
        ];
        let report = StreamTranslator::default()
            .pipe(futures::stream::iter(events), &mut tx)
            .await;
        assert!(report.sink_failed);
        assert_eq!(report.emitted, 0);
        assert_eq!(report.text, "lost");
    }

    #[tokio::test]
    async fn sse_sink_frames_events() {
        let mut sink = SseSink::new(Vec::<u8>::new());
        sink.send(UiEvent::FinishStep).await.unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "data: {\"type\":\"finish-step\"}\n\n");
    }
}
