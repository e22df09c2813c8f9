//! Bounded tool-calling loops over a [`LanguageModel`].
//!
//! [`run_agent`] is the blocking variant sub-agents use. [`stream_agent`] is the
//! narrator's variant and reports everything as [`ModelEvent`]s, including
//! provider failures, so consumers never see an `Err`.

use crate::error::ProviderError;
use crate::events::ModelEvent;
use crate::message::{ChatMessage, MessagePart, Role};
use crate::provider::{CompletionRequest, LanguageModel, StreamChunk, ToolInvocation, Usage};
use crate::tools::ToolBox;
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

pub type EventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    /// Text of the final step.
    pub text: String,
    /// One record per model round: `{text, toolCalls, toolResults}`.
    pub steps: Vec<Value>,
    pub usage: Usage,
    /// True when the step budget ran out while the model still wanted tools.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
struct ToolOutcome {
    call: ToolInvocation,
    output: Value,
    failed: bool,
}

async fn execute(tools: &ToolBox, call: ToolInvocation) -> ToolOutcome {
    match tools.call(&call.name, &call.input).await {
        Ok(output) => ToolOutcome {
            call,
            output,
            failed: false,
        },
        Err(error) => ToolOutcome {
            call,
            output: json!({ "error": error }),
            failed: true,
        },
    }
}

fn step_record(text: &str, outcomes: &[ToolOutcome]) -> Value {
    json!({
        "text": text,
        "toolCalls": outcomes.iter().map(|o| json!({
            "toolCallId": o.call.id,
            "toolName": o.call.name,
            "input": o.call.input,
        })).collect::<Vec<_>>(),
        "toolResults": outcomes.iter().map(|o| json!({
            "toolCallId": o.call.id,
            "toolName": o.call.name,
            "output": o.output,
            "isError": o.failed,
        })).collect::<Vec<_>>(),
    })
}

/// The assistant turn as it goes back into history: calls, results, then text.
fn assistant_turn(text: &str, outcomes: &[ToolOutcome]) -> ChatMessage {
    let mut parts = Vec::with_capacity(outcomes.len() * 2 + 1);
    for o in outcomes {
        parts.push(MessagePart::ToolCall {
            tool_call_id: o.call.id.clone(),
            tool_name: o.call.name.clone(),
            input: o.call.input.clone(),
        });
    }
    for o in outcomes {
        parts.push(MessagePart::ToolResult {
            tool_call_id: o.call.id.clone(),
            tool_name: o.call.name.clone(),
            output: o.output.clone(),
        });
    }
    if !text.is_empty() {
        parts.push(MessagePart::Text {
            text: text.to_string(),
        });
    }
    ChatMessage {
        role: Role::Assistant,
        parts,
    }
}

pub async fn run_agent(
    model: &dyn LanguageModel,
    system: &str,
    mut messages: Vec<ChatMessage>,
    tools: &ToolBox,
    max_steps: usize,
) -> Result<AgentRun, ProviderError> {
    let definitions = tools.definitions().await;
    let mut run = AgentRun::default();

    for step in 0..max_steps.max(1) {
        let completion = model
            .complete(CompletionRequest {
                system: system.to_string(),
                messages: messages.clone(),
                tools: definitions.clone(),
            })
            .await?;
        run.usage += completion.usage;

        let mut outcomes = Vec::with_capacity(completion.tool_calls.len());
        for call in completion.tool_calls {
            log::debug!("{} step {step}: calling {}", model.name(), call.name);
            outcomes.push(execute(tools, call).await);
        }
        run.steps.push(step_record(&completion.text, &outcomes));
        run.text = completion.text.clone();

        if outcomes.is_empty() {
            run.exhausted = false;
            return Ok(run);
        }
        messages.push(assistant_turn(&completion.text, &outcomes));
        run.exhausted = true;
    }

    log::warn!("{} used its whole budget of {max_steps} steps", model.name());
    Ok(run)
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Streaming multi-step loop. Always ends with exactly one `finish` or `error`.
pub fn stream_agent(
    model: Arc<dyn LanguageModel>,
    system: String,
    mut messages: Vec<ChatMessage>,
    tools: Arc<ToolBox>,
    max_steps: usize,
) -> EventStream {
    Box::pin(stream! {
        let definitions = tools.definitions().await;
        let mut total = Usage::default();
        let mut finish_reason = String::from("stop");

        yield ModelEvent::Start;

        for step in 0..max_steps.max(1) {
            yield ModelEvent::StartStep;

            let request = CompletionRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: definitions.clone(),
            };
            let mut chunks = match model.stream(request).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    log::error!("{} could not start step {step}: {e}", model.name());
                    yield ModelEvent::Error { error: e.to_string() };
                    return;
                }
            };

            let text_id = format!("text-{step}");
            let reasoning_id = format!("reasoning-{step}");
            let mut text = String::new();
            let mut text_open = false;
            let mut reasoning_open = false;
            let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();
            let mut step_usage = Usage::default();

            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(StreamChunk::TextDelta(delta)) => {
                        if !text_open {
                            text_open = true;
                            yield ModelEvent::TextStart { id: text_id.clone() };
                        }
                        text.push_str(&delta);
                        yield ModelEvent::TextDelta { id: text_id.clone(), delta };
                    }
                    Ok(StreamChunk::ReasoningDelta(delta)) => {
                        if !reasoning_open {
                            reasoning_open = true;
                            yield ModelEvent::ReasoningStart { id: reasoning_id.clone() };
                        }
                        yield ModelEvent::ReasoningDelta { id: reasoning_id.clone(), delta };
                    }
                    Ok(StreamChunk::ToolCallDelta { index, id, name, arguments }) => {
                        let is_new = !pending.contains_key(&index);
                        let call = pending.entry(index).or_default();
                        if is_new {
                            call.id = id.unwrap_or_else(|| format!("call-{step}-{index}"));
                            call.name = name.unwrap_or_default();
                            yield ModelEvent::ToolInputStart {
                                id: call.id.clone(),
                                tool_name: call.name.clone(),
                            };
                        }
                        if !arguments.is_empty() {
                            call.arguments.push_str(&arguments);
                            yield ModelEvent::ToolInputDelta { id: call.id.clone(), delta: arguments };
                        }
                    }
                    Ok(StreamChunk::Finish { reason }) => {
                        if let Some(reason) = reason {
                            finish_reason = reason;
                        }
                    }
                    Ok(StreamChunk::Usage(usage)) => step_usage += usage,
                    Err(e) => {
                        log::error!("{} stream broke in step {step}: {e}", model.name());
                        yield ModelEvent::Error { error: e.to_string() };
                        return;
                    }
                }
            }

            if reasoning_open {
                yield ModelEvent::ReasoningEnd { id: reasoning_id.clone() };
            }
            if text_open {
                yield ModelEvent::TextEnd { id: text_id.clone() };
            }

            let mut calls = Vec::with_capacity(pending.len());
            for (_, call) in pending {
                yield ModelEvent::ToolInputEnd { id: call.id.clone() };
                let input = if call.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(Value::String(call.arguments.clone()))
                };
                yield ModelEvent::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: input.clone(),
                };
                calls.push(ToolInvocation { id: call.id, name: call.name, input });
            }

            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                let outcome = execute(&tools, call).await;
                if outcome.failed {
                    yield ModelEvent::ToolError {
                        tool_call_id: outcome.call.id.clone(),
                        tool_name: outcome.call.name.clone(),
                        error: outcome.output["error"].as_str().unwrap_or_default().to_string(),
                    };
                } else {
                    yield ModelEvent::ToolResult {
                        tool_call_id: outcome.call.id.clone(),
                        tool_name: outcome.call.name.clone(),
                        output: outcome.output.clone(),
                    };
                }
                outcomes.push(outcome);
            }

            total += step_usage;
            yield ModelEvent::FinishStep { usage: step_usage };

            if outcomes.is_empty() {
                yield ModelEvent::Finish { finish_reason, usage: total };
                return;
            }
            messages.push(assistant_turn(&text, &outcomes));
        }

        log::warn!("{} stopped after {max_steps} streamed steps", model.name());
        yield ModelEvent::Finish { finish_reason, usage: total };
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, ScriptedModel};
    use crate::tools::TwistOfFate;
    use crate::tool_calls::extract_from_steps;

    fn tools() -> ToolBox {
        ToolBox::new().with(TwistOfFate)
    }

    #[tokio::test]
    async fn run_agent_executes_tools_until_plain_text() {
        let model = ScriptedModel::new(
            "m",
            vec![
                Reply::tool_call("c1", "twist_of_fate", json!({"stakes": "1-100: rain"})),
                Reply::text("It rains over the harbor."),
            ],
        );
        let run = run_agent(&model, "sys", vec![ChatMessage::user("go")], &tools(), 5)
            .await
            .unwrap();

        assert_eq!(run.text, "It rains over the harbor.");
        assert_eq!(run.steps.len(), 2);
        assert!(!run.exhausted);
        assert_eq!(run.usage.total_tokens, 10);
        assert_eq!(run.steps[0]["toolResults"][0]["output"]["outcome"], "rain");

        let calls = extract_from_steps(&run.steps);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "twist_of_fate");

        let requests = model.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn run_agent_stops_at_the_step_budget() {
        let replies = (0..3)
            .map(|i| Reply::tool_call(&format!("c{i}"), "twist_of_fate", json!({"stakes": "1-100: x"})))
            .collect();
        let model = ScriptedModel::new("m", replies);
        let run = run_agent(&model, "sys", vec![], &tools(), 2).await.unwrap();
        assert_eq!(run.steps.len(), 2);
        assert!(run.exhausted);
    }

    #[tokio::test]
    async fn run_agent_propagates_provider_errors() {
        let model = ScriptedModel::new("m", vec![Reply::Fail("rate limited")]);
        let err = run_agent(&model, "sys", vec![], &tools(), 3).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    fn kinds(events: &[ModelEvent]) -> Vec<&str> {
        events.iter().map(ModelEvent::kind).collect()
    }

    #[tokio::test]
    async fn stream_agent_runs_tool_step_then_narrates() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![
                Reply::Stream(vec![
                    Ok(StreamChunk::ToolCallDelta {
                        index: 0,
                        id: Some("c1".into()),
                        name: Some("twist_of_fate".into()),
                        arguments: "{\"stakes\":".into(),
                    }),
                    Ok(StreamChunk::ToolCallDelta {
                        index: 0,
                        id: None,
                        name: None,
                        arguments: "\"1-100: the lock gives\"}".into(),
                    }),
                    Ok(StreamChunk::Finish {
                        reason: Some("tool-calls".into()),
                    }),
                ]),
                Reply::streamed_text(&["The lock ", "gives."]),
            ],
        ));
        let events: Vec<_> = stream_agent(model, "sys".into(), vec![], Arc::new(tools()), 4)
            .collect()
            .await;

        assert_eq!(
            kinds(&events),
            [
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-delta",
                "tool-input-delta",
                "tool-input-end",
                "tool-call",
                "tool-result",
                "finish-step",
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish",
            ]
        );
        match &events[6] {
            ModelEvent::ToolCall { input, .. } => {
                assert_eq!(input, &json!({"stakes": "1-100: the lock gives"}))
            }
            other => panic!("unexpected {other:?}"),
        }
        match events.last() {
            Some(ModelEvent::Finish {
                finish_reason,
                usage,
            }) => {
                assert_eq!(finish_reason, "stop");
                assert_eq!(usage.total_tokens, 11);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_agent_reports_failures_as_events() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![Reply::Stream(vec![
                Ok(StreamChunk::TextDelta("Once".into())),
                Err(ProviderError::Stream("socket closed".into())),
            ])],
        ));
        let events: Vec<_> = stream_agent(model, "sys".into(), vec![], Arc::new(tools()), 2)
            .collect()
            .await;
        assert_eq!(kinds(&events), ["start", "start-step", "text-start", "text-delta", "error"]);

        let refused = Arc::new(ScriptedModel::new("m", vec![Reply::Fail("no key")]));
        let events: Vec<_> = stream_agent(refused, "sys".into(), vec![], Arc::new(tools()), 2)
            .collect()
            .await;
        assert_eq!(kinds(&events), ["start", "start-step", "error"]);
    }

    #[tokio::test]
    async fn unknown_tool_surfaces_as_tool_error() {
        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![
                Reply::Stream(vec![Ok(StreamChunk::ToolCallDelta {
                    index: 0,
                    id: Some("c9".into()),
                    name: Some("summon".into()),
                    arguments: "{}".into(),
                })]),
                Reply::streamed_text(&["Nothing happens."]),
            ],
        ));
        let events: Vec<_> = stream_agent(model, "sys".into(), vec![], Arc::new(tools()), 3)
            .collect()
            .await;
        assert!(events.iter().any(|e| matches!(
            e,
            ModelEvent::ToolError { tool_name, .. } if tool_name == "summon"
        )));
        assert_eq!(events.last().map(ModelEvent::kind), Some("finish"));
    }
}
