//! Event vocabularies on both sides of the stream translator.
//!
//! [`ModelEvent`] is what the narrator's agent loop produces while it streams.
//! [`UiEvent`] is the client-facing UI message stream (AI SDK style, see
//! <https://ai-sdk.dev/docs/ai-sdk-ui/stream-protocol>).

use crate::provider::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Internal stream events, in production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ModelEvent {
    Start,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
    },
    ToolInputDelta {
        id: String,
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
    },
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },
    StartStep,
    FinishStep {
        usage: Usage,
    },
    Finish {
        finish_reason: String,
        usage: Usage,
    },
    Error {
        error: String,
    },
    Abort {
        reason: Option<String>,
    },
    /// Provider-specific records with no client mapping (sources, raw chunks, ...).
    #[serde(untagged)]
    Other {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        payload: Value,
    },
}

impl ModelEvent {
    pub fn kind(&self) -> &str {
        match self {
            ModelEvent::Start => "start",
            ModelEvent::TextStart { .. } => "text-start",
            ModelEvent::TextDelta { .. } => "text-delta",
            ModelEvent::TextEnd { .. } => "text-end",
            ModelEvent::ReasoningStart { .. } => "reasoning-start",
            ModelEvent::ReasoningDelta { .. } => "reasoning-delta",
            ModelEvent::ReasoningEnd { .. } => "reasoning-end",
            ModelEvent::ToolInputStart { .. } => "tool-input-start",
            ModelEvent::ToolInputDelta { .. } => "tool-input-delta",
            ModelEvent::ToolInputEnd { .. } => "tool-input-end",
            ModelEvent::ToolCall { .. } => "tool-call",
            ModelEvent::ToolResult { .. } => "tool-result",
            ModelEvent::ToolError { .. } => "tool-error",
            ModelEvent::StartStep => "start-step",
            ModelEvent::FinishStep { .. } => "finish-step",
            ModelEvent::Finish { .. } => "finish",
            ModelEvent::Error { .. } => "error",
            ModelEvent::Abort { .. } => "abort",
            ModelEvent::Other { kind, .. } => kind,
        }
    }
}

/// Client-facing UI message stream events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiEvent {
    Start {
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },
    ToolInputEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },
    ToolOutputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },
    StartStep,
    FinishStep,
    Finish {
        #[serde(rename = "finishReason", skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    MessageMetadata {
        #[serde(rename = "messageMetadata")]
        message_metadata: Value,
    },
    /// Custom `data-*` events.
    #[serde(untagged)]
    Data {
        #[serde(rename = "type")]
        data_type: String,
        data: Value,
    },
}

impl UiEvent {
    pub fn error(error_text: impl Into<String>) -> Self {
        Self::Error {
            error_text: error_text.into(),
        }
    }

    pub fn data(name: impl Into<String>, data: Value) -> Self {
        Self::Data {
            data_type: format!("data-{}", name.into()),
            data,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UiEvent::Finish { .. } | UiEvent::Abort { .. } | UiEvent::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ui_events_use_protocol_field_names() {
        let event = UiEvent::ToolInputAvailable {
            tool_call_id: "call_1".into(),
            tool_name: "twist_of_fate".into(),
            input: json!({"stakes": "1-100: yes"}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool-input-available",
                "toolCallId": "call_1",
                "toolName": "twist_of_fate",
                "input": {"stakes": "1-100: yes"}
            })
        );
        assert_eq!(
            serde_json::to_value(UiEvent::data("agent-progress", json!({"a": 1}))).unwrap(),
            json!({"type": "data-agent-progress", "data": {"a": 1}})
        );
    }

    #[test]
    fn unknown_model_event_types_deserialize_as_other() {
        let event: ModelEvent =
            serde_json::from_value(json!({"type": "source", "payload": {"url": "x"}})).unwrap();
        assert_eq!(event.kind(), "source");
        let known: ModelEvent =
            serde_json::from_value(json!({"type": "text-delta", "id": "t0", "delta": "hi"}))
                .unwrap();
        assert_eq!(
            known,
            ModelEvent::TextDelta {
                id: "t0".into(),
                delta: "hi".into()
            }
        );
    }
}
