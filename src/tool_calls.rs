//! Normalizes per-step tool-call records into `{toolName, args}`.
//!
//! Step records come from two generations of the agent loop: the current one
//! stores arguments under `input`, older transcripts under `args`. Both shapes
//! are accepted through [`arguments_of`]; nothing here can fail.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    pub args: Map<String, Value>,
}

/// Compatibility shim: `input` wins, legacy `args` is the fallback.
/// Anything that is not a JSON object yields an empty map.
pub fn arguments_of(record: &Value) -> Map<String, Value> {
    ["input", "args"]
        .iter()
        .find_map(|field| record.get(*field).filter(|v| !v.is_null()))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Tool calls recorded in one step, in order. Records without a tool name get
/// an empty one rather than being dropped so counts stay faithful.
pub fn extract_tool_calls(step: &Value) -> Vec<ToolCall> {
    let Some(records) = step.get("toolCalls").and_then(Value::as_array) else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|record| record.is_object())
        .map(|record| ToolCall {
            tool_name: record
                .get("toolName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            args: arguments_of(record),
        })
        .collect()
}

pub fn extract_from_steps(steps: &[Value]) -> Vec<ToolCall> {
    steps.iter().flat_map(extract_tool_calls).collect()
}
