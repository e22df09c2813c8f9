use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    Text {
        text: String,
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
}

// One conversation message as the caller hands it over: a role and its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// All text parts joined, tool parts skipped.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Index of the last user message, where per-turn context is inserted before.
pub fn last_user_index(messages: &[ChatMessage]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

/// Keep only the most recent `window` messages.
pub fn recent(messages: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    let skip = messages.len().saturating_sub(window);
    messages[skip..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parts_use_kebab_tags_and_camel_fields() {
        let message = ChatMessage {
            role: Role::Assistant,
            parts: vec![
                MessagePart::Text { text: "Hi".into() },
                MessagePart::ToolCall {
                    tool_call_id: "c1".into(),
                    tool_name: "twist_of_fate".into(),
                    input: json!({"stakes": "1-100: yes"}),
                },
            ],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["parts"][1]["type"], "tool-call");
        assert_eq!(value["parts"][1]["toolName"], "twist_of_fate");
    }

    #[test]
    fn recent_keeps_the_tail() {
        let messages: Vec<_> = (0..5).map(|i| ChatMessage::user(i.to_string())).collect();
        let tail = recent(&messages, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text(), "3");
        assert_eq!(recent(&messages, 10).len(), 5);
    }

    #[test]
    fn finds_last_user_turn() {
        let messages = vec![
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
            ChatMessage::user("c"),
            ChatMessage::assistant("d"),
        ];
        assert_eq!(last_user_index(&messages), Some(2));
        assert_eq!(last_user_index(&[]), None);
    }
}
