//! The seam between the pipeline and whatever serves the language models.

use crate::error::ProviderError;
use crate::message::ChatMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, other: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        *self = *self + other;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<rig::completion::ToolDefinition> for ToolSchema {
    fn from(definition: rig::completion::ToolDefinition) -> Self {
        Self {
            name: definition.name,
            description: definition.description,
            parameters: definition.parameters,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
}

#[derive(Debug, Clone)]
pub struct ObjectRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub schema_name: String,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct ObjectResponse {
    pub value: Value,
    pub usage: Usage,
}

// A tool call the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    ReasoningDelta(String),
    /// Argument fragments are keyed by `index`; `id` and `name` arrive on the first fragment.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish {
        reason: Option<String>,
    },
    Usage(Usage),
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider/model label used in logs.
    fn name(&self) -> &str;

    /// Ask for a JSON object matching `request.schema`.
    async fn generate_object(&self, request: ObjectRequest)
    -> Result<ObjectResponse, ProviderError>;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}
