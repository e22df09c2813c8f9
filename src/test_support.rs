// Scripted in-process models for unit tests.

use crate::error::ProviderError;
use crate::provider::{
    ChunkStream, Completion, CompletionRequest, LanguageModel, ObjectRequest, ObjectResponse,
    StreamChunk, ToolInvocation, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub enum Reply {
    Object(Value),
    Completion(Completion),
    Stream(Vec<Result<StreamChunk, ProviderError>>),
    Fail(&'static str),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Completion(Completion {
            text: text.to_string(),
            usage: usage(3, 2),
            finish_reason: Some("stop".into()),
            ..Completion::default()
        })
    }

    pub fn tool_call(id: &str, name: &str, input: Value) -> Self {
        Reply::Completion(Completion {
            tool_calls: vec![ToolInvocation {
                id: id.into(),
                name: name.into(),
                input,
            }],
            usage: usage(3, 2),
            finish_reason: Some("tool-calls".into()),
            ..Completion::default()
        })
    }

    pub fn streamed_text(parts: &[&str]) -> Self {
        let mut chunks: Vec<_> = parts
            .iter()
            .map(|p| Ok(StreamChunk::TextDelta(p.to_string())))
            .collect();
        chunks.push(Ok(StreamChunk::Finish {
            reason: Some("stop".into()),
        }));
        chunks.push(Ok(StreamChunk::Usage(usage(7, 4))));
        Reply::Stream(chunks)
    }
}

pub fn usage(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
    }
}

/// Replies are consumed in order across all three methods.
pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(name: &str, replies: Vec<Reply>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fail("script exhausted"))
    }

    fn record(&self, request: &CompletionRequest) {
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_object(
        &self,
        request: ObjectRequest,
    ) -> Result<ObjectResponse, ProviderError> {
        self.record(&CompletionRequest {
            system: request.system,
            messages: request.messages,
            tools: Vec::new(),
        });
        match self.next() {
            Reply::Object(value) => Ok(ObjectResponse {
                value,
                usage: usage(10, 5),
            }),
            Reply::Fail(reason) => Err(ProviderError::Other(reason.into())),
            _ => Err(ProviderError::Other("unexpected object call".into())),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.record(&request);
        match self.next() {
            Reply::Completion(completion) => Ok(completion),
            Reply::Fail(reason) => Err(ProviderError::Other(reason.into())),
            _ => Err(ProviderError::Other("unexpected completion call".into())),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        self.record(&request);
        match self.next() {
            Reply::Stream(chunks) => Ok(futures::stream::iter(chunks).boxed()),
            Reply::Fail(reason) => Err(ProviderError::Other(reason.into())),
            _ => Err(ProviderError::Other("unexpected stream call".into())),
        }
    }
}

/// Image library with an empty catalog that cannot generate.
pub struct NoImages;

#[async_trait]
impl crate::images::ImageLibrary for NoImages {
    async fn search(
        &self,
        _game_id: &str,
        _query: &crate::images::ImageQuery,
    ) -> Result<Vec<crate::images::ImageRecord>, crate::error::ImageError> {
        Ok(Vec::new())
    }

    async fn create(
        &self,
        _game_id: &str,
        _request: crate::images::ImageRequest,
    ) -> Result<crate::images::ImageRecord, crate::error::ImageError> {
        Err(crate::error::ImageError::NoImage)
    }
}
