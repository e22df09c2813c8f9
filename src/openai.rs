// OpenAI-compatible chat completions behind the `LanguageModel` seam.

use crate::error::ProviderError;
use crate::message::{ChatMessage, MessagePart, Role};
use crate::provider::{
    ChunkStream, Completion, CompletionRequest, LanguageModel, ObjectRequest, ObjectResponse,
    StreamChunk, ToolInvocation, ToolSchema, Usage,
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionStreamOptions, ChatCompletionTool, ChatCompletionToolType,
        CompletionUsage, CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
        FinishReason, FunctionCall, FunctionObject, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    label: String,
}

impl OpenAiModel {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self::with_config(config, model.into())
    }

    /// Any OpenAI-compatible endpoint, used for the secondary provider.
    pub fn with_base(api_key: &str, api_base: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self::with_config(config, model.into())
    }

    fn with_config(config: OpenAIConfig, model: String) -> Self {
        let label = format!("openai:{model}");
        Self {
            client: Client::with_config(config),
            model,
            label,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate_object(
        &self,
        request: ObjectRequest,
    ) -> Result<ObjectResponse, ProviderError> {
        let messages = to_openai_messages(&request.system, &request.messages)?;
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: request.schema_name,
                schema: Some(request.schema),
                strict: Some(true),
            },
        };
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(response_format)
            .build()?;

        let response = self.client.chat().create(chat_request).await?;
        let usage = response.usage.map(usage_from).unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;
        if let Some(refusal) = choice.message.refusal {
            return Err(ProviderError::Refused(refusal));
        }
        let content = choice.message.content.ok_or(ProviderError::EmptyResponse)?;
        let value = serde_json::from_str(&content)
            .map_err(|e| ProviderError::MalformedObject(e.to_string()))?;
        Ok(ObjectResponse { value, usage })
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let messages = to_openai_messages(&request.system, &request.messages)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if !request.tools.is_empty() {
            args.tools(to_openai_tools(request.tools));
        }
        let chat_request = args.build()?;

        let response = self.client.chat().create(chat_request).await?;
        let usage = response.usage.map(usage_from).unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolInvocation {
                id: call.id,
                input: parse_arguments(&call.function.arguments),
                name: call.function.name,
            })
            .collect();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
            finish_reason: choice.finish_reason.map(finish_label),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let messages = to_openai_messages(&request.system, &request.messages)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            });
        if !request.tools.is_empty() {
            args.tools(to_openai_tools(request.tools));
        }
        let chat_request = args.build()?;

        let stream = self.client.chat().create_stream(chat_request).await?;
        let chunks = stream.flat_map(|item| {
            let batch: Vec<Result<StreamChunk, ProviderError>> = match item {
                Ok(response) => chunks_from(response).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(ProviderError::from(e))],
            };
            futures::stream::iter(batch)
        });
        Ok(chunks.boxed())
    }
}

fn to_openai_messages(
    system: &str,
    messages: &[ChatMessage],
) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
    let mut out: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
        );
    }

    for message in messages {
        let text = message.text();
        match message.role {
            Role::System => out.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(text)
                    .build()?
                    .into(),
            ),
            Role::User => out.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()?
                    .into(),
            ),
            Role::Assistant | Role::Tool => {
                let calls: Vec<ChatCompletionMessageToolCall> = message
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        MessagePart::ToolCall {
                            tool_call_id,
                            tool_name,
                            input,
                        } => Some(ChatCompletionMessageToolCall {
                            id: tool_call_id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tool_name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();

                if !text.is_empty() || !calls.is_empty() {
                    let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
                    if !text.is_empty() {
                        assistant.content(text);
                    }
                    if !calls.is_empty() {
                        assistant.tool_calls(calls);
                    }
                    out.push(assistant.build()?.into());
                }

                // Results follow the assistant message that requested them.
                for part in &message.parts {
                    if let MessagePart::ToolResult {
                        tool_call_id,
                        output,
                        ..
                    } = part
                    {
                        let content = match output {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        out.push(
                            ChatCompletionRequestToolMessageArgs::default()
                                .tool_call_id(tool_call_id.clone())
                                .content(content)
                                .build()?
                                .into(),
                        );
                    }
                }
            }
        }
    }
    Ok(out)
}

fn to_openai_tools(tools: Vec<ToolSchema>) -> Vec<ChatCompletionTool> {
    tools
        .into_iter()
        .map(|tool| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: tool.name,
                description: Some(tool.description),
                parameters: Some(tool.parameters),
                strict: None,
            },
        })
        .collect()
}

fn chunks_from(response: CreateChatCompletionStreamResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    for choice in response.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                chunks.push(StreamChunk::TextDelta(content));
            }
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            chunks.push(StreamChunk::ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            chunks.push(StreamChunk::Finish {
                reason: Some(finish_label(reason)),
            });
        }
    }
    if let Some(usage) = response.usage {
        chunks.push(StreamChunk::Usage(usage_from(usage)));
    }
    chunks
}

fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn usage_from(usage: CompletionUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens.into(),
        output_tokens: usage.completion_tokens.into(),
        total_tokens: usage.total_tokens.into(),
    }
}

fn finish_label(reason: FinishReason) -> String {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls | FinishReason::FunctionCall => "tool-calls",
        FinishReason::ContentFilter => "content-filter",
    }
    .to_string()
}
