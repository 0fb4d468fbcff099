//! OpenAI-compatible chat-completions provider (`POST {base}/chat/completions`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use colloquy_types::events::FinishReason;

use crate::error::LlmError;
use crate::provider::{
    ChunkStream, ContentPart, LanguageModel, ModelMessage, ModelRequest, ProviderChunk,
    ToolCallRequest,
};

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        messages.extend(request.messages.iter().map(message_json));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn message_json(message: &ModelMessage) -> Value {
    match message {
        ModelMessage::User(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                    ContentPart::Image { url } => {
                        json!({ "type": "image_url", "image_url": { "url": url } })
                    }
                    ContentPart::File { filename, data_url } => json!({
                        "type": "file",
                        "file": { "filename": filename, "file_data": data_url }
                    }),
                })
                .collect();
            json!({ "role": "user", "content": content })
        }
        ModelMessage::Assistant { text, tool_calls } => {
            let mut m = json!({ "role": "assistant", "content": text });
            if !tool_calls.is_empty() {
                m["tool_calls"] = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() }
                        })
                    })
                    .collect();
            }
            m
        }
        ModelMessage::Tool { call_id, content } => {
            json!({ "role": "tool", "tool_call_id": call_id, "content": content })
        }
    }
}

// ── Streaming wire types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

fn finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn drain_calls(calls: &mut BTreeMap<usize, PartialCall>) -> Result<Vec<ToolCallRequest>, LlmError> {
    std::mem::take(calls)
        .into_values()
        .map(|c| {
            let arguments = if c.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&c.arguments)?
            };
            let id = if c.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                c.id
            };
            Ok(ToolCallRequest {
                id,
                name: c.name,
                arguments,
            })
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, LlmError> {
        let body = self.body(&request, true);
        let response = self.post(&body).await?;
        debug!(model = %self.model, "provider stream opened");

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut calls: BTreeMap<usize, PartialCall> = BTreeMap::new();
            let mut finished = false;

            'outer: while let Some(chunk) = bytes.next().await {
                buffer.extend_from_slice(&chunk?);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }

                    let parsed: StreamChunk = serde_json::from_str(data)?;
                    for choice in parsed.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty() {
                                yield ProviderChunk::TextDelta(text);
                            }
                        }
                        for tc in choice.delta.tool_calls {
                            let entry = calls.entry(tc.index).or_default();
                            if let Some(id) = tc.id {
                                entry.id = id;
                            }
                            if let Some(f) = tc.function {
                                if let Some(name) = f.name {
                                    entry.name.push_str(&name);
                                }
                                if let Some(args) = f.arguments {
                                    entry.arguments.push_str(&args);
                                }
                            }
                        }
                        if let Some(reason) = choice.finish_reason {
                            for call in drain_calls(&mut calls)? {
                                yield ProviderChunk::ToolCall(call);
                            }
                            yield ProviderChunk::Finish(finish_reason(&reason));
                            finished = true;
                        }
                    }
                }
            }

            if !finished {
                if calls.is_empty() {
                    warn!("provider stream closed without a finish reason");
                    Err::<(), LlmError>(LlmError::UnexpectedEnd)?;
                }
                for call in drain_calls(&mut calls)? {
                    yield ProviderChunk::ToolCall(call);
                }
                yield ProviderChunk::Finish(FinishReason::ToolCalls);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: ModelRequest) -> Result<String, LlmError> {
        let body = self.body(&request, false);
        let response = self.post(&body).await?;
        let completion: Completion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Decode("completion without content".into()))
    }
}
