use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use colloquy_types::events::FinishReason;

use crate::error::LlmError;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, LlmError>> + Send>>;

/// A tool call the model asked for. `arguments` is the decoded JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Raw output of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderChunk {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Finish(FinishReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image { url: String },
    File { filename: String, data_url: String },
}

/// History entry in provider shape: tool requests and tool results are separate turns.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    User(Vec<ContentPart>),
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

/// Function declaration offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start one generation step. The stream ends after a `Finish` chunk.
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, LlmError>;

    /// One-shot, non-streaming generation returning the full text.
    async fn complete(&self, request: ModelRequest) -> Result<String, LlmError>;
}
