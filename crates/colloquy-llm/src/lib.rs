//! Model invocation: a uniform streaming interface over chat-completion providers,
//! with tool execution, output pacing and reasoning extraction.

pub mod adapter;
pub mod convert;
pub mod error;
pub mod openai;
pub mod provider;
pub mod reasoning;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod smooth;
pub mod title;
pub mod tools;

pub use adapter::{ModelAdapter, TurnRequest};
pub use error::LlmError;
pub use provider::{ChunkStream, LanguageModel, ModelMessage, ModelRequest, ProviderChunk};
pub use tools::{Tool, ToolSet};
