use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chat, Message, Role, UserTier};

// -- JWT Claims --

/// Claims carried by identity tokens. Issued elsewhere; this service only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tier: UserTier,
    pub exp: usize,
}

// -- Turn submission --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatModel {
    #[default]
    #[serde(rename = "chat-model")]
    Chat,
    #[serde(rename = "chat-model-reasoning")]
    Reasoning,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequestBody {
    pub id: String,
    pub message: InboundMessage,
    #[serde(default)]
    pub selected_chat_model: ChatModel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub parts: Vec<InboundPart>,
    #[serde(default, rename = "experimental_attachments", alias = "experimentalAttachments")]
    pub experimental_attachments: Vec<LegacyAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundPart {
    Text { text: String },
    File(RawFilePart),
}

/// A file part as clients send it. Older clients use `{url, filename}`, newer ones
/// `{data, fileName}`; canonical parts use `{url|data, filename}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilePart {
    pub media_type: Option<String>,
    pub filename: Option<String>,
    pub file_name: Option<String>,
    pub url: Option<String>,
    pub data: Option<String>,
}

/// Attachment list sent next to the parts by older clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAttachment {
    pub url: String,
    pub name: String,
    pub content_type: String,
}

// -- Stateless completion --

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<CompletionMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    pub parts: Vec<InboundPart>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
pub struct DeleteChatQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub chat: Chat,
    pub messages: Vec<Message>,
}

/// Structured error body for non-streaming failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
