//! Shape checks for inbound turns. Runs before identity is consulted so that
//! malformed requests are reported as such even when unauthenticated.

use chrono::Utc;

use colloquy_types::api::{ChatModel, CompletionMessage, InboundPart, PostRequestBody};
use colloquy_types::models::{Attachment, Message, Part, Role, generate_id};

use crate::attachments::{self, is_allowed_media_type};
use crate::error::ChatError;

pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_CHAT_ID_CHARS: usize = 128;

/// A turn that passed validation, with its user message already canonical.
#[derive(Debug, Clone)]
pub struct ValidatedTurn {
    pub chat_id: String,
    pub message: Message,
    pub model: ChatModel,
}

pub fn validate_turn(body: PostRequestBody) -> Result<ValidatedTurn, ChatError> {
    validate_chat_id(&body.id)?;
    let inbound = body.message;

    if inbound.role != Role::User {
        return Err(ChatError::BadRequest("only user messages can be submitted".into()));
    }

    let parts = convert_parts(&inbound.parts)?;

    let mut legacy = Vec::with_capacity(inbound.experimental_attachments.len());
    for a in &inbound.experimental_attachments {
        if a.name.is_empty() || a.name.chars().count() > MAX_TEXT_CHARS {
            return Err(ChatError::BadRequest("attachment name must be 1-2000 characters".into()));
        }
        let attachment = attachments::normalize_legacy(a)?;
        check_media_type(&attachment)?;
        legacy.push(attachment);
    }

    let message = Message {
        id: generate_id(),
        chat_id: body.id.clone(),
        role: Role::User,
        parts,
        attachments: legacy,
        created_at: Utc::now(),
    };

    Ok(ValidatedTurn {
        chat_id: body.id,
        message,
        model: body.selected_chat_model,
    })
}

/// Validate the message list of a stateless completion.
pub fn validate_completion(messages: &[CompletionMessage]) -> Result<Vec<Message>, ChatError> {
    if messages.is_empty() {
        return Err(ChatError::BadRequest("at least one message is required".into()));
    }
    let now = Utc::now();
    messages
        .iter()
        .map(|m| {
            Ok(Message {
                id: m.id.clone().filter(|id| !id.is_empty()).unwrap_or_else(generate_id),
                chat_id: String::new(),
                role: m.role,
                parts: convert_parts(&m.parts)?,
                attachments: vec![],
                created_at: now,
            })
        })
        .collect()
}

pub fn validate_chat_id(id: &str) -> Result<(), ChatError> {
    if id.is_empty() || id.chars().count() > MAX_CHAT_ID_CHARS {
        return Err(ChatError::BadRequest("chat id must be 1-128 characters".into()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ChatError::BadRequest("chat id may only contain letters, digits, '-' and '_'".into()));
    }
    Ok(())
}

fn convert_parts(parts: &[InboundPart]) -> Result<Vec<Part>, ChatError> {
    if parts.is_empty() {
        return Err(ChatError::BadRequest("message must have at least one part".into()));
    }
    parts
        .iter()
        .map(|p| match p {
            InboundPart::Text { text } => {
                let len = text.chars().count();
                if len == 0 || len > MAX_TEXT_CHARS {
                    return Err(ChatError::BadRequest("text parts must be 1-2000 characters".into()));
                }
                Ok(Part::text(text.clone()))
            }
            InboundPart::File(raw) => {
                let attachment = attachments::normalize(raw)?;
                check_media_type(&attachment)?;
                Ok(Part::File(attachment))
            }
        })
        .collect()
}

fn check_media_type(a: &Attachment) -> Result<(), ChatError> {
    if is_allowed_media_type(&a.media_type) {
        Ok(())
    } else {
        Err(ChatError::BadRequest(format!("unsupported media type {}", a.media_type)))
    }
}
