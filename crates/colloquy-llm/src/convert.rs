use colloquy_types::models::{Attachment, Message, Part, Role};

use crate::provider::{ContentPart, ModelMessage, ToolCallRequest};

/// Convert stored conversation history into provider-shaped messages.
///
/// Assistant messages are split at tool invocations: the text produced before a
/// batch of tool calls becomes the assistant turn that requested them, followed
/// by one tool turn per result.
pub fn to_model_messages(history: &[Message]) -> Vec<ModelMessage> {
    let mut out = Vec::with_capacity(history.len());
    for message in history {
        match message.role {
            Role::User => {
                let content = user_content(message);
                if !content.is_empty() {
                    out.push(ModelMessage::User(content));
                }
            }
            Role::Assistant => push_assistant(&mut out, message),
        }
    }
    out
}

fn user_content(message: &Message) -> Vec<ContentPart> {
    let mut content = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text { text } => content.push(ContentPart::Text(text.clone())),
            Part::File(a) => content.push(file_content(a)),
            Part::Reasoning { .. } | Part::Tool(_) => {}
        }
    }
    // Attachments sent outside the parts list (legacy clients) still reach the model.
    for a in &message.attachments {
        let in_parts = message.parts.iter().any(|p| matches!(p, Part::File(f) if f == a));
        if !in_parts {
            content.push(file_content(a));
        }
    }
    content
}

fn file_content(a: &Attachment) -> ContentPart {
    if a.is_image() {
        ContentPart::Image { url: a.to_url() }
    } else {
        ContentPart::File {
            filename: a.filename.clone(),
            data_url: a.to_url(),
        }
    }
}

fn push_assistant(out: &mut Vec<ModelMessage>, message: &Message) {
    let mut text = String::new();
    let mut calls: Vec<ToolCallRequest> = Vec::new();
    let mut results: Vec<ModelMessage> = Vec::new();

    for part in &message.parts {
        match part {
            Part::Text { text: t } => {
                flush_calls(out, &mut text, &mut calls, &mut results);
                text.push_str(t);
            }
            Part::Tool(inv) => {
                calls.push(ToolCallRequest {
                    id: inv.tool_call_id.clone(),
                    name: inv.tool_name.clone(),
                    arguments: inv.input.clone(),
                });
                results.push(ModelMessage::Tool {
                    call_id: inv.tool_call_id.clone(),
                    content: inv.output.to_string(),
                });
            }
            Part::Reasoning { .. } | Part::File(_) => {}
        }
    }

    flush_calls(out, &mut text, &mut calls, &mut results);
    if !text.is_empty() {
        out.push(ModelMessage::Assistant {
            text: Some(text),
            tool_calls: vec![],
        });
    }
}

fn flush_calls(
    out: &mut Vec<ModelMessage>,
    text: &mut String,
    calls: &mut Vec<ToolCallRequest>,
    results: &mut Vec<ModelMessage>,
) {
    if calls.is_empty() {
        return;
    }
    out.push(ModelMessage::Assistant {
        text: (!text.is_empty()).then(|| std::mem::take(text)),
        tool_calls: std::mem::take(calls),
    });
    out.append(results);
}
