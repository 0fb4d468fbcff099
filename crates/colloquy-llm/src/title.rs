use std::sync::Arc;

use tracing::warn;

use crate::provider::{ContentPart, LanguageModel, ModelMessage, ModelRequest};

const TITLE_SYSTEM: &str = "\
- you will generate a short title based on the first message a user begins a conversation with
- ensure it is not more than 80 characters long
- the title should be a summary of the user's message
- do not use quotes or colons";

pub const MAX_TITLE_CHARS: usize = 80;

/// Names a new chat from its first user message.
#[derive(Clone)]
pub struct TitleGenerator {
    model: Arc<dyn LanguageModel>,
}

impl TitleGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Model-written title; falls back to the message text itself if the model fails.
    pub async fn generate(&self, first_message: &str) -> String {
        let request = ModelRequest {
            system: TITLE_SYSTEM.to_string(),
            messages: vec![ModelMessage::User(vec![ContentPart::Text(first_message.to_string())])],
            tools: vec![],
        };

        match self.model.complete(request).await {
            Ok(title) => {
                let cleaned = clean_title(&title);
                if cleaned.is_empty() {
                    fallback_title(first_message)
                } else {
                    cleaned
                }
            }
            Err(e) => {
                warn!(error = %e, "title generation failed, using message text");
                fallback_title(first_message)
            }
        }
    }
}

fn clean_title(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let trimmed = line.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    truncate_chars(trimmed.replace(':', "").trim(), MAX_TITLE_CHARS)
}

pub fn fallback_title(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New chat".to_string();
    }
    truncate_chars(&collapsed, MAX_TITLE_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_quotes_and_colons() {
        assert_eq!(clean_title("\"Greeting: hello\"\n"), "Greeting hello");
    }

    #[test]
    fn fallback_collapses_whitespace_and_truncates() {
        assert_eq!(fallback_title("  Hello \n world "), "Hello world");
        assert_eq!(fallback_title(""), "New chat");
        assert_eq!(fallback_title(&"x".repeat(200)).chars().count(), MAX_TITLE_CHARS);
    }
}
