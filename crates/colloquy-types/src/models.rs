use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fresh opaque identifier for messages and stream records.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Where an attachment's bytes live. Serialized as a single `url` or `data` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// Dereferenceable remote location.
    Url(String),
    /// Base64-encoded bytes, without any `data:` prefix.
    Data(String),
}

/// A normalized file reference. Exactly one payload location, always typed and named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub media_type: String,
    pub filename: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// URL form usable by providers that accept either links or data URIs.
    pub fn to_url(&self) -> String {
        match &self.payload {
            Payload::Url(url) => url.clone(),
            Payload::Data(data) => format!("data:{};base64,{}", self.media_type, data),
        }
    }
}

/// A completed tool round trip, as recorded on assistant messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String },
    Reasoning { text: String },
    File(Attachment),
    Tool(ToolInvocation),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Concatenated text parts, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn file_parts(&self) -> Vec<Attachment> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::File(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
}

/// Plan tier supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Guest,
    Regular,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_part_serializes_flat() {
        let part = Part::File(Attachment {
            media_type: "image/png".into(),
            filename: "cat.png".into(),
            payload: Payload::Url("https://cdn.example/cat.png".into()),
        });
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "file",
                "mediaType": "image/png",
                "filename": "cat.png",
                "url": "https://cdn.example/cat.png"
            })
        );
        let back: Part = serde_json::from_value(json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn inline_payload_becomes_data_uri() {
        let a = Attachment {
            media_type: "application/pdf".into(),
            filename: "a.pdf".into(),
            payload: Payload::Data("JVBERi0=".into()),
        };
        assert_eq!(a.to_url(), "data:application/pdf;base64,JVBERi0=");
        assert!(!a.is_image());
    }

    #[test]
    fn message_text_skips_non_text_parts() {
        let m = Message {
            id: "m".into(),
            chat_id: "c".into(),
            role: Role::Assistant,
            parts: vec![
                Part::text("one"),
                Part::Reasoning { text: "hidden".into() },
                Part::text("two"),
            ],
            attachments: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(m.text(), "one\ntwo");
    }
}
