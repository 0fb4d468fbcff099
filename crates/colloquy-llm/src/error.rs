use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed provider payload: {0}")]
    Decode(String),

    #[error("provider stream ended unexpectedly")]
    UnexpectedEnd,
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        LlmError::Decode(e.to_string())
    }
}
