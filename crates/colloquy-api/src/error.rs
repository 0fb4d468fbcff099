//! Structured errors for the chat API.
//!
//! Every failure carries a stable `kind:scope` code that clients map to
//! friendly text. Store failures are logged in full but only a generic message
//! is returned.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use colloquy_types::api::ErrorBody;

use crate::attachments::AttachmentError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed or out-of-schema input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unusable stream resumption request, such as a malformed `Last-Event-ID`.
    #[error("bad stream request: {0}")]
    BadStream(String),

    #[error("no verified identity")]
    Unauthorized,

    /// Identity verified, but the chat belongs to someone else.
    #[error("chat belongs to another user")]
    Forbidden,

    #[error("chat not found")]
    NotFound,

    /// Daily quota for the user's tier is used up.
    #[error("daily message limit reached")]
    RateLimited,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request:api",
            Self::BadStream(_) => "bad_request:stream",
            Self::Unauthorized => "unauthorized:chat",
            Self::Forbidden => "forbidden:chat",
            Self::NotFound => "not_found:chat",
            Self::RateLimited => "rate_limit:chat",
            Self::StoreUnavailable(_) => "offline:chat",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::BadStream(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::BadRequest(reason) | Self::BadStream(reason) => {
                format!("The request couldn't be processed: {reason}")
            }
            Self::Unauthorized => "You need to sign in before continuing.".into(),
            Self::Forbidden => "This chat belongs to another user.".into(),
            Self::NotFound => "The requested chat was not found.".into(),
            Self::RateLimited => {
                "You have exceeded your maximum number of messages for the day. Please try again later."
                    .into()
            }
            Self::StoreUnavailable(_) => {
                "The service is temporarily unavailable. Please try again later.".into()
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match &self {
            Self::StoreUnavailable(e) => error!(error = ?e, code = self.code(), "store unavailable"),
            other => debug!(code = other.code(), "request rejected: {}", other),
        }
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.client_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        ChatError::BadRequest(rejection.body_text())
    }
}

impl From<AttachmentError> for ChatError {
    fn from(e: AttachmentError) -> Self {
        ChatError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ChatError::NotFound,
            StoreError::Unavailable(e) => ChatError::StoreUnavailable(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_are_stable() {
        let cases = [
            (ChatError::BadRequest("x".into()), "bad_request:api", 400),
            (ChatError::BadStream("x".into()), "bad_request:stream", 400),
            (ChatError::Unauthorized, "unauthorized:chat", 401),
            (ChatError::Forbidden, "forbidden:chat", 403),
            (ChatError::NotFound, "not_found:chat", 404),
            (ChatError::RateLimited, "rate_limit:chat", 429),
            (ChatError::StoreUnavailable(anyhow::anyhow!("disk")), "offline:chat", 503),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn store_details_do_not_leak() {
        let err = ChatError::StoreUnavailable(anyhow::anyhow!("/var/lib/colloquy.db is locked"));
        assert!(!err.client_message().contains("/var/lib"));
    }
}
