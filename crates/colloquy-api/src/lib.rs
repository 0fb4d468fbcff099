pub mod attachments;
pub mod chat;
pub mod cleanup;
pub mod entitlements;
pub mod error;
pub mod hub;
pub mod middleware;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod validation;
pub mod writer;

use axum::Router;
use axum::routing::{get, post};

pub use error::ChatError;
pub use state::{AppState, AppStateInner};

/// All routes of the service. Transport layers (tracing, CORS, timeouts) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat::post_chat).delete(chat::delete_chat))
        .route("/api/chat/{id}", get(chat::get_chat))
        .route("/api/chat/{id}/stream", get(chat::resume_stream))
        .route("/api/completion", post(chat::post_completion))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_identity,
        ))
        .route("/health", get(chat::health))
        .with_state(state)
}
