use std::sync::Arc;
use std::time::Duration;

use crate::orchestrator::TurnOrchestrator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub orchestrator: TurnOrchestrator,
    pub jwt_secret: String,
    /// Wall-clock ceiling of one streamed response body.
    pub max_duration: Duration,
}
