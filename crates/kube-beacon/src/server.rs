use axum::Router;
use axum::routing::get;

use crate::build_info::BuildInfo;
use crate::handlers;
use crate::monitor::SyncGroup;

// ============================================================================
// Application State
// ============================================================================

/// Shared state of the health server.
#[derive(Clone, Default)]
pub struct AppState {
    /// Subscriptions that must report synced before `/readyz` passes.
    pub sync: SyncGroup,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(sync: SyncGroup) -> Self {
        Self {
            sync,
            build: BuildInfo::default(),
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
}
