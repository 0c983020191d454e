use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::build_info::BuildInfo;
use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Ready once every CronJob and Job subscription finished its initial list.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.sync.all_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub async fn version(State(state): State<AppState>) -> Json<BuildInfo> {
    Json(state.build)
}
