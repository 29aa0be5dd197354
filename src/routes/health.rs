//! Health and server-info endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Server info response
#[derive(Debug, Serialize)]
pub struct ServerInfoResponse {
    pub server: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub snapshot: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub healthy: bool,
    pub message: String,
}

/// GET /healthz
///
/// Basic health check - returns 200 if the server is running
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /serverinfo
pub async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        server: state.server_info.to_string(),
    })
}

/// GET /ready
///
/// Ready once a snapshot has been fetched
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let snapshot = match state.cache.current() {
        Some(current) => CheckStatus {
            healthy: true,
            message: format!(
                "{} bytes fetched at {}",
                current.data.len(),
                current.fetched_at.to_rfc3339()
            ),
        },
        None => CheckStatus {
            healthy: false,
            message: format!("No snapshot from {} yet", state.cache.uri()),
        },
    };

    let (status, status_code) = if snapshot.healthy {
        ("ready", StatusCode::OK)
    } else {
        ("not_ready", StatusCode::SERVICE_UNAVAILABLE)
    };
    (status_code, Json(ReadinessResponse { status, snapshot }))
}
