//! `GET /health` liveness endpoint (SPEC_FULL §6), mounted outside
//! `apiRoute`.

use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(rename = "redisConnected")]
    redis_connected: bool,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: u64,
}

/// `{status, redisConnected, uptimeSeconds}` (SPEC_FULL §6).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let redis_connected = state.redis.is_connected().await;
    let body = HealthBody {
        status: if redis_connected { "ok" } else { "degraded" },
        redis_connected,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };
    Json(body)
}
