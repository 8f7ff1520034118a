//! The HTTP/WebSocket transport: a single axum listener answering plain
//! HTTP, static files, and WebSocket upgrades alike (spec §4.3).

pub mod health;
pub mod http;
pub mod jobs;
pub mod static_files;
pub mod ws;

use crate::middleware::{
    echo_correlation_id, resolve_identity, CorsLayer, RateLimit, SecurityHeadersConfig, SecurityHeadersLayer,
};
use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;

/// Build the full router: `/health` outside the rate-limit/CORS stack, every
/// other path through the fallback (spec §4.3, SPEC_FULL §6).
#[must_use]
pub fn router(state: AppState) -> Router {
    let rate_limit = RateLimit::new(state.config.rate_limit.clone(), Some(state.redis.clone()));
    let security = SecurityHeadersLayer::new(SecurityHeadersConfig::default());
    let cors = CorsLayer::new(&state.config.web_server.allowed_origins);
    let correlation_id = state.config.correlation_id.clone();

    // `/health` is mounted outside the rate-limit/CORS/correlation-id stack
    // (SPEC_FULL §6): it answers liveness probes that shouldn't be throttled
    // or need CORS headers. Security headers, being an ambient concern, are
    // layered on last so they cover both. Layers wrap in reverse declaration
    // order, so `resolve_identity` (added after `rate_limit`) runs before it
    // on the request path and can price authenticated callers correctly.
    let api = Router::new()
        .route("/jobs/metrics", get(jobs::metrics))
        .route("/jobs/retry-all", post(jobs::retry_all_failed))
        .route("/jobs/failed", delete(jobs::clear_dead_letter_queue))
        .route("/jobs/:id/status", get(jobs::job_status))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .route("/jobs/:id", delete(jobs::cancel_job))
        .fallback(http::fallback)
        .layer(axum::middleware::from_fn_with_state(rate_limit, RateLimit::middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), resolve_identity))
        .layer(axum::middleware::from_fn_with_state(correlation_id, echo_correlation_id))
        .layer(cors);

    Router::new()
        .route("/health", get(health::health))
        .merge(api)
        .layer(security)
        .with_state(state)
}

/// Bind and serve `router` on `config.web_server.{host,port}` until
/// `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the address cannot be parsed or bound.
pub async fn serve(state: AppState, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
    let (host, port) = (&state.config.web_server.host, state.config.web_server.port);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "web server listening");

    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
