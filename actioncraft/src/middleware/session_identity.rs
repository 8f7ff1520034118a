//! Resolves the caller's session before rate limiting runs (spec §4.6:
//! "identifier is `user:<id>` when the session carries one, `ip:<addr>`
//! otherwise").
//!
//! [`RateLimit::middleware`](super::RateLimit::middleware) reads a plain
//! `i64` request extension rather than touching the session store itself, so
//! it stays agnostic to where that id came from. This layer is the only
//! thing that writes it, and it must run before the limiter on the request
//! path — see the layering order in `server::router`.

use crate::state::AppState;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

/// `axum::middleware::from_fn_with_state` entry point.
pub async fn resolve_identity(
    State(state): State<AppState>,
    cookies: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let cookie_name = state.sessions.cookie_name();
    let connection_id = cookies.get(cookie_name).and_then(|c| Uuid::parse_str(c.value()).ok());

    if let Some(connection_id) = connection_id {
        if let Ok(Some(session)) = state.sessions.load(connection_id).await {
            if let Some(user_id) = session.user_id() {
                request.extensions_mut().insert(user_id);
            }
        }
    }

    next.run(request).await
}
