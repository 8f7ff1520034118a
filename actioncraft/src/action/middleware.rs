//! Middleware hooks run before and after an action's `run` (spec §4.1 steps
//! 5, 7).
//!
//! Each hook returns an explicit sum type rather than mutating in/out
//! parameters (Design Notes §9): `Pass` leaves params/response untouched,
//! `ReplaceParams`/`ReplaceResponse` substitute them for the rest of the
//! chain.

use crate::connection::Connection;
use crate::error::ActionError;
use async_trait::async_trait;
use serde_json::Value;

/// What a middleware hook decided to do.
#[derive(Debug, Clone)]
pub enum MiddlewareOutcome {
    /// Leave params or response as they are.
    Pass,
    /// Substitute the params seen by the rest of the `runBefore` chain and
    /// by the action itself.
    ReplaceParams(Value),
    /// Substitute the response seen by the rest of the `runAfter` chain.
    ReplaceResponse(Value),
}

/// Global or per-action middleware.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name, used only for logging/ordering diagnostics.
    fn name(&self) -> &str;

    /// Run before the action. Any `Err` aborts dispatch (spec §4.1 step 5).
    async fn run_before(
        &self,
        _params: &Value,
        _connection: &Connection,
    ) -> Result<MiddlewareOutcome, ActionError> {
        Ok(MiddlewareOutcome::Pass)
    }

    /// Run after the action, in reverse registration order (spec §4.1 step 7).
    async fn run_after(
        &self,
        _response: &Value,
        _connection: &Connection,
    ) -> Result<MiddlewareOutcome, ActionError> {
        Ok(MiddlewareOutcome::Pass)
    }
}

/// Requires `connection.session` to carry a truthy `userId`, failing with
/// `SESSION_NOT_FOUND` otherwise. Grounded on spec §4.2's session middleware
/// contract.
pub struct RequireSession;

#[async_trait]
impl Middleware for RequireSession {
    fn name(&self) -> &str {
        "require_session"
    }

    async fn run_before(
        &self,
        _params: &Value,
        connection: &Connection,
    ) -> Result<MiddlewareOutcome, ActionError> {
        let authenticated = connection
            .session
            .as_ref()
            .is_some_and(crate::session::Session::has_truthy_user_id);
        if authenticated {
            Ok(MiddlewareOutcome::Pass)
        } else {
            Err(ActionError::new(
                crate::error::ErrorKind::SessionNotFound,
                "this action requires an authenticated session",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionType;
    use crate::session::Session;
    use uuid::Uuid;

    #[tokio::test]
    async fn require_session_rejects_anonymous_connection() {
        let conn = Connection::new(ConnectionType::Web, "127.0.0.1", Uuid::new_v4());
        let err = RequireSession
            .run_before(&Value::Null, &conn)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn require_session_passes_with_user_id() {
        let mut conn = Connection::new(ConnectionType::Web, "127.0.0.1", Uuid::new_v4());
        let mut session = Session::new(conn.id, "__session");
        session.data = serde_json::json!({ "userId": 1 });
        conn.session = Some(session);
        assert!(matches!(
            RequireSession.run_before(&Value::Null, &conn).await,
            Ok(MiddlewareOutcome::Pass)
        ));
    }
}
