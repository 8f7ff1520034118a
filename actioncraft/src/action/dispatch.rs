//! The dispatch contract: `act(connection, actionName, rawParams) →
//! {response, error}` (spec §4.1).
//!
//! This function deliberately does not carry a `#[tracing::instrument]`
//! attribute — that macro would capture `raw_params` as a span field before
//! the redaction pass in [`log_outcome`] runs, leaking secret values into
//! every log line the span touches.

use super::middleware::MiddlewareOutcome;
use super::registry::Action;
use super::schema::{coerce_and_validate, FieldError};
use crate::connection::Connection;
use crate::error::{ActionError, ErrorKind};
use crate::state::AppState;
use serde_json::{Map, Value};
use std::time::Instant;

/// Everything the dispatcher needs beyond the action name and params.
#[derive(Clone)]
pub struct DispatchContext {
    /// Shared application state (registry, session store, redis, ...).
    pub state: AppState,
    /// The connection this dispatch is running on behalf of.
    pub connection: Connection,
}

/// Dispatch `action_name` with `raw_params` against `ctx`, running the full
/// pipeline: lookup, session load-or-create, validation, middleware,
/// execution, and structured logging (spec §4.1 steps 1-9).
///
/// `ctx` is taken by mutable reference because step 2 hydrates
/// `ctx.connection.session` in place: callers that hold a connection across
/// multiple dispatches (the WebSocket frame loop, the registry entry an HTTP
/// request is briefly parked under) must read `ctx.connection` back out
/// afterward rather than keep using the pre-dispatch clone.
///
/// # Errors
///
/// Returns the typed [`ActionError`] from whichever step failed.
pub async fn act(ctx: &mut DispatchContext, action_name: &str, raw_params: Value) -> Result<Value, ActionError> {
    let started = Instant::now();
    let method = format!("{:?}", ctx.connection.transport);
    let identifier = ctx.connection.peer_identifier.clone();

    // Step 1: lookup. Resolved first so a failed lookup can still log with a
    // best-effort redaction (no schema to consult yet).
    let Some(action) = ctx.state.actions.get(action_name) else {
        let err = ActionError::new(ErrorKind::ActionNotFound, format!("no action named {action_name}"));
        log_outcome(action_name, started.elapsed(), &method, &identifier, None, &raw_params, false);
        return Err(err);
    };

    let result = run(ctx, action.as_ref(), raw_params.clone()).await;
    log_outcome(
        action_name,
        started.elapsed(),
        &method,
        &identifier,
        Some(action.as_ref()),
        &raw_params,
        result.is_ok(),
    );
    result
}

async fn run(ctx: &mut DispatchContext, action: &dyn Action, raw_params: Value) -> Result<Value, ActionError> {
    // Step 2: lazily load (or create) the session, once per connection,
    // written back onto `ctx.connection` rather than a discarded clone.
    ensure_session(&ctx.state, &mut ctx.connection).await?;
    let connection = ctx.connection.clone();

    // Step 4: validate/coerce against the action's schema.
    let validated = validate(action, &raw_params)?;

    // Step 5: global then per-action `runBefore`, in order.
    let mut params = validated;
    for middleware in ctx.state.global_middleware.iter().chain(action.middleware().iter()) {
        match middleware.run_before(&params, &connection).await? {
            MiddlewareOutcome::Pass => {}
            MiddlewareOutcome::ReplaceParams(replacement) => params = replacement,
            MiddlewareOutcome::ReplaceResponse(_) => {}
        }
    }

    // Step 6: execute. Non-typed panics are out of scope to catch here;
    // `Action::run` always returns a typed `ActionError` (wrapped as
    // `ACTION_RUN` by the implementation itself when it bridges a foreign
    // error type, per step 9).
    let mut response = action.run(params, &connection).await?;

    // Step 7: per-action then global `runAfter`, in reverse order.
    for middleware in action.middleware().iter().rev().chain(ctx.state.global_middleware.iter().rev()) {
        match middleware.run_after(&response, &connection).await? {
            MiddlewareOutcome::Pass => {}
            MiddlewareOutcome::ReplaceResponse(replacement) => response = replacement,
            MiddlewareOutcome::ReplaceParams(_) => {}
        }
    }

    Ok(response)
}

/// Load (or create) `connection`'s session in place, once per connection.
/// Public within the crate so transports that hold a connection across
/// multiple dispatches can hydrate it before touching anything
/// session-derived outside of [`act`] (subscribe/unsubscribe's presence key,
/// for instance).
///
/// # Errors
///
/// Returns [`ActionError`] if the session store cannot be reached.
pub(crate) async fn ensure_session(state: &AppState, connection: &mut Connection) -> Result<(), ActionError> {
    if connection.session.is_some() {
        return Ok(());
    }
    let loaded = state
        .sessions
        .load(connection.id)
        .await
        .map_err(|err| ActionError::new(ErrorKind::ActionRun, err.to_string()))?;
    connection.session = Some(match loaded {
        Some(session) => session,
        None => state
            .sessions
            .create(connection.id, Value::Object(Map::new()))
            .await
            .map_err(|err| ActionError::new(ErrorKind::ActionRun, err.to_string()))?,
    });
    Ok(())
}

fn validate(action: &dyn Action, raw_params: &Value) -> Result<Value, ActionError> {
    let raw_map = raw_params.as_object();
    let mut validated = Map::new();
    for (name, schema) in action.schema() {
        let raw_value = raw_map.and_then(|m| m.get(*name));
        match coerce_and_validate(schema, raw_value) {
            Ok(value) => {
                validated.insert((*name).to_string(), value);
            }
            Err(FieldError::Missing) => {
                return Err(ActionError::new(
                    ErrorKind::ActionParamRequired,
                    format!("missing required parameter: {name}"),
                )
                .with_param(*name, Value::Null));
            }
            Err(FieldError::Invalid(message)) => {
                let logged_value = if schema.is_secret() {
                    Value::String("[[secret]]".to_string())
                } else {
                    raw_value.cloned().unwrap_or(Value::Null)
                };
                return Err(ActionError::new(ErrorKind::ActionParamValidation, message)
                    .with_param(*name, logged_value));
            }
        }
    }
    Ok(Value::Object(validated))
}

/// Redact every field the action's schema marks `.secret()` to the literal
/// `[[secret]]`, and collapse file-like fields (an object carrying `name`,
/// `type`, `size` keys) to just that triple (spec §4.1 step 8).
fn sanitize_for_log(action: &dyn Action, params: &Value) -> Value {
    let Some(map) = params.as_object() else {
        return params.clone();
    };
    let secret_fields: std::collections::HashSet<&str> = action
        .schema()
        .iter()
        .filter(|(_, schema)| schema.is_secret())
        .map(|(name, _)| *name)
        .collect();
    let mut sanitized = Map::new();
    for (key, value) in map {
        if secret_fields.contains(key.as_str()) {
            sanitized.insert(key.clone(), Value::String("[[secret]]".to_string()));
        } else if is_file_like(value) {
            sanitized.insert(key.clone(), file_summary(value));
        } else {
            sanitized.insert(key.clone(), value.clone());
        }
    }
    Value::Object(sanitized)
}

fn is_file_like(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        obj.contains_key("name") && obj.contains_key("type") && obj.contains_key("size")
    })
}

fn file_summary(value: &Value) -> Value {
    let obj = value.as_object().expect("checked by is_file_like");
    serde_json::json!({
        "name": obj.get("name"),
        "type": obj.get("type"),
        "size": obj.get("size"),
    })
}

/// Best-effort redaction applied when no action was resolved (lookup
/// failure): falls back to conventionally-named secret fields since there is
/// no schema to consult yet.
fn redact_unknown(raw_params: &Value) -> Value {
    const CONVENTIONAL_SECRET_NAMES: &[&str] = &["password", "token", "secret", "apiKey", "api_key"];
    let Some(map) = raw_params.as_object() else {
        return raw_params.clone();
    };
    let mut sanitized = Map::new();
    for (key, value) in map {
        if CONVENTIONAL_SECRET_NAMES.contains(&key.as_str()) {
            sanitized.insert(key.clone(), Value::String("[[secret]]".to_string()));
        } else {
            sanitized.insert(key.clone(), value.clone());
        }
    }
    Value::Object(sanitized)
}

#[allow(clippy::too_many_arguments)]
fn log_outcome(
    action_name: &str,
    duration: std::time::Duration,
    method: &str,
    identifier: &str,
    action: Option<&dyn Action>,
    raw_params: &Value,
    ok: bool,
) {
    let duration_ms = duration.as_millis();
    let status = if ok { "OK" } else { "ERROR" };
    let sanitized = action.map_or_else(|| redact_unknown(raw_params), |a| sanitize_for_log(a, raw_params));
    tracing::info!(
        status,
        action = action_name,
        duration_ms = %duration_ms,
        method,
        identifier,
        params = %sanitized,
        "[ACTION:{}] {} ({}ms) [{}] {}",
        status,
        action_name,
        duration_ms,
        method,
        identifier,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::schema::ParamSchema;

    struct StubAction {
        schema: Vec<(&'static str, ParamSchema)>,
    }

    #[async_trait::async_trait]
    impl Action for StubAction {
        fn name(&self) -> &str {
            "stub"
        }

        fn schema(&self) -> &[(&'static str, ParamSchema)] {
            &self.schema
        }

        async fn run(&self, params: Value, _connection: &Connection) -> Result<Value, ActionError> {
            Ok(params)
        }
    }

    #[test]
    fn sanitize_for_log_redacts_secret_fields() {
        let action = StubAction {
            schema: vec![("password", ParamSchema::string().secret())],
        };
        let params = serde_json::json!({ "password": "hunter2", "name": "mario" });
        let sanitized = sanitize_for_log(&action, &params);
        assert_eq!(sanitized["password"], serde_json::json!("[[secret]]"));
        assert_eq!(sanitized["name"], serde_json::json!("mario"));
    }

    #[test]
    fn sanitize_for_log_collapses_file_fields() {
        let action = StubAction { schema: vec![] };
        let params = serde_json::json!({
            "avatar": { "name": "a.png", "type": "image/png", "size": 100, "bytes": [1,2,3] }
        });
        let sanitized = sanitize_for_log(&action, &params);
        assert!(sanitized["avatar"].get("bytes").is_none());
        assert_eq!(sanitized["avatar"]["name"], serde_json::json!("a.png"));
    }
}
