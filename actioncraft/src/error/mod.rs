//! The typed error taxonomy shared by every transport.
//!
//! Every error that can escape the dispatcher carries an [`ErrorKind`] drawn
//! from a fixed set. The kind determines the HTTP status code, the
//! WebSocket error frame shape, and whether a stack trace is attached.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

/// The fixed set of error kinds from which every dispatch failure is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Lifecycle failed to initialize.
    ServerInitialization,
    /// Lifecycle failed to start.
    ServerStart,
    /// Lifecycle failed to stop cleanly.
    ServerStop,
    /// Invalid configuration at startup.
    ConfigError,
    /// An initializer violated a registration-time invariant.
    InitializerValidation,
    /// An action violated a registration-time invariant.
    ActionValidation,
    /// A task/job definition violated a registration-time invariant.
    TaskValidation,
    /// The connection has no session, or the session lacks required data.
    SessionNotFound,
    /// The requested action name or route has no registered action.
    ActionNotFound,
    /// A required parameter was missing.
    ActionParamRequired,
    /// A parameter failed schema validation.
    ActionParamValidation,
    /// A parameter could not be coerced to its declared type.
    ActionParamFormatting,
    /// The action's `run` threw a non-typed exception.
    ActionRun,
    /// An unrecognized WebSocket `messageType`.
    ConnectionTypeNotFound,
    /// A broadcast or presence operation referenced a channel the
    /// connection never subscribed to.
    ConnectionNotSubscribed,
    /// The channel's authorization middleware or `authorize` rejected the
    /// subscription.
    ConnectionChannelAuthorization,
    /// The rate limiter rejected the request.
    ConnectionRateLimited,
    /// `enqueue` referenced an unknown action.
    ConnectionTaskDefinition,
}

impl ErrorKind {
    /// The HTTP status this kind maps to (spec §7).
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::ServerInitialization
            | Self::ServerStart
            | Self::ServerStop
            | Self::ConfigError
            | Self::InitializerValidation
            | Self::ActionValidation
            | Self::TaskValidation
            | Self::ActionRun
            | Self::ConnectionTaskDefinition => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SessionNotFound | Self::ConnectionChannelAuthorization => {
                StatusCode::UNAUTHORIZED
            }
            Self::ActionNotFound => StatusCode::NOT_FOUND,
            Self::ActionParamRequired
            | Self::ActionParamValidation
            | Self::ActionParamFormatting
            | Self::ConnectionTypeNotFound
            | Self::ConnectionNotSubscribed => StatusCode::NOT_ACCEPTABLE,
            Self::ConnectionRateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// The wire name used in `{error: {type: "..."}}` payloads.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ServerInitialization => "SERVER_INITIALIZATION",
            Self::ServerStart => "SERVER_START",
            Self::ServerStop => "SERVER_STOP",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InitializerValidation => "INITIALIZER_VALIDATION",
            Self::ActionValidation => "ACTION_VALIDATION",
            Self::TaskValidation => "TASK_VALIDATION",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ActionNotFound => "ACTION_NOT_FOUND",
            Self::ActionParamRequired => "ACTION_PARAM_REQUIRED",
            Self::ActionParamValidation => "ACTION_PARAM_VALIDATION",
            Self::ActionParamFormatting => "ACTION_PARAM_FORMATTING",
            Self::ActionRun => "ACTION_RUN",
            Self::ConnectionTypeNotFound => "CONNECTION_TYPE_NOT_FOUND",
            Self::ConnectionNotSubscribed => "CONNECTION_NOT_SUBSCRIBED",
            Self::ConnectionChannelAuthorization => "CONNECTION_CHANNEL_AUTHORIZATION",
            Self::ConnectionRateLimited => "CONNECTION_RATE_LIMITED",
            Self::ConnectionTaskDefinition => "CONNECTION_TASK_DEFINITION",
        }
    }
}

/// A typed dispatch error.
///
/// Bubbles through the middleware chain untouched; the transport layer is
/// the only thing that serializes it (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ActionError {
    /// The fixed error kind this error was raised with.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Offending field name, for parameter errors.
    pub key: Option<String>,
    /// Offending value, redacted to `[[secret]]` if the field is secret.
    pub value: Option<Value>,
    /// Stack, only populated when `includeStackInErrors` is set.
    pub stack: Option<String>,
    /// `Retry-After` seconds, only populated for `ConnectionRateLimited`.
    pub retry_after: Option<u64>,
}

impl ActionError {
    /// Construct a bare error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            key: None,
            value: None,
            stack: None,
            retry_after: None,
        }
    }

    /// Attach an offending parameter key/value pair.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.key = Some(key.into());
        self.value = Some(value);
        self
    }

    /// Attach a `Retry-After` hint (seconds).
    #[must_use]
    pub const fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Attach a captured stack. Only rendered in the response body when the
    /// caller separately passes `include_stack = true`.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Wrap an arbitrary error as `ACTION_RUN`, preserving its debug
    /// representation as the stack (spec §4.1 step 9).
    pub fn wrap_run_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(ErrorKind::ActionRun, err.to_string()).with_stack(format!("{err:?}"))
    }

    /// Render the `{message, type, timestamp, key?, value?, stack?}` body.
    #[must_use]
    pub fn to_json(&self, include_stack: bool) -> Value {
        let mut body = json!({
            "message": self.message,
            "type": self.kind.wire_name(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let obj = body.as_object_mut().expect("object literal");
        if let Some(key) = &self.key {
            obj.insert("key".to_string(), json!(key));
        }
        if let Some(value) = &self.value {
            obj.insert("value".to_string(), value.clone());
        }
        if include_stack {
            if let Some(stack) = &self.stack {
                obj.insert("stack".to_string(), json!(stack));
            }
        }
        body
    }

    /// Render the `{error: {...}}` envelope used by both HTTP and WebSocket
    /// transports (spec §6).
    #[must_use]
    pub fn to_envelope(&self, include_stack: bool) -> Value {
        json!({ "error": self.to_json(include_stack) })
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let mut response = (status, axum::Json(self.to_envelope(false))).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_status_mapping() {
        assert_eq!(ErrorKind::ActionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::SessionNotFound.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorKind::ConnectionRateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorKind::ActionParamRequired.status(),
            StatusCode::NOT_ACCEPTABLE
        );
    }

    #[test]
    fn envelope_redacts_stack_unless_requested() {
        let err = ActionError::new(ErrorKind::ActionRun, "boom").with_stack("at foo.rs:1");
        let hidden = err.to_envelope(false);
        assert!(hidden["error"].get("stack").is_none());
        let shown = err.to_envelope(true);
        assert_eq!(shown["error"]["stack"], "at foo.rs:1");
    }

    #[test]
    fn retry_after_header_set() {
        let err = ActionError::new(ErrorKind::ConnectionRateLimited, "slow down")
            .with_retry_after(7);
        let response = err.into_response();
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
    }
}
