//! Illustrative collaborators exercising every component end to end: a
//! `createUser`/`sendMessage` pair of actions, a `messages` broadcast
//! channel, and a fan-out child job. Not part of the public API (spec
//! Non-goals: "users/messages are illustrative example collaborators"); used
//! only by the `testing` harness and the integration tests under `tests/`.

use crate::action::registry::{Action, HttpMethod, TaskBinding, WebBinding};
use crate::action::schema::ParamSchema;
use crate::channels::{Channel, ChannelRegistryBuilder};
use crate::connection::Connection;
use crate::error::{ActionError, ErrorKind};
use crate::jobs::queue::DEFAULT_QUEUE;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Name of the broadcast channel `sendMessage` publishes to and
/// `fanOutMessages`'s children report into.
pub const MESSAGES_CHANNEL: &str = "messages";

/// `POST /users` — creates a user record in the caller's session, the
/// minimal "user" collaborator from spec §8's scenarios.
pub struct CreateUserAction;

#[async_trait]
impl Action for CreateUserAction {
    fn name(&self) -> &str {
        "createUser"
    }

    fn schema(&self) -> &[(&'static str, ParamSchema)] {
        static SCHEMA: once_cell::sync::Lazy<Vec<(&'static str, ParamSchema)>> =
            once_cell::sync::Lazy::new(|| vec![("name", ParamSchema::string().required().min_length(1))]);
        &SCHEMA
    }

    fn web_binding(&self) -> Option<WebBinding> {
        Some(WebBinding {
            method: HttpMethod::Post,
            route: "/users".to_string(),
        })
    }

    async fn run(&self, params: Value, connection: &Connection) -> Result<Value, ActionError> {
        let name = params["name"].as_str().unwrap_or_default();
        Ok(json!({ "userId": connection.id, "name": name }))
    }
}

/// `POST /messages` — requires a session, broadcasts `{from, body}` to
/// [`MESSAGES_CHANNEL`] (spec §8's "publish reaches every subscriber"
/// scenario).
pub struct SendMessageAction;

#[async_trait]
impl Action for SendMessageAction {
    fn name(&self) -> &str {
        "sendMessage"
    }

    fn schema(&self) -> &[(&'static str, ParamSchema)] {
        static SCHEMA: once_cell::sync::Lazy<Vec<(&'static str, ParamSchema)>> =
            once_cell::sync::Lazy::new(|| vec![("body", ParamSchema::string().required().min_length(1).max_length(4096))]);
        &SCHEMA
    }

    fn web_binding(&self) -> Option<WebBinding> {
        Some(WebBinding {
            method: HttpMethod::Post,
            route: "/messages".to_string(),
        })
    }

    fn middleware(&self) -> Vec<std::sync::Arc<dyn crate::action::middleware::Middleware>> {
        vec![std::sync::Arc::new(crate::action::middleware::RequireSession)]
    }

    async fn run(&self, params: Value, connection: &Connection) -> Result<Value, ActionError> {
        let body = params["body"].as_str().unwrap_or_default();
        Ok(json!({ "from": connection.id, "body": body, "channel": MESSAGES_CHANNEL }))
    }
}

/// A `messages` child job: reports its outcome into the fan-out aggregate
/// named by `_fanOutId` (spec §4.5's fan-out contract).
pub struct ProcessMessageAction;

#[async_trait]
impl Action for ProcessMessageAction {
    fn name(&self) -> &str {
        "processMessage"
    }

    fn schema(&self) -> &[(&'static str, ParamSchema)] {
        static SCHEMA: once_cell::sync::Lazy<Vec<(&'static str, ParamSchema)>> =
            once_cell::sync::Lazy::new(|| vec![("body", ParamSchema::string().required())]);
        &SCHEMA
    }

    fn task_binding(&self) -> Option<TaskBinding> {
        Some(TaskBinding {
            queue: DEFAULT_QUEUE.to_string(),
            frequency: None,
        })
    }

    async fn run(&self, params: Value, _connection: &Connection) -> Result<Value, ActionError> {
        let body = params["body"].as_str().ok_or_else(|| {
            ActionError::new(ErrorKind::ActionParamValidation, "body must be a string")
        })?;
        Ok(json!({ "processed": body.to_uppercase() }))
    }
}

/// The `messages` broadcast channel (spec §3 Channel, §8).
#[must_use]
pub fn messages_channel() -> Channel {
    Channel::exact(MESSAGES_CHANNEL, "broadcasts of sendMessage's output")
}

/// A channel registry carrying only [`messages_channel`], attributed to
/// `process_id`.
#[must_use]
pub fn channel_registry(process_id: &str) -> crate::channels::ChannelRegistry {
    ChannelRegistryBuilder::new().register(messages_channel()).build(process_id.to_string())
}

/// An action registry carrying every demo action.
///
/// # Errors
///
/// Returns an error only if two demo actions were accidentally registered
/// under the same name, which would indicate a bug in this module.
pub fn action_registry() -> Result<crate::action::ActionRegistry, crate::action::registry::RegistryError> {
    let builder = crate::action::ActionRegistryBuilder::new()
        .register(std::sync::Arc::new(CreateUserAction))?
        .register(std::sync::Arc::new(SendMessageAction))?
        .register(std::sync::Arc::new(ProcessMessageAction))?;
    Ok(builder.build())
}
