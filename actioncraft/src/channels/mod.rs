//! Channel registry: subscribe/unsubscribe authorization plus presence
//! bookkeeping (spec §3, §4.4).

pub mod presence;

use crate::connection::Connection;
use crate::error::{ActionError, ErrorKind};
use crate::redis_pool::{RedisPool, RedisPoolError};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

pub use presence::{PresenceEvent, PresenceTracker};

/// Hook run before a subscribe, mirroring the action middleware shape but
/// keyed on the channel name rather than validated params (spec §4.4
/// "Authorization").
#[async_trait]
pub trait ChannelMiddleware: Send + Sync {
    /// Name, used only for logging/ordering diagnostics.
    fn name(&self) -> &str;

    /// Run before the subscribe is authorized. Any `Err` aborts it.
    async fn run_before(&self, _channel: &str, _connection: &Connection) -> Result<(), ActionError> {
        Ok(())
    }

    /// Run after an unsubscribe. Errors are logged, not raised (spec §4.4).
    async fn run_after(&self, _channel: &str, _connection: &Connection) {}
}

/// Per-channel authorization, run after middleware on subscribe (spec §4.4).
#[async_trait]
pub trait Authorize: Send + Sync {
    /// Decide whether `connection` may subscribe to `channel`.
    async fn authorize(&self, channel: &str, connection: &Connection) -> Result<(), ActionError>;
}

fn default_presence_key(connection: &Connection) -> String {
    connection.id.to_string()
}

/// The name pattern a channel matches against (spec §3: "exact string or
/// regex pattern").
#[derive(Clone)]
enum ChannelPattern {
    Exact(String),
    Regex(Regex),
}

impl ChannelPattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Regex(re) => re.is_match(name),
        }
    }
}

/// A channel definition (spec §3 Channel, §4.4).
#[derive(Clone)]
pub struct Channel {
    pattern: ChannelPattern,
    description: &'static str,
    middleware: Vec<Arc<dyn ChannelMiddleware>>,
    authorize: Option<Arc<dyn Authorize>>,
    presence_key: Arc<dyn Fn(&Connection) -> String + Send + Sync>,
}

impl Channel {
    /// A channel matching the exact name `name`.
    #[must_use]
    pub fn exact(name: impl Into<String>, description: &'static str) -> Self {
        Self {
            pattern: ChannelPattern::Exact(name.into()),
            description,
            middleware: Vec::new(),
            authorize: None,
            presence_key: Arc::new(default_presence_key),
        }
    }

    /// A channel matching any name `regex` matches (spec §3: "regex
    /// pattern").
    #[must_use]
    pub fn pattern(regex: Regex, description: &'static str) -> Self {
        Self {
            pattern: ChannelPattern::Regex(regex),
            description,
            middleware: Vec::new(),
            authorize: None,
            presence_key: Arc::new(default_presence_key),
        }
    }

    /// Append a subscribe-time middleware, run in registration order.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn ChannelMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Set the authorization check run after middleware (spec §4.4).
    #[must_use]
    pub fn with_authorize(mut self, authorize: Arc<dyn Authorize>) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Override the default `presenceKey` (connection id).
    #[must_use]
    pub fn with_presence_key(mut self, f: impl Fn(&Connection) -> String + Send + Sync + 'static) -> Self {
        self.presence_key = Arc::new(f);
        self
    }

    /// This channel's description.
    #[must_use]
    pub const fn description(&self) -> &str {
        self.description
    }

    /// The presence key `connection` resolves to on this channel.
    #[must_use]
    pub fn presence_key(&self, connection: &Connection) -> String {
        (self.presence_key)(connection)
    }

    async fn run_subscribe_hooks(&self, name: &str, connection: &Connection) -> Result<(), ActionError> {
        for middleware in &self.middleware {
            middleware.run_before(name, connection).await?;
        }
        if let Some(authorize) = &self.authorize {
            authorize
                .authorize(name, connection)
                .await
                .map_err(|err| ActionError::new(ErrorKind::ConnectionChannelAuthorization, err.message))?;
        }
        Ok(())
    }

    async fn run_unsubscribe_hooks(&self, name: &str, connection: &Connection) {
        for middleware in &self.middleware {
            middleware.run_after(name, connection).await;
        }
    }
}

/// Builds a [`ChannelRegistry`] from a fixed set of channel definitions,
/// loaded at startup (spec §4.4 "Channel registry").
#[derive(Default)]
pub struct ChannelRegistryBuilder {
    channels: Vec<Channel>,
}

impl ChannelRegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel`.
    #[must_use]
    pub fn register(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Finish building, attributing presence heartbeats to `process_id`.
    #[must_use]
    pub fn build(self, process_id: impl Into<Arc<str>>) -> ChannelRegistry {
        ChannelRegistry {
            channels: Arc::new(self.channels),
            presence: PresenceTracker::new(process_id),
        }
    }
}

/// Every channel definition plus the process's presence bookkeeping (spec
/// §3, §4.4).
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Vec<Channel>>,
    /// Local + shared presence membership for every channel.
    pub presence: PresenceTracker,
}

impl ChannelRegistry {
    /// Find the first matching channel definition: exact-name matches are
    /// tried before regex patterns (spec §4.4 `findChannel`). Absence of a
    /// definition means the channel is "open" (spec §4.4).
    #[must_use]
    pub fn find_channel(&self, name: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|ch| matches!(ch.pattern, ChannelPattern::Exact(_)) && ch.pattern.matches(name))
            .or_else(|| self.channels.iter().find(|ch| matches!(ch.pattern, ChannelPattern::Regex(_)) && ch.pattern.matches(name)))
    }

    /// Subscribe `connection` to `channel_name`: runs authorization (open
    /// channels skip straight to presence), records the subscription, and
    /// tracks presence, broadcasting a `join` event iff this was the key's
    /// first local holder (spec §4.4).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConnectionChannelAuthorization`] if a
    /// middleware or the channel's `authorize` rejects the subscription.
    pub async fn subscribe(
        &self,
        redis: &RedisPool,
        process_name_prefix: &str,
        presence_ttl_secs: u64,
        connection: &mut Connection,
        channel_name: &str,
    ) -> Result<(), ActionError> {
        let definition = self.find_channel(channel_name);
        if let Some(channel) = definition {
            channel.run_subscribe_hooks(channel_name, connection).await?;
        }
        connection.subscriptions.insert(channel_name.to_string());

        let key = definition.map_or_else(|| default_presence_key(connection), |channel| channel.presence_key(connection));
        let event = self
            .presence
            .join(redis, channel_name, &key, connection.id, presence_ttl_secs)
            .await
            .map_err(|err| ActionError::new(ErrorKind::ActionRun, err.to_string()))?;

        if event == PresenceEvent::Join {
            let payload = serde_json::json!({ "event": "join", "presenceKey": key });
            if let Err(err) = crate::pubsub::broadcast(redis, process_name_prefix, channel_name, payload, "presence").await {
                tracing::warn!(error = %err, channel = %channel_name, "failed to broadcast presence join");
            }
        }
        Ok(())
    }

    /// Unsubscribe `connection` from `channel_name`: removes the
    /// subscription, runs `runAfter` hooks (errors logged, not raised), and
    /// tracks presence, broadcasting a `leave` event iff this removed the
    /// key's last local holder (spec §4.4).
    pub async fn unsubscribe(
        &self,
        redis: &RedisPool,
        process_name_prefix: &str,
        connection: &mut Connection,
        channel_name: &str,
    ) {
        connection.subscriptions.remove(channel_name);
        let definition = self.find_channel(channel_name);
        if let Some(channel) = definition {
            channel.run_unsubscribe_hooks(channel_name, connection).await;
        }

        let key = definition.map_or_else(|| default_presence_key(connection), |channel| channel.presence_key(connection));
        match self.presence.leave(redis, channel_name, &key, connection.id).await {
            Ok(PresenceEvent::Leave) => {
                let payload = serde_json::json!({ "event": "leave", "presenceKey": key });
                if let Err(err) = crate::pubsub::broadcast(redis, process_name_prefix, channel_name, payload, "presence").await {
                    tracing::warn!(error = %err, channel = %channel_name, "failed to broadcast presence leave");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, channel = %channel_name, "presence leave failed"),
        }
    }

    /// `members(channel)` — spec §4.4. Unknown channels simply have an
    /// empty shared set.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn members(&self, redis: &RedisPool, channel_name: &str) -> Result<Vec<String>, RedisPoolError> {
        self.presence.members(redis, channel_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_overlapping_regex() {
        let registry = ChannelRegistryBuilder::new()
            .register(Channel::pattern(Regex::new("^messages$").unwrap(), "regex form"))
            .register(Channel::exact("messages", "exact form"))
            .build("test-process");
        let found = registry.find_channel("messages").expect("present");
        assert_eq!(found.description(), "exact form");
    }

    #[test]
    fn unknown_channel_has_no_definition() {
        let registry = ChannelRegistryBuilder::new().build("test-process");
        assert!(registry.find_channel("anything").is_none());
    }

    #[test]
    fn default_presence_key_is_connection_id() {
        let conn = Connection::new(crate::connection::ConnectionType::WebSocket, "127.0.0.1", uuid::Uuid::nil());
        assert_eq!(default_presence_key(&conn), uuid::Uuid::nil().to_string());
    }
}
