//! Redis-backed broadcast bus: one subscriber connection per process,
//! fanned out to every locally-subscribed connection (spec §4.4, §5).

use crate::connection::ConnectionRegistry;
use crate::redis_pool::{RedisPool, RedisPoolError};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Envelope carried on the shared Redis channel (spec §4.4 "Transport").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    /// Channel name the message was broadcast on.
    pub channel: String,
    /// Arbitrary message payload.
    pub message: serde_json::Value,
    /// Attribution, e.g. `"presence"` for join/leave events.
    pub sender: String,
}

fn redis_channel(process_name_prefix: &str) -> String {
    format!("keryx:pubsub:{process_name_prefix}")
}

/// Publish `message` on `channel`, attributed to `sender` (spec §4.4
/// `broadcast(channel, message, sender)`).
///
/// # Errors
///
/// Returns [`RedisPoolError`] on connection failure.
pub async fn broadcast(
    redis: &RedisPool,
    process_name_prefix: &str,
    channel: &str,
    message: serde_json::Value,
    sender: &str,
) -> Result<(), RedisPoolError> {
    let envelope = BroadcastEnvelope {
        channel: channel.to_string(),
        message,
        sender: sender.to_string(),
    };
    let payload = serde_json::to_string(&envelope).expect("envelope is always serializable");
    let mut conn = redis.get().await?;
    let _: () = redis::AsyncCommands::publish(&mut conn, redis_channel(process_name_prefix), payload).await?;
    Ok(())
}

/// Per-connection outbound delivery. Each WebSocket handler task registers
/// the receiving half here on connect and unregisters it on close, so the
/// bus can push broadcast frames to it without knowing about the socket.
#[derive(Clone, Default)]
pub struct OutboundRegistry {
    senders: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<serde_json::Value>>>>,
}

impl OutboundRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection_id`, returning the receiving half the
    /// WebSocket handler task should poll alongside inbound frames.
    pub fn register(&self, connection_id: Uuid) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.write().insert(connection_id, tx);
        rx
    }

    /// Deregister `connection_id` on connection close.
    pub fn unregister(&self, connection_id: Uuid) {
        self.senders.write().remove(&connection_id);
    }

    /// Best-effort delivery to `connection_id`; silently dropped if the
    /// connection has already closed.
    pub fn send_to(&self, connection_id: Uuid, message: serde_json::Value) {
        if let Some(tx) = self.senders.read().get(&connection_id) {
            let _ = tx.send(message);
        }
    }
}

/// Drives the single subscriber connection: one process-wide receiver loop
/// fanning every broadcast out to locally-subscribed connections (spec §4.4
/// "Broadcast contract").
pub struct Bus {
    redis: RedisPool,
    process_name_prefix: String,
    connections: ConnectionRegistry,
    outbound: OutboundRegistry,
}

impl Bus {
    /// Construct a bus against `redis`'s subscriber connection, delivering
    /// to whichever connections in `connections` are currently subscribed.
    #[must_use]
    pub const fn new(
        redis: RedisPool,
        process_name_prefix: String,
        connections: ConnectionRegistry,
        outbound: OutboundRegistry,
    ) -> Self {
        Self {
            redis,
            process_name_prefix,
            connections,
            outbound,
        }
    }

    /// Runs until `shutdown` fires, reconnecting the subscriber connection
    /// on transient failure.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let channel = redis_channel(&self.process_name_prefix);
        loop {
            if *shutdown.borrow() {
                return;
            }
            let mut pubsub = match self.redis.open_subscriber().await {
                Ok(pubsub) => pubsub,
                Err(err) => {
                    warn!(error = %err, "failed to open pubsub subscriber connection, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if let Err(err) = pubsub.subscribe(&channel).await {
                warn!(error = %err, channel = %channel, "failed to subscribe to broadcast channel, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    message = stream.next() => {
                        let Some(message) = message else { break };
                        self.deliver(&message).await;
                    }
                }
            }
        }
    }

    async fn deliver(&self, message: &redis::Msg) {
        let Ok(payload) = message.get_payload::<String>() else {
            return;
        };
        let Ok(envelope) = serde_json::from_str::<BroadcastEnvelope>(&payload) else {
            warn!("discarding malformed broadcast envelope");
            return;
        };
        debug!(channel = %envelope.channel, sender = %envelope.sender, "delivering broadcast");
        for connection in self.connections.subscribers_of(&envelope.channel) {
            self.outbound.send_to(connection.id, serde_json::json!({ "message": envelope.message }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionType};
    use crate::redis_pool::test_support::pool_for_tests;

    #[test]
    fn send_to_unregistered_connection_is_a_silent_no_op() {
        let registry = OutboundRegistry::new();
        registry.send_to(Uuid::new_v4(), serde_json::json!({ "hello": "world" }));
    }

    #[test]
    fn registered_connection_receives_what_was_sent() {
        let registry = OutboundRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);

        registry.send_to(id, serde_json::json!({ "n": 1 }));
        assert_eq!(rx.try_recv().expect("message"), serde_json::json!({ "n": 1 }));
    }

    #[test]
    fn unregister_stops_further_delivery() {
        let registry = OutboundRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);
        registry.unregister(id);

        registry.send_to(id, serde_json::json!({ "n": 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn broadcast_is_delivered_to_every_subscribed_connection() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping broadcast_is_delivered_to_every_subscribed_connection: no Redis reachable");
            return;
        };

        let prefix = format!("test-{}", Uuid::new_v4());
        let channel = "messages";

        let connections = ConnectionRegistry::new();
        let outbound = OutboundRegistry::new();
        let mut connection = Connection::new(ConnectionType::WebSocket, "127.0.0.1", Uuid::new_v4());
        connection.subscriptions.insert(channel.to_string());
        let connection_id = connection.id;
        connections.insert(connection);
        let mut rx = outbound.register(connection_id);

        let bus = Bus::new(redis.clone(), prefix.clone(), connections, outbound);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let bus_task = tokio::spawn(bus.run(shutdown_rx));

        // Give the subscriber loop a moment to open its connection and
        // subscribe before publishing, since `broadcast` doesn't wait for a
        // subscriber to exist.
        tokio::time::sleep(Duration::from_millis(200)).await;
        broadcast(&redis, &prefix, channel, serde_json::json!({ "body": "hi" }), "test")
            .await
            .expect("broadcast");

        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed");
        assert_eq!(delivered, serde_json::json!({ "message": { "body": "hi" } }));

        bus_task.abort();
    }
}
