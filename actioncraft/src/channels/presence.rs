//! Presence bookkeeping: local membership counts plus the shared Redis
//! representation used to detect join/leave transitions (spec §3, §4.4).

use crate::redis_pool::{RedisPool, RedisPoolError};
use parking_lot::RwLock;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn shared_set_key(channel: &str) -> String {
    format!("presence:{channel}")
}

fn expiry_key(channel: &str, key: &str) -> String {
    format!("presence:{channel}:{key}")
}

/// Meta-set of every channel name a presence key has ever been joined on,
/// so the sweep (spec §4.4 "reconciliation") knows which `presence:<channel>`
/// sets to scan without needing a fixed channel-name list.
const CHANNELS_SET_KEY: &str = "presence:channels";

/// Whether a presence operation caused a join/leave transition the owning
/// channel owes a broadcast for (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The set transitioned from empty to non-empty.
    Join,
    /// The set transitioned from non-empty to empty.
    Leave,
    /// No transition; no broadcast is owed.
    Unchanged,
}

/// Local `(channel, key) → connection ids` membership, plus the shared
/// Redis side of presence (spec §3 PresenceEntry, §4.4).
#[derive(Clone)]
pub struct PresenceTracker {
    local: Arc<RwLock<HashMap<(String, String), HashSet<Uuid>>>>,
    process_id: Arc<str>,
}

impl PresenceTracker {
    /// A tracker attributing every shared expiry entry it writes to
    /// `process_id` (normally the configured process name).
    #[must_use]
    pub fn new(process_id: impl Into<Arc<str>>) -> Self {
        Self {
            local: Arc::default(),
            process_id: process_id.into(),
        }
    }

    /// Join `key` on `channel` for `connection_id`: updates the local map,
    /// `SADD`s the shared set, and refreshes the per-key expiry entry.
    /// Returns [`PresenceEvent::Join`] iff this was the key's first holder.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn join(
        &self,
        redis: &RedisPool,
        channel: &str,
        key: &str,
        connection_id: Uuid,
        ttl_secs: u64,
    ) -> Result<PresenceEvent, RedisPoolError> {
        let became_first = {
            let mut local = self.local.write();
            let set = local.entry((channel.to_string(), key.to_string())).or_default();
            let was_empty = set.is_empty();
            set.insert(connection_id);
            was_empty
        };

        let mut conn = redis.get().await?;
        let _: () = conn.sadd(CHANNELS_SET_KEY, channel).await?;
        let _: () = conn.sadd(shared_set_key(channel), key).await?;
        let _: () = conn.set_ex(expiry_key(channel, key), self.process_id.as_ref(), ttl_secs).await?;

        Ok(if became_first { PresenceEvent::Join } else { PresenceEvent::Unchanged })
    }

    /// Leave `key` on `channel` for `connection_id`. Returns
    /// [`PresenceEvent::Leave`] iff this removed the key's last holder, in
    /// which case the shared set entry and expiry key are also removed.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn leave(
        &self,
        redis: &RedisPool,
        channel: &str,
        key: &str,
        connection_id: Uuid,
    ) -> Result<PresenceEvent, RedisPoolError> {
        let became_empty = {
            let mut local = self.local.write();
            let entry_key = (channel.to_string(), key.to_string());
            let Some(set) = local.get_mut(&entry_key) else {
                return Ok(PresenceEvent::Unchanged);
            };
            set.remove(&connection_id);
            let became_empty = set.is_empty();
            if became_empty {
                local.remove(&entry_key);
            }
            became_empty
        };

        if became_empty {
            let mut conn = redis.get().await?;
            let _: () = conn.srem(shared_set_key(channel), key).await?;
            let _: () = conn.del(expiry_key(channel, key)).await?;
            Ok(PresenceEvent::Leave)
        } else {
            Ok(PresenceEvent::Unchanged)
        }
    }

    /// Every key in the shared presence set for `channel` (spec §4.4
    /// `members(channel)`).
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn members(&self, redis: &RedisPool, channel: &str) -> Result<Vec<String>, RedisPoolError> {
        let mut conn = redis.get().await?;
        Ok(conn.smembers(shared_set_key(channel)).await?)
    }

    /// Refresh the expiry entry for every `(channel, key)` this process
    /// still locally holds at least one connection for (spec §4.4
    /// heartbeat). Returns the number of entries refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn heartbeat(&self, redis: &RedisPool, ttl_secs: u64) -> Result<usize, RedisPoolError> {
        let owned: Vec<(String, String)> = self
            .local
            .read()
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(entry_key, _)| entry_key.clone())
            .collect();
        let mut conn = redis.get().await?;
        for (channel, key) in &owned {
            let _: () = conn.set_ex(expiry_key(channel, key), self.process_id.as_ref(), ttl_secs).await?;
        }
        Ok(owned.len())
    }

    /// Reconcile `channel`'s shared set against its per-key expiry entries:
    /// any key whose expiry entry has lapsed (its owning process never
    /// refreshed it, e.g. it crashed without unsubscribing) is removed from
    /// the shared set. Returns the keys that were reconciled away, each
    /// owing a `leave` broadcast (spec §4.4 "reconciles the shared set by
    /// removing keys whose expiry entry is gone").
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn sweep_channel(&self, redis: &RedisPool, channel: &str) -> Result<Vec<String>, RedisPoolError> {
        let mut conn = redis.get().await?;
        let members: Vec<String> = conn.smembers(shared_set_key(channel)).await?;
        let mut stale = Vec::new();
        for key in members {
            let alive: bool = conn.exists(expiry_key(channel, &key)).await?;
            if !alive {
                let _: () = conn.srem(shared_set_key(channel), &key).await?;
                stale.push(key);
            }
        }
        Ok(stale)
    }

    /// Sweep every channel that has ever had a presence key joined on it
    /// (spec §4.4 scheduled sweep), returning every `(channel, key)` pair
    /// reconciled away.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError`] on connection failure.
    pub async fn sweep_all(&self, redis: &RedisPool) -> Result<Vec<(String, String)>, RedisPoolError> {
        let channels: Vec<String> = {
            let mut conn = redis.get().await?;
            conn.smembers(CHANNELS_SET_KEY).await?
        };
        let mut stale = Vec::new();
        for channel in channels {
            for key in self.sweep_channel(redis, &channel).await? {
                stale.push((channel.clone(), key));
            }
        }
        Ok(stale)
    }

    /// Remove `connection_id` from every `(channel, key)` it holds locally,
    /// returning the pairs whose set became empty (each owes a `leave`
    /// broadcast) — used on WebSocket close (spec §3 Connection destruction
    /// invariant: "destruction removes it ... from all presence tables").
    pub fn drop_connection(&self, connection_id: Uuid) -> Vec<(String, String)> {
        let mut emptied = Vec::new();
        let mut local = self.local.write();
        local.retain(|entry_key, set| {
            set.remove(&connection_id);
            if set.is_empty() {
                emptied.push(entry_key.clone());
                false
            } else {
                true
            }
        });
        emptied
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Runs the heartbeat timer, refreshing every owned presence expiry entry
/// every `interval` until `shutdown` fires (spec §4.4).
pub async fn run_heartbeat(
    presence: PresenceTracker,
    redis: RedisPool,
    interval: Duration,
    ttl_secs: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match presence.heartbeat(&redis, ttl_secs).await {
                    Ok(count) => tracing::debug!(keys = count, "refreshed presence heartbeat"),
                    Err(err) => tracing::warn!(error = %err, "presence heartbeat failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Runs the sweep timer every `interval` until `shutdown` fires, broadcasting
/// a `leave` event for every key a sweep pass reconciles away (spec §4.4).
pub async fn run_sweep(
    presence: PresenceTracker,
    redis: RedisPool,
    process_name_prefix: String,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match presence.sweep_all(&redis).await {
                    Ok(stale) => {
                        for (channel, key) in stale {
                            let payload = serde_json::json!({ "event": "leave", "presenceKey": key });
                            if let Err(err) =
                                crate::pubsub::broadcast(&redis, &process_name_prefix, &channel, payload, "presence").await
                            {
                                tracing::warn!(error = %err, channel = %channel, "failed to broadcast presence sweep leave");
                            }
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "presence sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::redis_pool::test_support::pool_for_tests;

    #[tokio::test(flavor = "multi_thread")]
    async fn join_reports_event_only_on_first_holder() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping join_reports_event_only_on_first_holder: no Redis reachable");
            return;
        };
        let tracker = PresenceTracker::new("proc-join");
        let channel = format!("test-{}", Uuid::new_v4());
        let key = "user-1";

        let first = tracker.join(&redis, &channel, key, Uuid::new_v4(), 30).await.expect("join");
        assert_eq!(first, PresenceEvent::Join);

        let second = tracker.join(&redis, &channel, key, Uuid::new_v4(), 30).await.expect("join");
        assert_eq!(second, PresenceEvent::Unchanged);

        let members = tracker.members(&redis, &channel).await.expect("members");
        assert_eq!(members, vec![key.to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn leave_reports_event_only_on_last_holder() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping leave_reports_event_only_on_last_holder: no Redis reachable");
            return;
        };
        let tracker = PresenceTracker::new("proc-leave");
        let channel = format!("test-{}", Uuid::new_v4());
        let key = "user-1";
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.join(&redis, &channel, key, a, 30).await.expect("join a");
        tracker.join(&redis, &channel, key, b, 30).await.expect("join b");

        assert_eq!(tracker.leave(&redis, &channel, key, a).await.expect("leave a"), PresenceEvent::Unchanged);
        assert_eq!(tracker.leave(&redis, &channel, key, b).await.expect("leave b"), PresenceEvent::Leave);
        assert!(tracker.members(&redis, &channel).await.expect("members").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_reconciles_keys_whose_expiry_entry_lapsed() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping sweep_reconciles_keys_whose_expiry_entry_lapsed: no Redis reachable");
            return;
        };
        let tracker = PresenceTracker::new("proc-sweep");
        let channel = format!("test-{}", Uuid::new_v4());
        let key = "stale-user";

        // Join with a presence key, then delete the expiry entry directly
        // (simulating a crashed process that never unsubscribed), leaving
        // the shared set entry orphaned until the sweep reconciles it.
        tracker.join(&redis, &channel, key, Uuid::new_v4(), 30).await.expect("join");
        {
            let mut conn = redis.get().await.expect("conn");
            let _: () = redis::AsyncCommands::del(&mut conn, expiry_key(&channel, key)).await.expect("del");
        }

        let stale = tracker.sweep_channel(&redis, &channel).await.expect("sweep");
        assert_eq!(stale, vec![key.to_string()]);
        assert!(tracker.members(&redis, &channel).await.expect("members").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_all_covers_every_channel_a_key_has_joined() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping sweep_all_covers_every_channel_a_key_has_joined: no Redis reachable");
            return;
        };
        let tracker = PresenceTracker::new("proc-sweep-all");
        let channel = format!("test-{}", Uuid::new_v4());
        tracker.join(&redis, &channel, "k1", Uuid::new_v4(), 30).await.expect("join");
        {
            let mut conn = redis.get().await.expect("conn");
            let _: () = redis::AsyncCommands::del(&mut conn, expiry_key(&channel, "k1")).await.expect("del");
        }

        let stale = tracker.sweep_all(&redis).await.expect("sweep all");
        assert!(stale.contains(&(channel, "k1".to_string())));
    }

    #[test]
    fn drop_connection_reports_emptied_keys_only() {
        let tracker = PresenceTracker::new("proc-1");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        tracker
            .local
            .write()
            .entry(("messages".to_string(), "k1".to_string()))
            .or_default()
            .extend([a, b]);
        tracker
            .local
            .write()
            .entry(("messages".to_string(), "k2".to_string()))
            .or_default()
            .insert(a);

        let emptied = tracker.drop_connection(a);
        assert_eq!(emptied, vec![("messages".to_string(), "k2".to_string())]);
        assert!(tracker.local.read().contains_key(&("messages".to_string(), "k1".to_string())));
    }
}
