//! Per-connection session records, persisted in Redis (spec §3, §4.2).
//!
//! A [`Session`] is value-typed: it carries its own id and data, and a
//! [`crate::connection::Connection`] holds an `Option<Session>` rather than
//! a pointer back into a shared table. This breaks the cycle the source's
//! connection/session pair forms (Design Notes §9).

use crate::redis_pool::{RedisPool, RedisPoolError};
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A session record, keyed by its originating connection id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Equal to the originating `Connection`'s id.
    pub id: Uuid,
    /// Cookie name this session is bound to.
    pub cookie_name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Arbitrary data mapping (e.g. `userId`).
    pub data: Value,
}

impl Session {
    /// Construct a fresh, empty session for `connection_id`.
    #[must_use]
    pub fn new(connection_id: Uuid, cookie_name: impl Into<String>) -> Self {
        Self {
            id: connection_id,
            cookie_name: cookie_name.into(),
            created_at: Utc::now(),
            data: Value::Object(serde_json::Map::new()),
        }
    }

    /// Typed view over `data.userId`, without losing the flexibility of the
    /// opaque map underneath (Design Notes §9).
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.data.get("userId").and_then(Value::as_i64)
    }

    /// `true` iff `data.userId` is a truthy value (spec §4.2 session
    /// middleware contract).
    #[must_use]
    pub fn has_truthy_user_id(&self) -> bool {
        match self.data.get("userId") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_none_or(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    fn redis_key(id: Uuid) -> String {
        format!("session:{id}")
    }
}

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying Redis pool failed.
    #[error(transparent)]
    Redis(#[from] RedisPoolError),
    /// A stored session record could not be deserialized.
    #[error("corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Create/load/update/destroy session records keyed by connection id, with
/// TTL renewal on every load or update (spec §4.2).
#[derive(Clone)]
pub struct SessionStore {
    redis: RedisPool,
    ttl_secs: u64,
    cookie_name: String,
}

impl SessionStore {
    /// Construct a store backed by `redis`, with the given TTL and cookie
    /// name (both normally sourced from [`crate::config::SessionConfig`]).
    #[must_use]
    pub const fn new(redis: RedisPool, ttl_secs: u64, cookie_name: String) -> Self {
        Self {
            redis,
            ttl_secs,
            cookie_name,
        }
    }

    /// Store `{id, cookieName, createdAt, data}` at `session:<id>` with
    /// `EX = ttl_secs`. Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Redis`] if the write fails.
    pub async fn create(&self, connection_id: Uuid, data: Value) -> Result<Session, SessionError> {
        let mut session = Session::new(connection_id, self.cookie_name.clone());
        session.data = data;
        self.write(&session).await?;
        Ok(session)
    }

    /// Load the session for `connection_id`, refreshing its TTL on a hit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Redis`] on connection failure, or
    /// [`SessionError::Corrupt`] if the stored JSON cannot be parsed.
    pub async fn load(&self, connection_id: Uuid) -> Result<Option<Session>, SessionError> {
        let mut conn = self.redis.get().await?;
        let key = Session::redis_key(connection_id);
        let raw: Option<String> = conn.get(&key).await.map_err(RedisPoolError::from)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&raw)?;
        let _: () = conn
            .expire(&key, self.ttl_secs_i64())
            .await
            .map_err(RedisPoolError::from)?;
        Ok(Some(session))
    }

    /// Merge `patch` into `session.data` (patch keys overwrite), rewrite the
    /// record, and refresh its TTL. Returns the merged data.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Redis`] if the write fails.
    pub async fn update(&self, session: &mut Session, patch: Value) -> Result<Value, SessionError> {
        merge_json(&mut session.data, patch);
        self.write(session).await?;
        Ok(session.data.clone())
    }

    /// Delete the session for `connection_id`. Returns `true` iff a key
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Redis`] if the delete fails.
    pub async fn destroy(&self, connection_id: Uuid) -> Result<bool, SessionError> {
        let mut conn = self.redis.get().await?;
        let removed: u64 = conn
            .del(Session::redis_key(connection_id))
            .await
            .map_err(RedisPoolError::from)?;
        Ok(removed > 0)
    }

    /// The cookie name sessions in this store are bound to.
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// The configured TTL, in seconds.
    #[must_use]
    pub const fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        let mut conn = self.redis.get().await?;
        let raw = serde_json::to_string(session)?;
        let _: () = conn
            .set_ex(Session::redis_key(session.id), raw, self.ttl_secs)
            .await
            .map_err(RedisPoolError::from)?;
        Ok(())
    }

    fn ttl_secs_i64(&self) -> i64 {
        i64::try_from(self.ttl_secs).unwrap_or(i64::MAX)
    }
}

fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                base_map.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_user_id_variants() {
        let mut session = Session::new(Uuid::new_v4(), "__session");
        assert!(!session.has_truthy_user_id());

        session.data = serde_json::json!({ "userId": 0 });
        assert!(!session.has_truthy_user_id());

        session.data = serde_json::json!({ "userId": 42 });
        assert!(session.has_truthy_user_id());
        assert_eq!(session.user_id(), Some(42));

        session.data = serde_json::json!({ "userId": false });
        assert!(!session.has_truthy_user_id());

        session.data = serde_json::json!({ "userId": "" });
        assert!(!session.has_truthy_user_id());
    }

    #[test]
    fn merge_overwrites_patch_keys_only() {
        let mut base = serde_json::json!({ "a": 1, "b": 2 });
        merge_json(&mut base, serde_json::json!({ "b": 3, "c": 4 }));
        assert_eq!(base, serde_json::json!({ "a": 1, "b": 3, "c": 4 }));
    }
}
