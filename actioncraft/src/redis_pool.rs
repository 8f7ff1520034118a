//! Two long-lived Redis connections: one for commands, one for
//! subscriptions (spec §3, §5).
//!
//! The command side is a `deadpool_redis::Pool`, safe for concurrent use
//! from any number of tasks. The subscriber side is a single
//! `redis::aio::PubSub` driven from one dedicated receiver task
//! ([`crate::pubsub::Bus::run`]); nothing else touches it.

use deadpool_redis::{Config, Runtime};
use redis::AsyncCommands;

/// Errors constructing or using the Redis pool.
#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    /// Failed to build the connection pool from the configured URL.
    #[error("failed to build redis pool: {0}")]
    PoolBuild(#[from] deadpool_redis::CreatePoolError),
    /// Failed to check out a pooled connection.
    #[error("failed to acquire redis connection: {0}")]
    Checkout(#[from] deadpool_redis::PoolError),
    /// The underlying `redis` client returned an error.
    #[error("redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}

/// Shared command-connection pool plus the ability to open dedicated
/// subscriber connections.
#[derive(Clone)]
pub struct RedisPool {
    pool: deadpool_redis::Pool,
    url: String,
}

impl RedisPool {
    /// Build a pool against `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::PoolBuild`] if the pool cannot be
    /// constructed (e.g. the URL is malformed).
    pub fn connect(redis_url: &str) -> Result<Self, RedisPoolError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self {
            pool,
            url: redis_url.to_string(),
        })
    }

    /// Check out a pooled command connection.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::Checkout`] if the pool is exhausted or the
    /// connection is unhealthy.
    pub async fn get(&self) -> Result<deadpool_redis::Connection, RedisPoolError> {
        Ok(self.pool.get().await?)
    }

    /// Open a fresh, unpooled connection dedicated to `SUBSCRIBE`.
    ///
    /// Per spec §5, the subscriber connection is used from a single
    /// receiver task; pooling it would risk handing the same connection to
    /// two different subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::Command`] if the connection cannot be
    /// opened.
    pub async fn open_subscriber(&self) -> Result<redis::aio::PubSub, RedisPoolError> {
        let client = redis::Client::open(self.url.as_str())?;
        Ok(client.get_async_pubsub().await?)
    }

    /// `true` if the pool can currently produce a working connection; used
    /// by the `/health` liveness endpoint (SPEC_FULL §6).
    pub async fn is_connected(&self) -> bool {
        let Ok(mut conn) = self.get().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Thin helpers layered over [`RedisPool`] for the `SET ... NX EX` lock
/// pattern used by the scheduler and recurring-task locking (spec §4.5).
pub struct RedisLock;

impl RedisLock {
    /// Attempt to acquire `key` for `ttl_secs` seconds. Returns `true` iff
    /// this call won the lock.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::Command`] on connection failure.
    pub async fn try_acquire(
        pool: &RedisPool,
        key: &str,
        token: &str,
        ttl_secs: u64,
    ) -> Result<bool, RedisPoolError> {
        let mut conn = pool.get().await?;
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(acquired)
    }

    /// Release `key` iff it is still held by `token` (compare-and-delete via
    /// a small Lua script, so we never release a lock another process has
    /// since acquired).
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::Command`] on connection failure.
    pub async fn release(pool: &RedisPool, key: &str, token: &str) -> Result<(), RedisPoolError> {
        let mut conn = pool.get().await?;
        const SCRIPT: &str = r"
            if redis.call('get', KEYS[1]) == ARGV[1] then
                return redis.call('del', KEYS[1])
            else
                return 0
            end
        ";
        redis::Script::new(SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Convenience `GET` returning `None` on missing key.
pub(crate) async fn get_string(
    conn: &mut deadpool_redis::Connection,
    key: &str,
) -> Result<Option<String>, RedisPoolError> {
    Ok(conn.get(key).await?)
}

/// Test-only helper shared by every module whose tests need a real Redis
/// (queues, fan-out, scheduler locks, presence, pub/sub): builds a pool
/// against `TEST_REDIS_URL` (same db-15-scratch convention as
/// [`crate::testing::TestApp`]), returning `None` if nothing answers so
/// callers can skip rather than fail in an environment with no Redis.
#[cfg(test)]
pub(crate) mod test_support {
    use super::RedisPool;

    pub(crate) async fn pool_for_tests() -> Option<RedisPool> {
        let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
        let pool = RedisPool::connect(&url).ok()?;
        pool.is_connected().await.then_some(pool)
    }
}
