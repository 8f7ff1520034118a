//! Fixed-window rate limiting middleware (spec §4.6).
//!
//! Invoked as the first global middleware when enabled. The window is keyed
//! by `floor(nowMs / windowMs)`, so every identifier gets a fresh counter at
//! a deterministic boundary rather than a rolling lookback. Falls back to an
//! in-memory store, carried over from the teacher's design, when Redis is
//! unavailable.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::redis_pool::{RedisPool, RedisPoolError};

/// Outcome of a rate-limit check, attached to the connection/response so the
/// HTTP layer can emit `X-RateLimit-*` headers (spec §4.6, §6).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// The limit that applied to this request.
    pub limit: u32,
    /// Requests remaining in the current window after this one.
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryEntry {
    window_index: u64,
    count: u32,
}

type InMemoryStore = Arc<RwLock<HashMap<String, MemoryEntry>>>;

/// Fixed-window limiter backed by Redis `INCR`/`EXPIRE`, with an in-memory
/// fallback for when Redis is unreachable.
#[derive(Clone)]
pub struct RateLimit {
    config: RateLimitConfig,
    redis: Option<RedisPool>,
    in_memory_store: InMemoryStore,
}

impl RateLimit {
    /// Build a limiter from `config`, optionally backed by `redis`.
    #[must_use]
    pub fn new(config: RateLimitConfig, redis: Option<RedisPool>) -> Self {
        Self {
            config,
            redis,
            in_memory_store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `axum::middleware::from_fn_with_state` entry point.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] if the identifier has exhausted
    /// its quota for the current window.
    pub async fn middleware(
        State(rate_limit): State<Self>,
        request: Request,
        next: Next,
    ) -> Result<Response, RateLimitError> {
        if !rate_limit.config.enabled {
            return Ok(next.run(request).await);
        }

        let user_id: Option<i64> = request.extensions().get::<i64>().copied();
        let ip_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let identifier = user_id.map_or_else(
            || format!("ip:{}", ip_addr.as_deref().unwrap_or("unknown")),
            |uid| format!("user:{uid}"),
        );
        let limit = if user_id.is_some() {
            rate_limit.config.auth_limit
        } else {
            rate_limit.config.unauth_limit
        };

        let decision = rate_limit.check(&identifier, limit).await?;

        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", v);
        }
        if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", v);
        }
        if let Ok(v) = HeaderValue::from_str(&decision.reset_at_ms.to_string()) {
            headers.insert("X-RateLimit-Reset", v);
        }
        Ok(response)
    }

    /// Run the fixed-window check for `identifier`, returning the decision
    /// on success or [`RateLimitError::Exceeded`] once `limit` is crossed.
    ///
    /// # Errors
    ///
    /// Propagates [`RateLimitError::Exceeded`] when the window's count
    /// exceeds `limit`. Redis failures fall back to the in-memory store
    /// rather than erroring.
    pub async fn check(&self, identifier: &str, limit: u32) -> Result<RateLimitDecision, RateLimitError> {
        let now_ms = now_ms();
        let window_index = now_ms / self.config.window_ms;
        let key = format!("{}:{identifier}:{window_index}", self.config.key_prefix);
        let reset_at_ms = (window_index + 1) * self.config.window_ms;

        let count = match &self.redis {
            Some(redis) => match self.incr_redis(redis, &key).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, key = %key, "redis rate limit check failed, falling back to in-memory");
                    self.incr_memory(&key, window_index)
                }
            },
            None => self.incr_memory(&key, window_index),
        };

        if count > limit {
            let retry_after = reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1);
            return Err(RateLimitError::Exceeded {
                limit,
                retry_after_secs: retry_after,
            });
        }

        Ok(RateLimitDecision {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_ms,
        })
    }

    async fn incr_redis(&self, redis: &RedisPool, key: &str) -> Result<u32, RedisPoolError> {
        let mut conn = redis.get().await?;
        let count: u32 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(RedisPoolError::from)?;
        if count == 1 {
            let ttl_secs = i64::try_from(2 * self.config.window_ms / 1000).unwrap_or(i64::MAX).max(1);
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(RedisPoolError::from)?;
        }
        Ok(count)
    }

    fn incr_memory(&self, key: &str, window_index: u64) -> u32 {
        let mut store = self.in_memory_store.write();
        let entry = store.entry(key.to_string()).or_default();
        if entry.window_index != window_index {
            entry.window_index = window_index;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count
    }
}

fn now_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

/// Errors surfaced by the rate limiter.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The identifier exceeded its quota for the current window.
    #[error("rate limit exceeded: {limit} requests")]
    Exceeded {
        /// The limit that was exceeded.
        limit: u32,
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let Self::Exceeded {
            limit: _,
            retry_after_secs,
        } = self;
        let err = crate::error::ActionError::new(
            crate::error::ErrorKind::ConnectionRateLimited,
            "rate limit exceeded",
        )
        .with_retry_after(retry_after_secs);
        (StatusCode::TOO_MANY_REQUESTS, err).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window_ms: 60_000,
            unauth_limit: 2,
            auth_limit: 5,
            key_prefix: "ratelimit".to_string(),
        }
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimit::new(config(), None);
        assert!(limiter.check("ip:1.2.3.4", 2).await.is_ok());
        assert!(limiter.check("ip:1.2.3.4", 2).await.is_ok());
        let err = limiter.check("ip:1.2.3.4", 2).await.unwrap_err();
        let RateLimitError::Exceeded { retry_after_secs, .. } = err;
        assert!((1..=60).contains(&retry_after_secs));
    }

    #[tokio::test]
    async fn distinct_identifiers_have_independent_windows() {
        let limiter = RateLimit::new(config(), None);
        assert!(limiter.check("ip:1.1.1.1", 1).await.is_ok());
        assert!(limiter.check("ip:2.2.2.2", 1).await.is_ok());
    }
}
