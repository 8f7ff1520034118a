//! Coordinated enqueue of N child jobs with a shared aggregate status
//! (spec §4.5, §6).

use super::queue::{self, DEFAULT_QUEUE};
use super::{JobError, JobRecord};
use crate::redis_pool::RedisPool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default batch size for child enqueues.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default TTL, in seconds, applied to the aggregate hash and result lists.
pub const DEFAULT_RESULT_TTL_SECS: u64 = 600;

/// Tuning knobs for a single `fan_out` call.
#[derive(Debug, Clone, Copy)]
pub struct FanOutOptions {
    /// Number of child inputs enqueued per batch.
    pub batch_size: usize,
    /// TTL, in seconds, applied to the aggregate's Redis keys.
    pub result_ttl_secs: u64,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
        }
    }
}

/// Outcome of [`fan_out`]: the aggregate id plus any inputs that failed to
/// enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutSummary {
    /// Generated aggregate id.
    pub fan_out_id: Uuid,
    /// Action every child job dispatches.
    pub action_name: String,
    /// Queue every child job was placed on.
    pub queue: String,
    /// Number of inputs successfully enqueued.
    pub enqueued: usize,
    /// Per-item enqueue failures, as `(index, message)` pairs.
    pub errors: Vec<(usize, String)>,
}

/// Current status of a fan-out aggregate, as read back from its hash and
/// result lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutStatus {
    /// Total children registered at creation time.
    pub total: u64,
    /// Children that have reported success.
    pub completed: u64,
    /// Children that have reported failure.
    pub failed: u64,
    /// Successful per-child results, order not significant.
    pub results: Vec<serde_json::Value>,
    /// Failed per-child errors, order not significant.
    pub errors: Vec<serde_json::Value>,
}

fn hash_key(id: Uuid) -> String {
    format!("fanout:{id}")
}

fn results_key(id: Uuid) -> String {
    format!("fanout:{id}:results")
}

fn errors_key(id: Uuid) -> String {
    format!("fanout:{id}:errors")
}

/// Generate an id, register the aggregate hash, and enqueue every input as a
/// child job targeting `action_name`. Each input gets `_fanOutId` injected;
/// per spec Design Notes §9, an input that already carries that key is
/// rejected rather than silently overwritten.
///
/// # Errors
///
/// Returns [`JobError`] if the aggregate bookkeeping itself cannot be
/// written; per-item enqueue failures are collected in the returned summary
/// instead of aborting the whole call.
pub async fn fan_out(
    redis: &RedisPool,
    action_name: &str,
    inputs: Vec<serde_json::Value>,
    queue: Option<&str>,
    opts: FanOutOptions,
) -> Result<FanOutSummary, JobError> {
    let fan_out_id = Uuid::new_v4();
    let queue = queue.unwrap_or(DEFAULT_QUEUE).to_string();
    let total = inputs.len();

    let mut conn = redis.get().await?;
    let _: () = conn
        .hset_multiple(
            hash_key(fan_out_id),
            &[
                ("total", total.to_string()),
                ("completed", "0".to_string()),
                ("failed", "0".to_string()),
                ("actionName", action_name.to_string()),
                ("queue", queue.clone()),
            ],
        )
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;

    let mut enqueued = 0usize;
    let mut errors = Vec::new();

    // Batches are enqueued sequentially in chunks of `batch_size`; each
    // chunk still goes through one record at a time since the underlying
    // Redis command pool has no native pipelined RPUSH-many here.
    let indexed: Vec<(usize, serde_json::Value)> = inputs.into_iter().enumerate().collect();
    for chunk in indexed.chunks(opts.batch_size) {
        for (index, input) in chunk {
            let mut input = input.clone();
            match inject_fan_out_id(&mut input, fan_out_id) {
                Ok(()) => {
                    let record = JobRecord::new(&queue, action_name, input);
                    if let Err(err) = queue::enqueue(redis, &record).await {
                        errors.push((*index, err.to_string()));
                    } else {
                        enqueued += 1;
                    }
                }
                Err(err) => errors.push((*index, err.to_string())),
            }
        }
    }

    for key in [hash_key(fan_out_id), results_key(fan_out_id), errors_key(fan_out_id)] {
        let _: () = conn
            .expire(key, i64::try_from(opts.result_ttl_secs).unwrap_or(i64::MAX))
            .await
            .map_err(crate::redis_pool::RedisPoolError::from)?;
    }

    Ok(FanOutSummary {
        fan_out_id,
        action_name: action_name.to_string(),
        queue,
        enqueued,
        errors,
    })
}

fn inject_fan_out_id(input: &mut serde_json::Value, fan_out_id: Uuid) -> Result<(), JobError> {
    let obj = input
        .as_object_mut()
        .ok_or_else(|| JobError::Serde(serde::de::Error::custom("fan-out input must be a JSON object")))?;
    if obj.contains_key("_fanOutId") {
        return Err(JobError::Serde(serde::de::Error::custom(
            "input already carries _fanOutId",
        )));
    }
    obj.insert("_fanOutId".to_string(), serde_json::json!(fan_out_id));
    Ok(())
}

/// Record a child's successful completion against its aggregate.
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure.
pub async fn record_completion(redis: &RedisPool, fan_out_id: Uuid, result: serde_json::Value) -> Result<(), JobError> {
    let mut conn = redis.get().await?;
    let _: () = conn
        .hincr(hash_key(fan_out_id), "completed", 1)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    let _: () = conn
        .rpush(results_key(fan_out_id), serde_json::to_string(&result)?)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(())
}

/// Record a child's failure against its aggregate.
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure.
pub async fn record_failure(redis: &RedisPool, fan_out_id: Uuid, error: serde_json::Value) -> Result<(), JobError> {
    let mut conn = redis.get().await?;
    let _: () = conn
        .hincr(hash_key(fan_out_id), "failed", 1)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    let _: () = conn
        .rpush(errors_key(fan_out_id), serde_json::to_string(&error)?)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(())
}

/// Read back an aggregate's current status. An unknown id yields zero
/// totals and empty lists (spec §4.5).
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure.
pub async fn fan_out_status(redis: &RedisPool, fan_out_id: Uuid) -> Result<FanOutStatus, JobError> {
    let mut conn = redis.get().await?;
    let total: Option<u64> = conn
        .hget(hash_key(fan_out_id), "total")
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    let completed: u64 = conn
        .hget(hash_key(fan_out_id), "completed")
        .await
        .unwrap_or(Some(0))
        .unwrap_or(0);
    let failed: u64 = conn
        .hget(hash_key(fan_out_id), "failed")
        .await
        .unwrap_or(Some(0))
        .unwrap_or(0);
    let raw_results: Vec<String> = conn
        .lrange(results_key(fan_out_id), 0, -1)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    let raw_errors: Vec<String> = conn
        .lrange(errors_key(fan_out_id), 0, -1)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;

    Ok(FanOutStatus {
        total: total.unwrap_or(0),
        completed,
        failed,
        results: raw_results.iter().filter_map(|s| serde_json::from_str(s).ok()).collect(),
        errors: raw_errors.iter().filter_map(|s| serde_json::from_str(s).ok()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_pool::test_support::pool_for_tests;

    #[test]
    fn inject_fan_out_id_rejects_preexisting_key() {
        let mut input = serde_json::json!({ "_fanOutId": "already-set" });
        assert!(inject_fan_out_id(&mut input, Uuid::new_v4()).is_err());
    }

    #[test]
    fn inject_fan_out_id_rejects_non_object_input() {
        let mut input = serde_json::json!("not an object");
        assert!(inject_fan_out_id(&mut input, Uuid::new_v4()).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fan_out_enqueued_plus_errors_equals_input_count() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping fan_out_enqueued_plus_errors_equals_input_count: no Redis reachable");
            return;
        };
        // One good input, one that already carries `_fanOutId` and so fails
        // to enqueue: the invariant holds regardless of per-item outcome.
        let inputs = vec![
            serde_json::json!({ "body": "a" }),
            serde_json::json!({ "body": "b", "_fanOutId": "collide" }),
        ];
        let summary = fan_out(&redis, "processMessage", inputs.clone(), None, FanOutOptions::default())
            .await
            .expect("fan_out");

        assert_eq!(summary.enqueued + summary.errors.len(), inputs.len());
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].0, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_and_failure_accumulate_into_status() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping completion_and_failure_accumulate_into_status: no Redis reachable");
            return;
        };
        let summary = fan_out(
            &redis,
            "processMessage",
            vec![serde_json::json!({ "body": "a" }), serde_json::json!({ "body": "b" })],
            None,
            FanOutOptions::default(),
        )
        .await
        .expect("fan_out");
        assert_eq!(summary.enqueued, 2);

        record_completion(&redis, summary.fan_out_id, serde_json::json!({ "ok": true })).await.expect("completion");
        record_failure(&redis, summary.fan_out_id, serde_json::json!({ "err": "boom" })).await.expect("failure");

        let status = fan_out_status(&redis, summary.fan_out_id).await.expect("status");
        assert_eq!(status.total, 2);
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.results.len(), 1);
        assert_eq!(status.errors.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_fan_out_id_has_zero_totals() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping unknown_fan_out_id_has_zero_totals: no Redis reachable");
            return;
        };
        let status = fan_out_status(&redis, Uuid::new_v4()).await.expect("status");
        assert_eq!(status.total, 0);
        assert!(status.results.is_empty());
        assert!(status.errors.is_empty());
    }
}
