//! Resque-compatible queue encoding (spec §4.5, §6).

use super::{JobError, JobFailure, JobId, JobRecord};
use crate::redis_pool::RedisPool;
use redis::AsyncCommands;

/// Default queue used when neither the caller nor the action specifies one.
pub const DEFAULT_QUEUE: &str = "default";

const FAILED_KEY: &str = "resque:failed";

fn queue_key(queue: &str) -> String {
    format!("resque:queue:{queue}")
}

/// Push `record` onto `resque:queue:<record.queue>` and register the queue
/// name in `resque:queues`.
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure, or [`JobError::Serde`]
/// if the record cannot be serialized.
pub async fn enqueue(redis: &RedisPool, record: &JobRecord) -> Result<(), JobError> {
    let mut conn = redis.get().await?;
    let payload = serde_json::to_string(record)?;
    let _: () = conn.sadd("resque:queues", &record.queue).await.map_err(crate::redis_pool::RedisPoolError::from)?;
    let _: () = conn
        .rpush(queue_key(&record.queue), payload)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(())
}

/// Block (up to `timeout_secs`) waiting for a job on any of `queues`, in
/// priority order, matching Resque's `BLPOP` worker loop (spec §4.5 step 1).
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure, or [`JobError::Serde`]
/// if the popped payload cannot be decoded.
pub async fn blocking_pop(
    redis: &RedisPool,
    queues: &[String],
    timeout_secs: f64,
) -> Result<Option<JobRecord>, JobError> {
    let mut conn = redis.get().await?;
    let keys: Vec<String> = queues.iter().map(|q| queue_key(q)).collect();
    let popped: Option<(String, String)> = conn
        .blpop(keys, timeout_secs)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    let Some((_key, payload)) = popped else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&payload)?))
}

/// Schedule `record` to move into its queue at `run_at_secs` (epoch seconds),
/// per the `resque:delayed:<ts>` / `resque:delayed_queue_schedule` layout.
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure, or [`JobError::Serde`]
/// if the record cannot be serialized.
pub async fn enqueue_delayed(redis: &RedisPool, record: &JobRecord, run_at_secs: u64) -> Result<(), JobError> {
    let mut conn = redis.get().await?;
    let payload = serde_json::to_string(record)?;
    let bucket = format!("resque:delayed:{run_at_secs}");
    let _: () = conn
        .rpush(&bucket, payload)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    #[allow(clippy::cast_precision_loss)]
    let score = run_at_secs as f64;
    let _: () = conn
        .zadd("resque:delayed_queue_schedule", run_at_secs, score)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(())
}

/// Every delayed bucket whose timestamp is `<= now_secs`, per the scheduler's
/// poll contract (spec §4.5).
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure.
pub async fn due_delayed_buckets(redis: &RedisPool, now_secs: u64) -> Result<Vec<u64>, JobError> {
    let mut conn = redis.get().await?;
    let due: Vec<String> = conn
        .zrangebyscore("resque:delayed_queue_schedule", 0, now_secs)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(due.iter().filter_map(|s| s.parse().ok()).collect())
}

/// Drain bucket `timestamp`, moving every job into its target queue, then
/// remove the bucket's schedule entry.
///
/// # Errors
///
/// Returns [`JobError::Redis`]/[`JobError::Serde`] on failure partway
/// through the drain; already-moved jobs are not rolled back.
pub async fn drain_delayed_bucket(redis: &RedisPool, timestamp: u64) -> Result<usize, JobError> {
    let mut conn = redis.get().await?;
    let bucket = format!("resque:delayed:{timestamp}");
    let mut moved = 0usize;
    loop {
        let popped: Option<String> = conn.lpop(&bucket, None).await.map_err(crate::redis_pool::RedisPoolError::from)?;
        let Some(payload) = popped else { break };
        let record: JobRecord = serde_json::from_str(&payload)?;
        enqueue(redis, &record).await?;
        moved += 1;
    }
    let _: () = conn
        .zrem("resque:delayed_queue_schedule", timestamp)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(moved)
}

/// Record a failure to `resque:failed` (spec §4.5 step 4, §6).
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure, or [`JobError::Serde`]
/// if the failure record cannot be serialized.
pub async fn record_failure(redis: &RedisPool, failure: &JobFailure) -> Result<(), JobError> {
    let mut conn = redis.get().await?;
    let payload = serde_json::to_string(failure)?;
    let _: () = conn
        .rpush(FAILED_KEY, payload)
        .await
        .map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(())
}

/// Retry a single failed job: removes its entry from `resque:failed` and
/// re-enqueues the underlying record with a reset attempt count. `false` if
/// no failure with that id is on the dead letter queue.
///
/// # Errors
///
/// Returns [`JobError::Redis`]/[`JobError::Serde`] on failure.
pub async fn retry_failed_job(redis: &RedisPool, id: JobId) -> Result<bool, JobError> {
    let mut conn = redis.get().await?;
    let entries: Vec<String> = conn.lrange(FAILED_KEY, 0, -1).await.map_err(crate::redis_pool::RedisPoolError::from)?;
    for entry in entries {
        let failure: JobFailure = serde_json::from_str(&entry)?;
        if failure.job.id == id {
            let removed: i64 = conn
                .lrem(FAILED_KEY, 1, &entry)
                .await
                .map_err(crate::redis_pool::RedisPoolError::from)?;
            if removed > 0 {
                enqueue(redis, &failure.job).await?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Retry every job currently on the dead letter queue, draining it in the
/// process. Returns the number of jobs re-enqueued.
///
/// # Errors
///
/// Returns [`JobError::Redis`]/[`JobError::Serde`] on failure partway through
/// the drain; already-retried jobs are not rolled back.
pub async fn retry_all_failed(redis: &RedisPool) -> Result<usize, JobError> {
    let mut conn = redis.get().await?;
    let mut retried = 0usize;
    loop {
        let popped: Option<String> = conn.lpop(FAILED_KEY, None).await.map_err(crate::redis_pool::RedisPoolError::from)?;
        let Some(payload) = popped else { break };
        let failure: JobFailure = serde_json::from_str(&payload)?;
        enqueue(redis, &failure.job).await?;
        retried += 1;
    }
    Ok(retried)
}

/// Permanently discard every job on the dead letter queue. Returns the
/// number of entries cleared.
///
/// # Errors
///
/// Returns [`JobError::Redis`] on connection failure.
pub async fn clear_dead_letter_queue(redis: &RedisPool) -> Result<usize, JobError> {
    let mut conn = redis.get().await?;
    let len: usize = conn.llen(FAILED_KEY).await.map_err(crate::redis_pool::RedisPoolError::from)?;
    let _: () = conn.del(FAILED_KEY).await.map_err(crate::redis_pool::RedisPoolError::from)?;
    Ok(len)
}

/// Cancel a still-queued job by removing it from whichever queue it sits on.
/// `false` if the id is not found on any known queue (already running,
/// already completed, or unknown) — a running job has no interrupt
/// mechanism and cannot be cancelled remotely.
///
/// # Errors
///
/// Returns [`JobError::Redis`]/[`JobError::Serde`] on failure.
pub async fn cancel_queued_job(redis: &RedisPool, id: JobId) -> Result<bool, JobError> {
    let mut conn = redis.get().await?;
    let queues: Vec<String> = conn.smembers("resque:queues").await.map_err(crate::redis_pool::RedisPoolError::from)?;
    for queue in queues {
        let key = queue_key(&queue);
        let entries: Vec<String> = conn.lrange(&key, 0, -1).await.map_err(crate::redis_pool::RedisPoolError::from)?;
        for entry in entries {
            let record: JobRecord = serde_json::from_str(&entry)?;
            if record.id == id {
                let removed: i64 = conn.lrem(&key, 1, &entry).await.map_err(crate::redis_pool::RedisPoolError::from)?;
                if removed > 0 {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Execution lock key for a job-class-plus-argument-hash (first of the
/// three cooperating locks in spec §4.5).
#[must_use]
pub fn execution_lock_key(action_name: &str, args_digest: &str) -> String {
    format!("resque:lock:{action_name}:{args_digest}")
}

/// Queue-level lock key preventing double enqueue of the same recurring
/// job class while one instance is in flight.
#[must_use]
pub fn queue_lock_key(action_name: &str) -> String {
    format!("resque:lock:queue:{action_name}")
}

/// Delayed-queue lock key preventing duplicate future enqueues at the same
/// timestamp for a recurring job.
#[must_use]
pub fn delayed_lock_key(action_name: &str, run_at_secs: u64) -> String {
    format!("resque:lock:delayed:{action_name}:{run_at_secs}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_pool::test_support::pool_for_tests;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn lock_keys_are_distinct_per_namespace() {
        assert_ne!(execution_lock_key("a", "d1"), queue_lock_key("a"));
        assert_ne!(queue_lock_key("a"), delayed_lock_key("a", 1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_then_blocking_pop_round_trips() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping enqueue_then_blocking_pop_round_trips: no Redis reachable");
            return;
        };
        let queue = format!("test-{}", Uuid::new_v4());
        let record = JobRecord::new(&queue, "processMessage", json!({ "body": "hi" }));
        enqueue(&redis, &record).await.expect("enqueue");

        let popped = blocking_pop(&redis, &[queue.clone()], 1.0).await.expect("pop").expect("a job was queued");
        assert_eq!(popped.id, record.id);
        assert_eq!(popped.action_name, "processMessage");

        assert!(blocking_pop(&redis, &[queue], 0.1).await.expect("pop").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_failed_job_requeues_and_removes_from_dead_letter() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping retry_failed_job_requeues_and_removes_from_dead_letter: no Redis reachable");
            return;
        };
        let queue = format!("test-{}", Uuid::new_v4());
        let record = JobRecord::new(&queue, "processMessage", json!({ "body": "hi" }));
        let failure = JobFailure {
            job: record.clone(),
            error: "boom".to_string(),
            failed_at_ms: 0,
        };
        record_failure(&redis, &failure).await.expect("record failure");

        assert!(retry_failed_job(&redis, record.id).await.expect("retry"));
        // Already removed: a second retry for the same id finds nothing.
        assert!(!retry_failed_job(&redis, record.id).await.expect("retry"));

        let requeued = blocking_pop(&redis, &[queue], 1.0).await.expect("pop").expect("requeued job");
        assert_eq!(requeued.id, record.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_all_failed_drains_the_dead_letter_queue() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping retry_all_failed_drains_the_dead_letter_queue: no Redis reachable");
            return;
        };
        let queue = format!("test-{}", Uuid::new_v4());
        for _ in 0..3 {
            let record = JobRecord::new(&queue, "processMessage", json!({}));
            let failure = JobFailure {
                job: record,
                error: "boom".to_string(),
                failed_at_ms: 0,
            };
            record_failure(&redis, &failure).await.expect("record failure");
        }

        let retried = retry_all_failed(&redis).await.expect("retry all");
        assert_eq!(retried, 3);
        assert_eq!(clear_dead_letter_queue(&redis).await.expect("clear"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_dead_letter_queue_discards_everything() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping clear_dead_letter_queue_discards_everything: no Redis reachable");
            return;
        };
        let record = JobRecord::new(DEFAULT_QUEUE, "processMessage", json!({}));
        let failure = JobFailure {
            job: record,
            error: "boom".to_string(),
            failed_at_ms: 0,
        };
        record_failure(&redis, &failure).await.expect("record failure");
        record_failure(&redis, &failure).await.expect("record failure");

        assert_eq!(clear_dead_letter_queue(&redis).await.expect("clear"), 2);
        assert_eq!(clear_dead_letter_queue(&redis).await.expect("clear"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_queued_job_removes_only_that_job() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping cancel_queued_job_removes_only_that_job: no Redis reachable");
            return;
        };
        let queue = format!("test-{}", Uuid::new_v4());
        let keep = JobRecord::new(&queue, "processMessage", json!({ "body": "keep" }));
        let cancel = JobRecord::new(&queue, "processMessage", json!({ "body": "cancel" }));
        enqueue(&redis, &keep).await.expect("enqueue");
        enqueue(&redis, &cancel).await.expect("enqueue");

        assert!(cancel_queued_job(&redis, cancel.id).await.expect("cancel"));
        assert!(!cancel_queued_job(&redis, cancel.id).await.expect("cancel again is a no-op"));

        let remaining = blocking_pop(&redis, &[queue], 1.0).await.expect("pop").expect("keep is still queued");
        assert_eq!(remaining.id, keep.id);
    }
}
