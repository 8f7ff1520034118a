//! Leader-elected scheduler: promotes due delayed jobs and re-enqueues
//! recurring actions (spec §4.5).

use super::queue;
use crate::redis_pool::{RedisLock, RedisPool};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

const LEADER_LOCK_KEY: &str = "resque:workerslock:scheduler";
const LEADER_LOCK_TTL_SECS: u64 = 15;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A recurring action: re-enqueued `frequency` after each completion, or
/// immediately on scheduler startup if nothing is already pending.
#[derive(Debug, Clone)]
pub struct RecurringTask {
    /// Name of the action to dispatch.
    pub action_name: String,
    /// Queue the recurring job is placed on.
    pub queue: String,
    /// Interval between re-enqueues.
    pub frequency: Duration,
    /// Parameters passed on every invocation.
    pub args: serde_json::Value,
}

/// Runs the leader-election loop and the delayed-queue promotion loop for as
/// long as the process is alive. Only the elected leader promotes delayed
/// jobs or seeds recurring tasks; followers simply retry leadership.
pub async fn run(redis: RedisPool, recurring: Vec<RecurringTask>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let token = Uuid::new_v4().to_string();
    let mut is_leader = false;
    let mut seeded_recurring = false;

    loop {
        if *shutdown.borrow() {
            if is_leader {
                let _ = RedisLock::release(&redis, LEADER_LOCK_KEY, &token).await;
            }
            return;
        }

        if !is_leader {
            match RedisLock::try_acquire(&redis, LEADER_LOCK_KEY, &token, LEADER_LOCK_TTL_SECS).await {
                Ok(true) => {
                    info!("acquired scheduler leader lock");
                    is_leader = true;
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "leader election check failed"),
            }
        }

        if is_leader {
            if !seeded_recurring {
                seed_recurring(&redis, &recurring).await;
                seeded_recurring = true;
            }
            if let Err(err) = promote_due(&redis).await {
                warn!(error = %err, "failed to promote due delayed jobs");
            }
            // Refresh leadership so another process cannot steal it while we
            // are still alive.
            if let Ok(renewed) = RedisLock::try_acquire(&redis, LEADER_LOCK_KEY, &token, LEADER_LOCK_TTL_SECS).await {
                if !renewed {
                    // Someone else grabbed it between our TTL expiring and
                    // this check; step down gracefully.
                    is_leader = false;
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn seed_recurring(redis: &RedisPool, recurring: &[RecurringTask]) {
    for task in recurring {
        let lock_key = queue::queue_lock_key(&task.action_name);
        let token = Uuid::new_v4().to_string();
        match RedisLock::try_acquire(redis, &lock_key, &token, task.frequency.as_secs().max(1)).await {
            Ok(true) => {
                let record = super::JobRecord::new(&task.queue, &task.action_name, task.args.clone());
                if let Err(err) = queue::enqueue(redis, &record).await {
                    warn!(error = %err, action = %task.action_name, "failed to seed recurring task");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(error = %err, action = %task.action_name, "recurring task lock check failed"),
        }
    }
}

async fn promote_due(redis: &RedisPool) -> Result<(), super::JobError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    for bucket in queue::due_delayed_buckets(redis, now).await? {
        let moved = queue::drain_delayed_bucket(redis, bucket).await?;
        if moved > 0 {
            info!(bucket, moved, "promoted delayed jobs into their queues");
        }
    }
    Ok(())
}

/// Schedule the next run of a recurring action `frequency` after the
/// current one completes, guarded by the delayed-queue lock so two workers
/// finishing the "same" run never both schedule a follow-up.
///
/// # Errors
///
/// Returns [`super::JobError`] on Redis failure.
pub async fn reschedule_recurring(redis: &RedisPool, task: &RecurringTask) -> Result<(), super::JobError> {
    let run_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + task.frequency.as_secs();
    let lock_key = queue::delayed_lock_key(&task.action_name, run_at);
    let token = Uuid::new_v4().to_string();
    if RedisLock::try_acquire(redis, &lock_key, &token, task.frequency.as_secs().max(1)).await? {
        let record = super::JobRecord::new(&task.queue, &task.action_name, task.args.clone());
        queue::enqueue_delayed(redis, &record, run_at).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_pool::test_support::pool_for_tests;

    #[tokio::test(flavor = "multi_thread")]
    async fn promote_due_moves_past_buckets_into_their_queue() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping promote_due_moves_past_buckets_into_their_queue: no Redis reachable");
            return;
        };
        let queue = format!("test-{}", Uuid::new_v4());
        let record = super::super::JobRecord::new(&queue, "processMessage", serde_json::json!({}));
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        queue::enqueue_delayed(&redis, &record, now.saturating_sub(1)).await.expect("enqueue delayed");

        promote_due(&redis).await.expect("promote");

        let moved = queue::blocking_pop(&redis, &[queue], 1.0).await.expect("pop").expect("job was promoted");
        assert_eq!(moved.id, record.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reschedule_recurring_is_idempotent_under_the_delayed_lock() {
        let Some(redis) = pool_for_tests().await else {
            eprintln!("skipping reschedule_recurring_is_idempotent_under_the_delayed_lock: no Redis reachable");
            return;
        };
        let task = RecurringTask {
            action_name: format!("recurring-{}", Uuid::new_v4()),
            queue: "default".to_string(),
            frequency: Duration::from_secs(3600),
            args: serde_json::json!({}),
        };
        // First call wins the delayed lock and schedules the bucket; a
        // second call for the same action/frequency finds the lock already
        // held and is a no-op, not a duplicate schedule.
        reschedule_recurring(&redis, &task).await.expect("reschedule");
        let run_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() + task.frequency.as_secs();
        let due_before = queue::due_delayed_buckets(&redis, run_at).await.expect("due buckets").len();

        reschedule_recurring(&redis, &task).await.expect("reschedule again");
        let due_after = queue::due_delayed_buckets(&redis, run_at).await.expect("due buckets").len();
        assert_eq!(due_before, due_after);
    }
}
