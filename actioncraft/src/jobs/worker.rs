//! Worker loop draining the job queues and dispatching through the shared
//! action registry (spec §4.5 step 2-4).

use super::agent::messages::JobMetrics;
use super::scheduler::{reschedule_recurring, RecurringTask};
use super::{queue, JobFailure, JobRecord};
use crate::action::dispatch::{act, DispatchContext};
use crate::connection::{Connection, ConnectionType};
use crate::redis_pool::RedisLock;
use crate::state::AppState;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One worker: repeatedly pops a job, dispatches it, records the outcome.
pub struct Worker {
    state: AppState,
    queues: Vec<String>,
    metrics: Arc<Mutex<JobMetrics>>,
}

impl Worker {
    /// Build a worker draining `queues` in priority order against `state`.
    #[must_use]
    pub fn new(state: AppState, queues: Vec<String>, metrics: Arc<Mutex<JobMetrics>>) -> Self {
        Self { state, queues, metrics }
    }

    /// Run until `shutdown` fires, finishing any in-flight job first (spec
    /// §5's cancellation model: workers finish the current job, then exit).
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match queue::blocking_pop(&self.state.redis, &self.queues, 1.0).await {
                Ok(Some(record)) => self.process(record).await,
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "failed to pop job from queue");
                }
            }
        }
    }

    async fn process(&self, record: JobRecord) {
        {
            let mut metrics = self.metrics.lock().await;
            metrics.jobs_dequeued += 1;
        }

        let lock_key = self.execution_lock_key(&record);
        let lock_token = record.id.to_string();
        if !self.try_acquire_execution_lock(&record).await {
            info!(action = %record.action_name, job = %record.id, "skipping job: execution lock already held elsewhere");
            return;
        }

        self.state.running_jobs.lock().await.insert(record.id);

        let started = std::time::Instant::now();
        let connection = Connection::new(ConnectionType::Job, "worker", Uuid::new_v4());
        let mut ctx = DispatchContext {
            state: self.state.clone(),
            connection,
        };

        let outcome = act(&mut ctx, &record.action_name, record.args.clone()).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.state.running_jobs.lock().await.remove(&record.id);

        match outcome {
            Ok(_value) => {
                let mut metrics = self.metrics.lock().await;
                metrics.jobs_completed += 1;
                metrics.record_execution_time(elapsed_ms);
                drop(metrics);
                self.maybe_reschedule(&record).await;
            }
            Err(err) => {
                error!(action = %record.action_name, error = %err, "job failed");
                let mut metrics = self.metrics.lock().await;
                metrics.jobs_failed += 1;
                drop(metrics);
                let failure = JobFailure {
                    job: record.clone(),
                    error: err.to_string(),
                    failed_at_ms: now_ms(),
                };
                if let Err(record_err) = queue::record_failure(&self.state.redis, &failure).await {
                    warn!(error = %record_err, "failed to persist job failure record");
                }
            }
        }

        if let Err(err) = RedisLock::release(&self.state.redis, &lock_key, &lock_token).await {
            warn!(error = %err, action = %record.action_name, "failed to release execution lock");
        }
    }

    async fn maybe_reschedule(&self, record: &JobRecord) {
        let Some(frequency) = self.state.recurring_frequency(&record.action_name) else {
            return;
        };
        let task = RecurringTask {
            action_name: record.action_name.clone(),
            queue: record.queue.clone(),
            frequency,
            args: record.args.clone(),
        };
        if let Err(err) = reschedule_recurring(&self.state.redis, &task).await {
            warn!(error = %err, action = %record.action_name, "failed to reschedule recurring task");
        }
    }

    fn execution_lock_key(&self, record: &JobRecord) -> String {
        let digest = format!("{:x}", md5_like_digest(&record.args));
        queue::execution_lock_key(&record.action_name, &digest)
    }

    /// Acquire the per-argument execution lock for a job, preventing
    /// concurrent runs of the same action with the same arguments (first of
    /// the three cooperating locks in spec §4.5). Held for the duration of
    /// [`Worker::process`] and released once the job finishes.
    pub async fn try_acquire_execution_lock(&self, record: &JobRecord) -> bool {
        let key = self.execution_lock_key(record);
        let token = record.id.to_string();
        RedisLock::try_acquire(&self.state.redis, &key, &token, 300)
            .await
            .unwrap_or(false)
    }
}

/// A cheap, dependency-free content digest used only to key the execution
/// lock; collisions just mean a rare false "already running" skip, not a
/// correctness issue, since the lock always has a TTL.
fn md5_like_digest(value: &serde_json::Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_pool::test_support::pool_for_tests;
    use crate::state::AppState;

    #[test]
    fn digest_is_stable_for_the_same_args() {
        let args = serde_json::json!({ "body": "hi", "n": 1 });
        assert_eq!(md5_like_digest(&args), md5_like_digest(&args));
        assert_ne!(md5_like_digest(&args), md5_like_digest(&serde_json::json!({ "body": "bye" })));
    }

    async fn test_state() -> Option<AppState> {
        pool_for_tests().await?;
        let redis_url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
        let config = crate::config::AppConfig {
            redis_url,
            ..crate::config::AppConfig::default()
        };
        let actions = crate::demo::action_registry().ok()?;
        let channels = crate::demo::channel_registry(&config.process.name);
        AppState::build(config, actions, Vec::new(), channels).ok()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execution_lock_is_not_acquired_twice_concurrently() {
        let Some(state) = test_state().await else {
            eprintln!("skipping execution_lock_is_not_acquired_twice_concurrently: no Redis reachable");
            return;
        };
        let worker = Worker::new(state, vec!["default".to_string()], Arc::new(Mutex::new(JobMetrics::default())));
        let record = JobRecord::new("default", "processMessage", serde_json::json!({ "body": "hi" }));

        assert!(worker.try_acquire_execution_lock(&record).await);
        // Same action + same args: the second attempt finds the lock held.
        assert!(!worker.try_acquire_execution_lock(&record).await);

        let other = JobRecord::new("default", "processMessage", serde_json::json!({ "body": "bye" }));
        assert!(worker.try_acquire_execution_lock(&other).await);
    }
}
