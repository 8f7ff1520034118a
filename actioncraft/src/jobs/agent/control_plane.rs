//! The control-plane task: answers [`JobControlMessage`] requests against
//! live worker state and Redis, replying through each request's own oneshot
//! channel (spec §4.5).

use super::messages::{
    CancelJobRequest, ClearDeadLetterQueueRequest, GetJobStatusRequest, GetMetricsRequest, JobMetrics,
    ResponseChannel, RetryAllFailedRequest, RetryJobRequest,
};
use crate::jobs::{queue, JobId, JobStatus};
use crate::redis_pool::RedisPool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Every request the control-plane answers, wrapping the web-handler-pattern
/// request structs from [`super::messages`].
#[derive(Debug)]
pub enum JobControlMessage {
    /// Snapshot of the running job metrics.
    Metrics(GetMetricsRequest),
    /// Status of a single job, by id.
    JobStatus(GetJobStatusRequest),
    /// Retry one failed job.
    RetryJob(RetryJobRequest),
    /// Retry every failed job.
    RetryAllFailed(RetryAllFailedRequest),
    /// Cancel a still-queued job.
    CancelJob(CancelJobRequest),
    /// Clear the dead letter queue.
    ClearDeadLetterQueue(ClearDeadLetterQueueRequest),
}

impl From<GetMetricsRequest> for JobControlMessage {
    fn from(request: GetMetricsRequest) -> Self {
        Self::Metrics(request)
    }
}

impl From<GetJobStatusRequest> for JobControlMessage {
    fn from(request: GetJobStatusRequest) -> Self {
        Self::JobStatus(request)
    }
}

impl From<RetryJobRequest> for JobControlMessage {
    fn from(request: RetryJobRequest) -> Self {
        Self::RetryJob(request)
    }
}

impl From<RetryAllFailedRequest> for JobControlMessage {
    fn from(request: RetryAllFailedRequest) -> Self {
        Self::RetryAllFailed(request)
    }
}

impl From<CancelJobRequest> for JobControlMessage {
    fn from(request: CancelJobRequest) -> Self {
        Self::CancelJob(request)
    }
}

impl From<ClearDeadLetterQueueRequest> for JobControlMessage {
    fn from(request: ClearDeadLetterQueueRequest) -> Self {
        Self::ClearDeadLetterQueue(request)
    }
}

/// Runs until `shutdown` fires, answering requests off `requests` one at a
/// time. A plain loop rather than an actor, matching the rest of the job
/// runtime's worker/scheduler tasks.
pub async fn run(
    mut requests: mpsc::Receiver<JobControlMessage>,
    redis: RedisPool,
    metrics: Arc<Mutex<JobMetrics>>,
    running: Arc<Mutex<HashSet<JobId>>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = requests.recv() => {
                let Some(message) = message else { return };
                handle(message, &redis, &metrics, &running).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn handle(message: JobControlMessage, redis: &RedisPool, metrics: &Arc<Mutex<JobMetrics>>, running: &Arc<Mutex<HashSet<JobId>>>) {
    match message {
        JobControlMessage::Metrics(request) => {
            let snapshot = metrics.lock().await.clone();
            reply(request.response_tx, snapshot).await;
        }
        JobControlMessage::JobStatus(request) => {
            // Resque's flat queue lists have no per-job status index; the
            // only status this can honestly answer is "currently running"
            // (tracked by the worker pool) versus unknown.
            let status = if running.lock().await.contains(&request.id) {
                Some(JobStatus::Running)
            } else {
                None
            };
            reply(request.response_tx, status).await;
        }
        JobControlMessage::RetryJob(request) => {
            let ok = queue::retry_failed_job(redis, request.id).await.unwrap_or_else(|err| {
                warn!(error = %err, job = %request.id, "failed to retry job");
                false
            });
            reply(request.response_tx, ok).await;
        }
        JobControlMessage::RetryAllFailed(request) => {
            let count = queue::retry_all_failed(redis).await.unwrap_or_else(|err| {
                warn!(error = %err, "failed to retry all failed jobs");
                0
            });
            reply(request.response_tx, count).await;
        }
        JobControlMessage::CancelJob(request) => {
            // Only a still-queued job can be cancelled; a running job has no
            // per-job interrupt mechanism for arbitrary actions.
            let ok = queue::cancel_queued_job(redis, request.id).await.unwrap_or_else(|err| {
                warn!(error = %err, job = %request.id, "failed to cancel job");
                false
            });
            reply(request.response_tx, ok).await;
        }
        JobControlMessage::ClearDeadLetterQueue(request) => {
            let count = queue::clear_dead_letter_queue(redis).await.unwrap_or_else(|err| {
                warn!(error = %err, "failed to clear dead letter queue");
                0
            });
            reply(request.response_tx, count).await;
        }
    }
}

async fn reply<T>(response_tx: ResponseChannel<T>, value: T) {
    if let Some(tx) = response_tx.lock().await.take() {
        let _ = tx.send(value);
    }
}
