//! Background job runtime: a Resque-compatible queue, a worker pool, a
//! leader-elected scheduler for delayed/recurring jobs, and fan-out
//! aggregation (spec §3, §4.5, §6).

pub mod agent;
pub mod fanout;
pub mod queue;
pub mod scheduler;
pub mod worker;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Sitting in `resque:queue:<queue>`, not yet picked up.
    Queued,
    /// Sitting in a `resque:delayed:<ts>` bucket, waiting for its time.
    Delayed,
    /// Claimed by a worker and currently executing.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with an error; recorded in `resque:failed`.
    Failed,
}

/// A job as it sits on the wire: the action to invoke and its parameters,
/// matching the `{class, queue, args}` Resque envelope (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Id assigned at enqueue time.
    pub id: JobId,
    /// Queue this job was placed on.
    pub queue: String,
    /// Name of the action to dispatch (the Resque "class").
    pub action_name: String,
    /// Parameters passed to the action.
    pub args: serde_json::Value,
    /// Number of times this job has already been attempted.
    pub attempts: u32,
}

impl JobRecord {
    /// Construct a fresh record with zero prior attempts.
    #[must_use]
    pub fn new(queue: impl Into<String>, action_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.into(),
            action_name: action_name.into(),
            args,
            attempts: 0,
        }
    }
}

/// A failure record appended to `resque:failed` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// The job that failed.
    pub job: JobRecord,
    /// Error message from the dispatcher.
    pub error: String,
    /// Epoch-milliseconds timestamp of the failure.
    pub failed_at_ms: u64,
}

/// Errors from the job runtime.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The underlying Redis pool failed.
    #[error(transparent)]
    Redis(#[from] crate::redis_pool::RedisPoolError),
    /// A stored record could not be (de)serialized.
    #[error("corrupt job record: {0}")]
    Serde(#[from] serde_json::Error),
    /// `enqueue` referenced an action with no registered job binding.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl From<JobError> for crate::error::ActionError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::UnknownAction(name) => Self::new(
                crate::error::ErrorKind::ConnectionTaskDefinition,
                format!("enqueue referenced unknown action: {name}"),
            ),
            other => Self::new(crate::error::ErrorKind::ActionRun, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_json() {
        let id = JobId::new();
        let encoded = serde_json::to_string(&id).expect("encode");
        let decoded: JobId = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(id, decoded);
    }

    #[test]
    fn job_id_display_matches_inner_uuid() {
        let id = JobId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }

    #[test]
    fn job_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(JobStatus::Running).unwrap(), serde_json::json!("running"));
        assert_eq!(serde_json::to_value(JobStatus::Delayed).unwrap(), serde_json::json!("delayed"));
    }

    #[test]
    fn unknown_action_maps_to_connection_task_definition() {
        let err: crate::error::ActionError = JobError::UnknownAction("ghost".to_string()).into();
        assert_eq!(err.kind, crate::error::ErrorKind::ConnectionTaskDefinition);
    }
}
