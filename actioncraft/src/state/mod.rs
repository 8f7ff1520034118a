//! Application state: the aggregate every transport dispatches through.
//!
//! Combines the action registry, connection registry, session store, and
//! channel registry into one `Clone`-able handle shared across the
//! HTTP/WebSocket server, the pub/sub receiver, and every worker.

use crate::action::{ActionRegistry, Middleware};
use crate::channels::ChannelRegistry;
use crate::config::AppConfig;
use crate::connection::ConnectionRegistry;
use crate::jobs::agent::control_plane::JobControlMessage;
use crate::jobs::agent::messages::JobMetrics;
use crate::jobs::JobId;
use crate::pubsub::OutboundRegistry;
use crate::redis_pool::RedisPool;
use crate::session::SessionStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// Shared Redis command pool, plus the ability to open dedicated
    /// subscriber connections.
    pub redis: RedisPool,
    /// Every registered action, keyed by name.
    pub actions: ActionRegistry,
    /// Process-wide live connections.
    pub connections: ConnectionRegistry,
    /// Session create/load/update/destroy.
    pub sessions: SessionStore,
    /// Channel definitions plus presence bookkeeping.
    pub channels: ChannelRegistry,
    /// Middleware run around every action, regardless of its binding.
    pub global_middleware: Arc<Vec<Arc<dyn Middleware>>>,
    /// Aggregate counters surfaced by the job runtime's control-plane API.
    pub job_metrics: Arc<Mutex<JobMetrics>>,
    /// Ids of jobs a worker is currently executing, consulted by
    /// `GetJobStatusRequest` (spec §4.5).
    pub running_jobs: Arc<Mutex<HashSet<JobId>>>,
    /// Sends a control-plane request to whichever task is running
    /// [`crate::jobs::agent::control_plane::run`].
    pub job_control: mpsc::Sender<JobControlMessage>,
    job_control_rx: Arc<Mutex<Option<mpsc::Receiver<JobControlMessage>>>>,
    /// Per-connection outbound channels the pub/sub bus delivers broadcasts
    /// through (spec §4.4).
    pub outbound: OutboundRegistry,
    /// Process start time, for the `/health` endpoint's `uptimeSeconds`.
    pub started_at: Instant,
    recurring: Arc<HashMap<String, Duration>>,
}

impl AppState {
    /// Build application state: connects to Redis, constructs the session
    /// store, and indexes `actions`' recurring-task bindings so the
    /// scheduler and worker can look up a re-enqueue frequency by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis pool cannot be constructed.
    pub fn build(
        config: AppConfig,
        actions: ActionRegistry,
        global_middleware: Vec<Arc<dyn Middleware>>,
        channels: ChannelRegistry,
    ) -> anyhow::Result<Self> {
        let redis = RedisPool::connect(&config.redis_url)?;
        let sessions = SessionStore::new(redis.clone(), config.session.ttl_secs, config.session.cookie_name.clone());
        let recurring = actions
            .recurring_actions()
            .into_iter()
            .filter_map(|(name, binding)| binding.frequency.map(|freq| (name, freq)))
            .collect();
        let (job_control, job_control_rx) = mpsc::channel(64);

        Ok(Self {
            config: Arc::new(config),
            redis,
            actions,
            connections: ConnectionRegistry::new(),
            sessions,
            channels,
            global_middleware: Arc::new(global_middleware),
            job_metrics: Arc::new(Mutex::new(JobMetrics::default())),
            running_jobs: Arc::new(Mutex::new(HashSet::new())),
            job_control,
            job_control_rx: Arc::new(Mutex::new(Some(job_control_rx))),
            outbound: OutboundRegistry::new(),
            started_at: Instant::now(),
            recurring: Arc::new(recurring),
        })
    }

    /// Take the receiving half of the control-plane channel. Returns `None`
    /// on every call after the first, since only one task may own it.
    pub async fn take_job_control_rx(&self) -> Option<mpsc::Receiver<JobControlMessage>> {
        self.job_control_rx.lock().await.take()
    }

    /// The re-enqueue frequency for `action_name`, if it declares a
    /// recurring-task binding (spec §4.5).
    #[must_use]
    pub fn recurring_frequency(&self, action_name: &str) -> Option<Duration> {
        self.recurring.get(action_name).copied()
    }
}
