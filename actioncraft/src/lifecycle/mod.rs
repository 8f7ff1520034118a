//! Ordered startup/shutdown of every subsystem against one shared signal
//! (spec §4 "Initialization lifecycle": "ordered start/stop by priority;
//! run-mode gating server vs. CLI").
//!
//! Priority order at startup, reversed at shutdown: the pub/sub bus and
//! presence heartbeat first (so broadcasts are deliverable before anything
//! else runs), then the job runtime, then the web/WebSocket server last —
//! it's the subsystem a load balancer is watching, so it should be the last
//! thing to stop accepting work and the first thing to start it.

use crate::jobs::scheduler::RecurringTask;
use crate::jobs::worker::Worker;
use crate::state::AppState;
use tracing::info;

/// Which subsystems a process runs. `Server` processes answer HTTP/WebSocket
/// traffic and run the job runtime inline, matching the teacher's
/// single-binary deployment; `Worker` runs only the background job runtime,
/// for a dedicated worker-pool deployment (spec §4 "run-mode gating").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Web/WebSocket server plus the job runtime and pub/sub bus.
    Server,
    /// Job runtime and pub/sub bus only, no HTTP listener.
    Worker,
}

/// Start every subsystem `mode` calls for, then block until `shutdown`
/// fires; shuts subsystems down in reverse priority order, bounded by
/// `state.config.process.shutdown_timeout()` (spec §5 "Cancellation").
///
/// # Errors
///
/// Returns an error if the web server fails to bind (`RunMode::Server`
/// only); subsystem task panics are logged, not propagated, so one
/// subsystem's crash doesn't take the others down mid-shutdown.
pub async fn run(state: AppState, mode: RunMode, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
    let (bus_shutdown_tx, bus_shutdown_rx) = tokio::sync::watch::channel(false);
    let (heartbeat_shutdown_tx, heartbeat_shutdown_rx) = tokio::sync::watch::channel(false);
    let (jobs_shutdown_tx, jobs_shutdown_rx) = tokio::sync::watch::channel(false);

    let bus = crate::pubsub::Bus::new(
        state.redis.clone(),
        state.config.process.name.clone(),
        state.connections.clone(),
        state.outbound.clone(),
    );
    let bus_handle = tokio::spawn(bus.run(bus_shutdown_rx));

    let heartbeat_handle = tokio::spawn(crate::channels::presence::run_heartbeat(
        state.channels.presence.clone(),
        state.redis.clone(),
        std::time::Duration::from_secs(state.config.presence.heartbeat_interval_secs),
        state.config.presence.ttl_secs,
        heartbeat_shutdown_rx.clone(),
    ));
    let sweep_handle = tokio::spawn(crate::channels::presence::run_sweep(
        state.channels.presence.clone(),
        state.redis.clone(),
        state.config.process.name.clone(),
        std::time::Duration::from_secs(state.config.presence.heartbeat_interval_secs),
        heartbeat_shutdown_rx,
    ));

    let job_handles = if state.config.tasks.enabled {
        start_job_runtime(&state, jobs_shutdown_rx).await
    } else {
        Vec::new()
    };

    info!(?mode, "lifecycle: all subsystems started");

    let server_result = match mode {
        RunMode::Server => {
            let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::watch::channel(false);
            let server_handle = tokio::spawn(crate::server::serve(state.clone(), server_shutdown_rx));
            let _ = shutdown.changed().await;
            let _ = server_shutdown_tx.send(true);
            Some(server_handle)
        }
        RunMode::Worker => {
            let _ = shutdown.changed().await;
            None
        }
    };

    info!("lifecycle: shutdown signal received, stopping subsystems in reverse priority order");

    if let Some(handle) = server_result {
        await_with_timeout(&state, "web server", handle).await;
    }

    let _ = jobs_shutdown_tx.send(true);
    for handle in job_handles {
        await_with_timeout(&state, "job runtime", handle).await;
    }

    let _ = heartbeat_shutdown_tx.send(true);
    await_with_timeout(&state, "presence heartbeat", heartbeat_handle).await;
    await_with_timeout(&state, "presence sweep", sweep_handle).await;

    let _ = bus_shutdown_tx.send(true);
    await_with_timeout(&state, "pubsub bus", bus_handle).await;

    info!("lifecycle: shutdown complete");
    Ok(())
}

async fn start_job_runtime(state: &AppState, shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
    let queues = state.actions.task_queues();
    let metrics = state.job_metrics.clone();
    let recurring: Vec<RecurringTask> = state
        .actions
        .recurring_actions()
        .into_iter()
        .filter_map(|(action_name, binding)| {
            Some(RecurringTask {
                action_name,
                queue: binding.queue,
                frequency: binding.frequency?,
                args: serde_json::Value::Null,
            })
        })
        .collect();

    let mut handles = Vec::with_capacity(state.config.tasks.processors + 2);
    handles.push(tokio::spawn(crate::jobs::scheduler::run(state.redis.clone(), recurring, shutdown.clone())));
    if let Some(job_control_rx) = state.take_job_control_rx().await {
        handles.push(tokio::spawn(crate::jobs::agent::control_plane::run(
            job_control_rx,
            state.redis.clone(),
            metrics.clone(),
            state.running_jobs.clone(),
            shutdown.clone(),
        )));
    }
    for _ in 0..state.config.tasks.processors {
        let worker = Worker::new(state.clone(), queues.clone(), metrics.clone());
        handles.push(tokio::spawn(worker.run(shutdown.clone())));
    }
    handles
}

async fn await_with_timeout(state: &AppState, label: &str, handle: tokio::task::JoinHandle<()>) {
    let timeout = state.config.process.shutdown_timeout();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => info!(subsystem = label, "stopped"),
        Ok(Err(err)) => tracing::error!(subsystem = label, error = %err, "task panicked during shutdown"),
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(subsystem = label, timeout_ms, "shutdown timed out");
        }
    }
}
