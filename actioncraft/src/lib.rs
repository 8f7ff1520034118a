//! actioncraft: an action-dispatch framework for building real-time
//! services out of self-describing, transport-agnostic actions.
//!
//! A single [`Action`](action::Action) implementation can answer an HTTP
//! request, a WebSocket frame, and a background job — the dispatcher
//! (`action::dispatch`) validates parameters against a declared schema, runs
//! per-action and global middleware, and logs the outcome the same way
//! regardless of which transport carried the call in.
//!
//! # Architecture
//!
//! - [`action`] — the registry actions are declared into, and the dispatcher
//!   that validates, authorizes, and runs them.
//! - [`connection`] — the transport-agnostic connection/session handle every
//!   action runs against (web, WebSocket, job, CLI, MCP).
//! - [`channels`] — pub/sub channel definitions, subscription authorization,
//!   and presence tracking.
//! - [`pubsub`] — the Redis-backed broadcast bus delivering channel messages
//!   to every subscribed connection, on every process.
//! - [`jobs`] — the background job runtime: queue, worker pool, recurring
//!   scheduler, and fan-out aggregation.
//! - [`server`] — the axum HTTP/WebSocket transport.
//! - [`session`] — session create/load/update/destroy against Redis.
//! - [`state`] — [`state::AppState`], the aggregate handle every transport
//!   and worker shares.
//! - [`config`] — layered configuration (defaults, `config.toml`,
//!   environment).
//! - [`middleware`] — cross-cutting HTTP middleware: rate limiting, CORS,
//!   security headers, correlation id echoing.
//! - [`observability`] — process-wide structured logging setup.
//! - [`error`] — the action error envelope shared by every transport.
//! - [`lifecycle`] — ordered startup/shutdown of the server, worker pool,
//!   scheduler, and pub/sub bus.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use actioncraft::config::AppConfig;
//! use actioncraft::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! observability::init()?;
//! let config = AppConfig::load(None)?;
//!
//! let actions = ActionRegistryBuilder::new().build();
//! let channels = ChannelRegistryBuilder::new().build("demo-process");
//! let state = AppState::build(config, actions, Vec::new(), channels)?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server::serve(state, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod channels;
pub mod config;
pub mod connection;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod pubsub;
pub mod redis_pool;
pub mod server;
pub mod session;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod demo;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Convenience re-exports for building on top of actioncraft.
pub mod prelude {
    //! Commonly used types for declaring actions, channels, and state.
    //!
    //! ```rust
    //! use actioncraft::prelude::*;
    //! ```

    pub use crate::action::{Action, ActionRegistry, ActionRegistryBuilder, DispatchContext, HttpMethod, TaskBinding, WebBinding};
    pub use crate::action::{act, Middleware, MiddlewareOutcome, ParamSchema};
    pub use crate::channels::{Channel, ChannelRegistry, ChannelRegistryBuilder};
    pub use crate::config::AppConfig;
    pub use crate::connection::{Connection, ConnectionRegistry, ConnectionType};
    pub use crate::error::{ActionError, ErrorKind};
    pub use crate::observability;
    pub use crate::server;
    pub use crate::state::AppState;

    pub use serde_json::json;
}
