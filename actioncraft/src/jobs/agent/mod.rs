//! Control-plane API for querying the worker pool and fan-out aggregates.
//!
//! Reuses the teacher's oneshot-reply message shape (`ResponseChannel<T>`)
//! so HTTP handlers can ask the job runtime a question without blocking on
//! an internal channel directly.

pub mod control_plane;
pub mod messages;
