//! Action Registry & Dispatcher (spec §4.1).

pub mod dispatch;
pub mod middleware;
pub mod params;
pub mod registry;
pub mod schema;

pub use dispatch::{act, DispatchContext};
pub use middleware::{Middleware, MiddlewareOutcome};
pub use registry::{Action, ActionRegistry, ActionRegistryBuilder, HttpMethod, TaskBinding, WebBinding};
pub use schema::ParamSchema;
