//! The action registry: one instance per name, duplicate names rejected at
//! startup (spec §4.1).

use super::middleware::Middleware;
use super::schema::ParamSchema;
use crate::connection::Connection;
use crate::error::ActionError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// HTTP method an action's web binding answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`.
    Get,
    /// `POST`.
    Post,
    /// `PUT`.
    Put,
    /// `PATCH`.
    Patch,
    /// `DELETE`.
    Delete,
}

impl HttpMethod {
    /// Parse from an `http::Method`, if it's one of the five recognized verbs.
    #[must_use]
    pub fn from_http(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::GET => Some(Self::Get),
            http::Method::POST => Some(Self::Post),
            http::Method::PUT => Some(Self::Put),
            http::Method::PATCH => Some(Self::Patch),
            http::Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Optional HTTP route binding for an action.
#[derive(Debug, Clone)]
pub struct WebBinding {
    /// Method the binding answers to.
    pub method: HttpMethod,
    /// Route pattern, `:name` placeholders become regex capture groups.
    pub route: String,
}

/// Optional recurring-task binding for an action (spec §4.5, Glossary
/// "Recurring task").
#[derive(Debug, Clone)]
pub struct TaskBinding {
    /// Queue this action's jobs are placed on absent an explicit override.
    pub queue: String,
    /// If set, the scheduler re-enqueues this action on this cadence.
    pub frequency: Option<Duration>,
}

impl Default for TaskBinding {
    fn default() -> Self {
        Self {
            queue: crate::jobs::queue::DEFAULT_QUEUE.to_string(),
            frequency: None,
        }
    }
}

/// A named, typed handler uniformly invoked from HTTP, WebSocket, jobs, and
/// the job runtime (Glossary "Action").
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique name this action is registered and dispatched under.
    fn name(&self) -> &str;

    /// Input schema: field name to constraint/coercion rule.
    fn schema(&self) -> &[(&'static str, ParamSchema)] {
        &[]
    }

    /// Optional HTTP route binding.
    fn web_binding(&self) -> Option<WebBinding> {
        None
    }

    /// Optional recurring-task binding.
    fn task_binding(&self) -> Option<TaskBinding> {
        None
    }

    /// Per-action middleware, run innermost (closest to `run`).
    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    /// Execute the action against already-validated parameters.
    async fn run(&self, params: Value, connection: &Connection) -> Result<Value, ActionError>;
}

/// Registers every [`Action`] by name; duplicate registration is rejected.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<HashMap<String, Arc<dyn Action>>>,
}

/// Error building a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two actions were registered under the same name.
    #[error("duplicate action name: {0}")]
    DuplicateName(String),
}

/// Builds an [`ActionRegistry`], rejecting duplicate names immediately
/// (spec §4.1: "duplicate names are rejected at startup").
#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if an action with the same
    /// name is already registered.
    pub fn register(mut self, action: Arc<dyn Action>) -> Result<Self, RegistryError> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.actions.insert(name, action);
        Ok(self)
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: Arc::new(self.actions),
        }
    }
}

impl ActionRegistry {
    /// Look up an action by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Find the first action whose web binding matches `method` and whose
    /// route pattern matches `path`, returning it plus the extracted path
    /// parameters (spec §4.3 routing).
    #[must_use]
    pub fn match_route(&self, method: HttpMethod, path: &str) -> Option<(Arc<dyn Action>, HashMap<String, String>)> {
        for action in self.actions.values() {
            let Some(binding) = action.web_binding() else {
                continue;
            };
            if binding.method != method {
                continue;
            }
            if let Some(params) = match_pattern(&binding.route, path) {
                return Some((action.clone(), params));
            }
        }
        None
    }

    /// Every action with a web binding matching `path` regardless of
    /// method, used to distinguish 404 (no route at all) from 404
    /// method-mismatch semantics the spec treats identically.
    #[must_use]
    pub fn path_exists(&self, path: &str) -> bool {
        self.actions
            .values()
            .any(|action| action.web_binding().is_some_and(|b| match_pattern(&b.route, path).is_some()))
    }

    /// Every action carrying a recurring-task binding.
    #[must_use]
    pub fn recurring_actions(&self) -> Vec<(String, TaskBinding)> {
        self.actions
            .values()
            .filter_map(|action| {
                let binding = action.task_binding()?;
                binding.frequency?;
                Some((action.name().to_string(), binding))
            })
            .collect()
    }

    /// Every distinct queue name named by a task binding, sorted for
    /// deterministic worker startup order.
    #[must_use]
    pub fn task_queues(&self) -> Vec<String> {
        let queues: std::collections::BTreeSet<String> =
            self.actions.values().filter_map(|action| action.task_binding()).map(|binding| binding.queue).collect();
        queues.into_iter().collect()
    }
}

/// Convert a `:name` route pattern into capture groups and match `path`
/// against it, returning the extracted parameters on success.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (pat, seg) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = pat.strip_prefix(':') {
            params.insert(name.to_string(), (*seg).to_string());
        } else if pat != seg {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_pattern_extracts_named_segments() {
        let params = match_pattern("/user/:id/post/:postId", "/user/7/post/42").unwrap();
        assert_eq!(params.get("id"), Some(&"7".to_string()));
        assert_eq!(params.get("postId"), Some(&"42".to_string()));
    }

    #[test]
    fn match_pattern_rejects_segment_count_mismatch() {
        assert!(match_pattern("/user/:id", "/user/7/extra").is_none());
    }

    #[test]
    fn match_pattern_rejects_literal_mismatch() {
        assert!(match_pattern("/user/:id", "/account/7").is_none());
    }
}
