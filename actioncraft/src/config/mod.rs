//! Layered, environment-keyed configuration.
//!
//! Configuration is loaded with the following precedence, highest first:
//!
//! 1. `<KEY>_<NODE_ENV>` environment variable override
//! 2. `<KEY>` environment variable
//! 3. `./config.toml`
//! 4. hardcoded defaults
//!
//! This mirrors the teacher's figment-based loader, filled in for the keys
//! enumerated in spec §6.

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Web/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    /// TCP port to bind.
    pub port: u16,
    /// Host/interface to bind.
    pub host: String,
    /// Prefix under which every action with an HTTP binding is mounted.
    pub api_route: String,
    /// Allowed CORS origins. `["*"]` enables the wildcard behavior in spec §4.3.
    pub allowed_origins: Vec<String>,
    /// Serve static files under `static_files_route`.
    pub static_enabled: bool,
    /// Directory static files are served from.
    pub static_directory: String,
    /// Route prefix static files are served under.
    pub static_route: String,
    /// Emit strong ETags for static files.
    pub static_etag: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "localhost".to_string(),
            api_route: "/api".to_string(),
            allowed_origins: vec!["*".to_string()],
            static_enabled: true,
            static_directory: "assets".to_string(),
            static_route: "/".to_string(),
            static_etag: true,
        }
    }
}

/// Correlation id echoing settings (spec §4.3). Neither field has an
/// environment override in spec §6; like `allowed_origins` and
/// `static_etag`, they are toml/default-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationIdConfig {
    /// Only echo the header when the proxy in front of this process is
    /// trusted to have set it.
    pub trust_proxy: bool,
    /// Header name carrying the correlation id.
    pub header_name: String,
}

impl Default for CorrelationIdConfig {
    fn default() -> Self {
        Self {
            trust_proxy: false,
            header_name: "X-Request-Id".to_string(),
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time-to-live, in seconds, refreshed on every load/update.
    pub ttl_secs: u64,
    /// Cookie name the session id is bound to.
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86400,
            cookie_name: "__session".to_string(),
        }
    }
}

/// Background job runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Enable the worker pool and scheduler.
    pub enabled: bool,
    /// Number of worker tasks draining the queues.
    pub processors: usize,
    /// Per-job execution timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            processors: 1,
            timeout_ms: 5000,
        }
    }
}

impl TasksConfig {
    /// [`Self::timeout_ms`] as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the rate limiter global middleware.
    pub enabled: bool,
    /// Fixed window width, in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window for unauthenticated identifiers.
    pub unauth_limit: u32,
    /// Requests allowed per window for authenticated identifiers.
    pub auth_limit: u32,
    /// Redis key prefix.
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            unauth_limit: 20,
            auth_limit: 200,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Presence tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// TTL, in seconds, of each presence expiry key.
    pub ttl_secs: u64,
    /// Heartbeat interval, in seconds, refreshing owned presence keys.
    pub heartbeat_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 90,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Logical process name; also used as the pub/sub channel prefix.
    pub name: String,
    /// Graceful shutdown budget, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Include stack traces in error response bodies.
    pub include_stack_in_errors: bool,
    /// Maximum tolerated event-loop delay, in milliseconds, before workers
    /// throttle spawning new processors (spec §5).
    pub max_event_loop_delay_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            shutdown_timeout_ms: 30_000,
            include_stack_in_errors: false,
            max_event_loop_delay_ms: 5,
        }
    }
}

impl ProcessConfig {
    /// [`Self::shutdown_timeout_ms`] as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Web/WebSocket server settings.
    pub web_server: WebServerConfig,
    /// Correlation id echoing settings.
    pub correlation_id: CorrelationIdConfig,
    /// Session store settings.
    pub session: SessionConfig,
    /// Background job runtime settings.
    pub tasks: TasksConfig,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Presence tracking settings.
    pub presence: PresenceConfig,
    /// Process-wide settings.
    pub process: ProcessConfig,
    /// Redis connection URL.
    pub redis_url: String,
    /// Database connection URL (opaque; the ORM layer is out of scope).
    pub database_url: String,
}

impl AppConfig {
    /// Load configuration with the precedence described in the module docs.
    ///
    /// `node_env` selects the `_<NODE_ENV>` suffix (spec §6), e.g. `"production"`,
    /// `"test"`. Pass `None` to only consider unsuffixed environment keys.
    ///
    /// # Errors
    ///
    /// Returns an error if `./config.toml` exists but fails to parse, or if
    /// an environment override cannot be deserialized into its target type.
    pub fn load(node_env: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"));

        for (key, env_key) in Self::env_keys() {
            if let Some(value) = read_env_override(env_key, node_env) {
                figment = figment.merge(Serialized::default(key, &value));
            }
        }

        Ok(figment.extract()?)
    }

    /// The recognized environment keys (spec §6), each mapped to its
    /// figment dotted-path target.
    fn env_keys() -> Vec<(&'static str, &'static str)> {
        vec![
            ("web_server.port", "WEB_SERVER_PORT"),
            ("web_server.host", "WEB_SERVER_HOST"),
            ("web_server.api_route", "WEB_SERVER_API_ROUTE"),
            ("web_server.static_enabled", "WEB_SERVER_STATIC_ENABLED"),
            (
                "web_server.static_directory",
                "WEB_SERVER_STATIC_DIRECTORY",
            ),
            ("web_server.static_route", "WEB_SERVER_STATIC_ROUTE"),
            ("session.ttl_secs", "SESSION_TTL"),
            ("session.cookie_name", "SESSION_COOKIE_NAME"),
            ("redis_url", "REDIS_URL"),
            ("database_url", "DATABASE_URL"),
            ("tasks.enabled", "TASKS_ENABLED"),
            ("tasks.processors", "TASK_PROCESSORS"),
            ("tasks.timeout_ms", "TASK_TIMEOUT"),
            ("rate_limit.enabled", "RATE_LIMIT_ENABLED"),
            ("rate_limit.window_ms", "RATE_LIMIT_WINDOW_MS"),
            ("rate_limit.unauth_limit", "RATE_LIMIT_UNAUTH_LIMIT"),
            ("rate_limit.auth_limit", "RATE_LIMIT_AUTH_LIMIT"),
            ("rate_limit.key_prefix", "RATE_LIMIT_KEY_PREFIX"),
            ("presence.ttl_secs", "PRESENCE_TTL"),
            (
                "presence.heartbeat_interval_secs",
                "PRESENCE_HEARTBEAT_INTERVAL",
            ),
            ("process.name", "PROCESS_NAME"),
            ("process.shutdown_timeout_ms", "PROCESS_SHUTDOWN_TIMEOUT"),
        ]
        // Note: `web_server.allowed_origins` and `web_server.static_etag`
        // intentionally have no env override in spec §6; they are
        // toml/default-only.
    }
}

/// Look up `<KEY>_<NODE_ENV>` first (if `node_env` is set), falling back to
/// the bare `<KEY>`, per spec §6's override rule.
fn read_env_override(key: &str, node_env: Option<&str>) -> Option<String> {
    if let Some(env) = node_env {
        let suffixed = format!("{key}_{}", env.to_uppercase());
        if let Ok(value) = std::env::var(&suffixed) {
            return Some(value);
        }
    }
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.web_server.port, 8080);
        assert_eq!(config.web_server.host, "localhost");
        assert_eq!(config.session.ttl_secs, 86400);
        assert_eq!(config.session.cookie_name, "__session");
        assert_eq!(config.rate_limit.unauth_limit, 20);
        assert_eq!(config.rate_limit.auth_limit, 200);
        assert_eq!(config.presence.ttl_secs, 90);
        assert_eq!(config.process.shutdown_timeout_ms, 30_000);
    }

    #[test]
    fn node_env_suffix_takes_precedence() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WEB_SERVER_PORT", "1000");
        std::env::set_var("WEB_SERVER_PORT_TEST", "2000");

        let config = AppConfig::load(Some("test")).expect("load");
        assert_eq!(config.web_server.port, 2000);

        std::env::remove_var("WEB_SERVER_PORT");
        std::env::remove_var("WEB_SERVER_PORT_TEST");
    }

    #[test]
    fn unsuffixed_key_used_when_no_override_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SESSION_TTL", "123");
        let config = AppConfig::load(Some("production")).expect("load");
        assert_eq!(config.session.ttl_secs, 123);
        std::env::remove_var("SESSION_TTL");
    }
}
