//! Search Sessions
//!
//! Client-side orchestration for long-running backend searches:
//! - Submit-once/poll-until-done drivers with cooperative cancellation and timeouts
//! - A bounded response cache that deduplicates identical in-flight searches
//! - Search sessions: grouping, background save, restore
//! - A monitoring sweep reconciling persisted sessions against the backend

pub mod backend;
pub mod search;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use search::interceptor::SearchConfig;
use search::{
    NotificationSink, SearchError, SearchInterceptor, SearchOptions, SearchRequest, SearchStream,
    SessionSearchInterceptor, TimeoutMode,
};
use serde::Deserialize;
use session::{MonitorConfig, SessionService, SessionStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub backend: BackendYamlConfig,
    pub search: SearchYamlConfig,
    pub sessions: SessionsYamlConfig,
}

/// Backend engine section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendYamlConfig {
    pub base_url: String,
}

impl Default for BackendYamlConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5601".into(),
        }
    }
}

/// Search behavior section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchYamlConfig {
    /// Per-request timeout, in seconds
    pub timeout_secs: u64,
    /// Delay between poll attempts, in milliseconds
    pub poll_interval_ms: u64,
    /// Response cache entry bound
    pub cache_max_items: usize,
    /// Response cache aggregate size bound, in megabytes
    pub cache_max_size_mb: usize,
    /// What the deployment can do about timeouts: "upgrade", "contact" or
    /// "change"
    pub timeout_mode: String,
    /// Cool-down window for the timeout toast, in seconds
    pub notification_window_secs: u64,
}

impl Default for SearchYamlConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            poll_interval_ms: 1000,
            cache_max_items: 50,
            cache_max_size_mb: 10,
            timeout_mode: "contact".into(),
            notification_window_secs: 30,
        }
    }
}

/// Search sessions section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsYamlConfig {
    pub enabled: bool,
    /// Delay between monitoring sweeps, in seconds
    pub monitor_interval_secs: u64,
    /// How long a stored session stays restorable, in days
    pub expiry_days: i64,
}

impl Default for SessionsYamlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor_interval_secs: 10,
            expiry_days: 7,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub search_timeout: Duration,
    pub poll_interval: Duration,
    pub cache_max_items: usize,
    pub cache_max_size_mb: usize,
    pub timeout_mode: TimeoutMode,
    pub notification_window: Duration,
    pub sessions_enabled: bool,
    pub monitor_interval: Duration,
    pub session_expiry_days: i64,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env
    /// vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file
    /// doesn't exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let timeout_secs = env_parse("SEARCH_TIMEOUT_SECS").unwrap_or(yaml.search.timeout_secs);
        let poll_interval_ms =
            env_parse("SEARCH_POLL_INTERVAL_MS").unwrap_or(yaml.search.poll_interval_ms);
        let sessions_enabled =
            env_parse("SEARCH_SESSIONS_ENABLED").unwrap_or(yaml.sessions.enabled);

        Ok(Self {
            backend_url: std::env::var("SEARCH_BACKEND_URL").unwrap_or(yaml.backend.base_url),
            search_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            cache_max_items: yaml.search.cache_max_items,
            cache_max_size_mb: yaml.search.cache_max_size_mb,
            timeout_mode: parse_timeout_mode(&yaml.search.timeout_mode),
            notification_window: Duration::from_secs(yaml.search.notification_window_secs),
            sessions_enabled,
            monitor_interval: Duration::from_secs(yaml.sessions.monitor_interval_secs),
            session_expiry_days: yaml.sessions.expiry_days,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any
    /// failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Interceptor tunables derived from this config.
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            timeout: self.search_timeout,
            poll_interval: self.poll_interval,
            timeout_mode: self.timeout_mode,
            notification_window: self.notification_window,
            cache_max_items: self.cache_max_items,
            cache_max_size_mb: self.cache_max_size_mb,
        }
    }

    /// Monitoring-task settings derived from this config.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.monitor_interval,
            enabled: self.sessions_enabled,
        }
    }

    /// Stored-session lifetime derived from this config.
    pub fn session_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_expiry_days)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

fn parse_timeout_mode(value: &str) -> TimeoutMode {
    match value.to_ascii_lowercase().as_str() {
        "upgrade" => TimeoutMode::Upgrade,
        "change" => TimeoutMode::Change,
        "contact" => TimeoutMode::Contact,
        other => {
            tracing::warn!("Unknown timeout_mode '{}', using 'contact'", other);
            TimeoutMode::Contact
        }
    }
}

// ============================================================================
// Top-level assembly
// ============================================================================

/// The assembled search core: interceptor, session service and their shared
/// collaborators, constructed once at process start and handed to every
/// consumer.
#[derive(Clone)]
pub struct SearchCore {
    interceptor: Arc<SessionSearchInterceptor>,
    session: Arc<SessionService>,
    sink: Arc<dyn NotificationSink>,
    config: Arc<Config>,
}

impl SearchCore {
    pub fn new(
        config: Config,
        backend: Arc<dyn backend::SearchBackend>,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let session = Arc::new(SessionService::new(store, config.session_expiry()));
        let interceptor = Arc::new(SessionSearchInterceptor::new(
            backend,
            session.clone(),
            sink.clone(),
            config.search_config(),
        ));
        Self {
            interceptor,
            session,
            sink,
            config: Arc::new(config),
        }
    }

    /// Issue a search through the interceptor.
    pub fn search(&self, request: SearchRequest, options: SearchOptions) -> SearchStream {
        self.interceptor.search(request, options)
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    pub fn interceptor(&self) -> &Arc<SessionSearchInterceptor> {
        &self.interceptor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// In-flight search counter for a global loading indicator.
    pub fn pending_count(&self) -> watch::Receiver<usize> {
        self.interceptor.pending_count()
    }

    /// Present a classified search failure to the user.
    ///
    /// Cancellations are always silent, and timeouts were already surfaced by
    /// the interceptor's gated toast. `suppress` is the caller's opt-out for
    /// everything else.
    pub fn show_error(&self, err: &SearchError, suppress: bool) {
        match err {
            SearchError::Cancelled | SearchError::Timeout { .. } => {}
            _ if suppress => {}
            SearchError::Script { reason } => {
                self.sink.show_error("Search returned an error", reason);
            }
            other => {
                self.sink.show_error("Search error", &other.to_string());
            }
        }
    }

    /// Abort every in-flight search and drop cached responses.
    pub fn stop(&self) {
        self.interceptor.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
