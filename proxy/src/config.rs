//! Configuration for the proxy.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer};

use ollama_proxy_scheduler::{Backend, DEFAULT_AFFINITY_WINDOW, DEFAULT_CAPACITY};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Backends in scheduling order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Scheduling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Prefer backends with the requested model still loaded.
    #[default]
    ModelAffinity,
    /// Plain least-occupied backend, ignoring models.
    ShortestQueue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub strategy: Strategy,
    /// Concurrent in-flight requests per backend (default: 1).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// How long a request waits for capacity. 0 waits without bound.
    #[serde(default)]
    pub admission_timeout_ms: u64,
    /// Time after a completion before a backend counts as warm for its model.
    #[serde(default = "default_affinity_window")]
    pub affinity_window_secs: u64,
}

impl SchedulerConfig {
    /// Admission timeout, `None` meaning wait forever.
    pub fn admission_timeout(&self) -> Option<Duration> {
        (self.admission_timeout_ms > 0).then(|| Duration::from_millis(self.admission_timeout_ms))
    }

    pub fn affinity_window(&self) -> Duration {
        Duration::from_secs(self.affinity_window_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_in_flight: default_max_in_flight(),
            admission_timeout_ms: 0,
            affinity_window_secs: default_affinity_window(),
        }
    }
}

/// Timeouts for requests forwarded to backends.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Longest silence between two reads from a backend. Long streamed
    /// generations are fine as long as chunks keep arriving.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Skip authentication entirely.
    #[serde(default)]
    pub disabled: bool,
    /// File with one `user:key` pair per line.
    #[serde(default = "default_users_file")]
    pub users_file: String,
    /// HS256 secret for user tokens. Tokens are rejected when unset.
    #[serde(default)]
    pub jwt_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            users_file: default_users_file(),
            jwt_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One backend server.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub url: String,
    /// Models allowed here. Either a list or a JSON-encoded list.
    #[serde(default, deserialize_with = "model_list")]
    pub model_white_list: Vec<String>,
    /// Models refused here. Either a list or a JSON-encoded list.
    #[serde(default, deserialize_with = "model_list")]
    pub model_black_list: Vec<String>,
}

impl BackendConfig {
    pub fn to_backend(&self) -> Backend {
        Backend::new(&self.name, &self.url)
            .with_whitelist(self.model_white_list.iter().cloned())
            .with_blacklist(self.model_black_list.iter().cloned())
    }
}

/// Accepts `["a", "b"]` as well as the JSON string `'["a", "b"]'`.
fn model_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModelList {
        List(Vec<String>),
        Encoded(String),
    }

    match ModelList::deserialize(deserializer)? {
        ModelList::List(models) => Ok(models),
        ModelList::Encoded(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        ModelList::Encoded(raw) => serde_json::from_str::<Option<Vec<String>>>(&raw)
            .map(Option::unwrap_or_default)
            .map_err(|e| serde::de::Error::custom(format!("invalid model list '{}': {}", raw, e))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("Duplicate backend name: {0}")]
    DuplicateBackend(String),
    #[error("Backend '{0}' has no url")]
    MissingUrl(String),
    #[error("scheduler.max_in_flight must be at least 1")]
    InvalidCapacity,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_in_flight() -> usize {
    DEFAULT_CAPACITY
}
fn default_affinity_window() -> u64 {
    DEFAULT_AFFINITY_WINDOW.as_secs()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_read_timeout() -> u64 {
    120
}
fn default_users_file() -> String {
    "authorized_users.txt".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (PROXY__SECTION__KEY format)
    /// 2. The file named by `path`, else `$PROXY_CONFIG`, else `config.toml` (if present)
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path
            .map(str::to_string)
            .or_else(|| env::var("PROXY_CONFIG").ok())
            .unwrap_or_else(|| "config".to_string());

        let config = ConfigLoader::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("PROXY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        Self::finish(config)
    }

    fn finish(config: ConfigLoader) -> Result<Self, ConfigError> {
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_in_flight == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::DuplicateBackend(backend.name.clone()));
            }
            if backend.url.trim().is_empty() {
                return Err(ConfigError::MissingUrl(backend.name.clone()));
            }
        }
        Ok(())
    }

    /// Scheduler backends in configuration order.
    pub fn backends(&self) -> Vec<Backend> {
        self.backends.iter().map(BackendConfig::to_backend).collect()
    }
}
