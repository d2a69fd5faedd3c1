use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 19015;
pub const DEFAULT_BIND: &str = "127.0.0.1";

// Hub limits and timers
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
pub const DEFAULT_MAX_PER_CLIENT: usize = 5;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_REJECTED_TIMEOUT_MS: u64 = 1_000; // flush budget for the single error event
pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 5_000; // slow consumer threshold
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
/// A subscriber's buffer must hold the whole greeting before the stream is
/// read: `connected`, `lastUpdated` and one catch-up `lastUpdated`.
pub const MIN_CHANNEL_CAPACITY: usize = 3;

/// Top-level config (raidsync.toml + RAIDSYNC_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaidsyncConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed to open the event stream from a browser.
    /// Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cors_origins: Vec::new(),
        }
    }
}

/// Limits and timers of the notification hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Global cap on registered connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Cap on registered connections sharing one client key.
    #[serde(default = "default_max_per_client")]
    pub max_per_client: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// A connection is closed once it has been open this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_rejected_timeout_ms")]
    pub rejected_timeout_ms: u64,
    /// Upper bound on a single push to one peer.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    /// Events buffered per connection before pushes start waiting.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Bearer token for POST /api/events/announce. The route is disabled when unset.
    #[serde(default)]
    pub announce_token: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_per_client: DEFAULT_MAX_PER_CLIENT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            rejected_timeout_ms: DEFAULT_REJECTED_TIMEOUT_MS,
            push_timeout_ms: DEFAULT_PUSH_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            announce_token: None,
        }
    }
}

impl NotifyConfig {
    /// Reject values that would make the hub unusable.
    pub fn validate(&self) -> crate::error::Result<()> {
        let zero = [
            ("max_connections", self.max_connections as u64),
            ("max_per_client", self.max_per_client as u64),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("rejected_timeout_ms", self.rejected_timeout_ms),
            ("push_timeout_ms", self.push_timeout_ms),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        if let Some((field, _)) = zero {
            return Err(crate::error::RaidsyncError::Config(format!(
                "notify.{field} must be greater than zero"
            )));
        }
        if self.channel_capacity < MIN_CHANNEL_CAPACITY {
            return Err(crate::error::RaidsyncError::Config(format!(
                "notify.channel_capacity must be at least {MIN_CHANNEL_CAPACITY}"
            )));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}
fn default_max_per_client() -> usize {
    DEFAULT_MAX_PER_CLIENT
}
fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_rejected_timeout_ms() -> u64 {
    DEFAULT_REJECTED_TIMEOUT_MS
}
fn default_push_timeout_ms() -> u64 {
    DEFAULT_PUSH_TIMEOUT_MS
}
fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl RaidsyncConfig {
    /// Load config from a TOML file with RAIDSYNC_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `RAIDSYNC_NOTIFY__MAX_PER_CLIENT=3`.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.raidsync/raidsync.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RaidsyncConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RAIDSYNC_").split("__"))
            .extract()
            .map_err(|e| crate::error::RaidsyncError::Config(e.to_string()))?;

        config.notify.validate()?;
        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.raidsync/raidsync.toml", home)
}
