//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines, for production log shipping.
    Json,
    /// Human-readable output.
    #[default]
    Pretty,
}

/// Fan-out strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Debounced full `userList` snapshot per viewer.
    #[default]
    Snapshot,
    /// Pub/sub delta frames per subscribed target.
    Delta,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Periodic backup configuration.
    #[serde(default)]
    pub backup: BackupConfig,
    /// Fan-out configuration.
    #[serde(default)]
    pub fanout: FanoutConfig,
    /// Presence cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Identity provider configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "glimpse.example.net").
    pub name: String,
    /// Prometheus metrics HTTP port. 0 disables the endpoint (used by tests).
    pub metrics_port: Option<u16>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:4090").
    pub address: SocketAddr,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or ":memory:".
    pub path: String,
}

/// Periodic store snapshot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Whether periodic backups run.
    #[serde(default)]
    pub enabled: bool,
    /// Directory receiving snapshot files.
    #[serde(default = "default_backup_dir")]
    pub directory: String,
    /// Hours between snapshots.
    #[serde(default = "default_backup_interval_hours")]
    pub interval_hours: u64,
    /// Snapshots retained; older ones are deleted.
    #[serde(default = "default_backup_retain")]
    pub retain: usize,
    /// Seconds to wait after startup before the first snapshot.
    #[serde(default = "default_backup_startup_delay")]
    pub startup_delay_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_backup_dir(),
            interval_hours: default_backup_interval_hours(),
            retain: default_backup_retain(),
            startup_delay_secs: default_backup_startup_delay(),
        }
    }
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

fn default_backup_interval_hours() -> u64 {
    6
}

fn default_backup_retain() -> usize {
    5
}

fn default_backup_startup_delay() -> u64 {
    5
}

/// Fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Snapshot or delta mode. Snapshot is always safe; delta requires
    /// clients that merge `u`/`o`/`x` frames.
    #[serde(default)]
    pub mode: FanoutMode,
    /// Debounce window in milliseconds; multiple changes inside one window
    /// produce at most one broadcast per viewer.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Days an offline contact stays in snapshots.
    #[serde(default = "default_offline_window_days")]
    pub offline_window_days: i64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            mode: FanoutMode::default(),
            debounce_ms: default_debounce_ms(),
            offline_window_days: default_offline_window_days(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_offline_window_days() -> i64 {
    7
}

/// Presence cache configuration.
///
/// The cache is in-process. `endpoint` is accepted for deployment parity but
/// an external endpoint is not contacted; when set it is logged and the
/// in-process structures are used regardless. Correctness never depends on
/// the cache (see DESIGN.md).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Optional external cache endpoint. Logged and ignored.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Lifetime of one-time resume tokens.
    #[serde(default = "default_resume_ttl")]
    pub resume_ttl_secs: u64,
    /// Lifetime of a presence record without a heartbeat refresh.
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_secs: u64,
    /// Lifetime of a cached per-viewer contact list.
    #[serde(default = "default_contact_ttl")]
    pub contact_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            resume_ttl_secs: default_resume_ttl(),
            presence_ttl_secs: default_presence_ttl(),
            contact_ttl_secs: default_contact_ttl(),
        }
    }
}

fn default_resume_ttl() -> u64 {
    60
}

fn default_presence_ttl() -> u64 {
    45
}

fn default_contact_ttl() -> u64 {
    300
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Base URL of the provider's REST API.
    #[serde(default = "default_identity_base_url")]
    pub base_url: String,
    /// Per-call timeout; on timeout the login degrades to guest.
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_identity_base_url(),
            timeout_secs: default_identity_timeout(),
        }
    }
}

fn default_identity_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_identity_timeout() -> u64 {
    5
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between sweep passes. A session missing two consecutive
    /// sweeps is dead.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Seconds between batched last-seen flushes to the store.
    #[serde(default = "default_last_seen_flush")]
    pub last_seen_flush_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            last_seen_flush_secs: default_last_seen_flush(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_last_seen_flush() -> u64 {
    30
}

/// Sliding-minute rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Connection attempts allowed per peer address per minute.
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Frames allowed per user per minute after admission.
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            messages_per_minute: default_messages_per_minute(),
        }
    }
}

fn default_connections_per_minute() -> u32 {
    5
}

fn default_messages_per_minute() -> u32 {
    60
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Validate a loaded configuration, returning every problem found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push("server.name must not be empty".to_string());
    }
    if config.fanout.debounce_ms == 0 {
        errors.push("fanout.debounce_ms must be positive".to_string());
    }
    if config.fanout.offline_window_days <= 0 {
        errors.push("fanout.offline_window_days must be positive".to_string());
    }
    if config.heartbeat.interval_secs == 0 {
        errors.push("heartbeat.interval_secs must be positive".to_string());
    }
    if config.rate_limits.connections_per_minute == 0 {
        errors.push("rate_limits.connections_per_minute must be positive".to_string());
    }
    if config.rate_limits.messages_per_minute == 0 {
        errors.push("rate_limits.messages_per_minute must be positive".to_string());
    }
    if config.backup.enabled && config.backup.directory.is_empty() {
        errors.push("backup.directory must not be empty when backups are enabled".to_string());
    }
    if config.backup.enabled && config.backup.retain == 0 {
        errors.push("backup.retain must be positive when backups are enabled".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [server]
            name = "test.glimpse"
            metrics_port = 0

            [listen]
            address = "127.0.0.1:4090"

            [database]
            path = ":memory:"
        "#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.fanout.mode, FanoutMode::Snapshot);
        assert_eq!(config.fanout.debounce_ms, 2000);
        assert_eq!(config.cache.resume_ttl_secs, 60);
        assert_eq!(config.cache.presence_ttl_secs, 45);
        assert_eq!(config.cache.contact_ttl_secs, 300);
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.rate_limits.connections_per_minute, 5);
        assert_eq!(config.rate_limits.messages_per_minute, 60);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn delta_mode_and_overrides_parse() {
        let toml = r#"
            [server]
            name = "test.glimpse"

            [listen]
            address = "127.0.0.1:4090"

            [database]
            path = ":memory:"

            [fanout]
            mode = "delta"
            debounce_ms = 500

            [cache]
            resume_ttl_secs = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.fanout.mode, FanoutMode::Delta);
        assert_eq!(config.fanout.debounce_ms, 500);
        assert_eq!(config.cache.resume_ttl_secs, 10);
    }

    #[test]
    fn validation_collects_all_errors() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.server.name.clear();
        config.fanout.debounce_ms = 0;
        config.rate_limits.messages_per_minute = 0;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
