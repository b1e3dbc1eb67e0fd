//! Configuration loading and validation
//!
//! Resolution order for the config file:
//! 1. Explicit path (command-line argument)
//! 2. `HRIS_CONFIG` environment variable
//! 3. Platform config file (`~/.config/hris/config.toml`, then `/etc/hris/config.toml`)
//! 4. Compiled defaults
//!
//! A missing file is not an error: the service logs a warning and starts with
//! defaults. A file that exists but fails to parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HRIS_CONFIG";

/// Full service configuration as read from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub geocode: GeocodeConfig,
    pub notification: NotificationConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Time allowed for in-flight writes and background tasks to finish on shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// SQLite database location
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_folder().join("hris.db"),
        }
    }
}

/// Shared publish/subscribe broker settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Redis URL; `None` runs with an in-process broker (single node only)
    pub redis_url: Option<String>,
    /// Well-known channel every process publishes to and subscribes on
    pub channel: String,
    /// Delay before the subscription listener re-subscribes after a failure
    pub reconnect_delay_ms: u64,
    /// Capacity of the hub's delivery queue fed by the subscription listener
    pub delivery_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: "hris:ws:broadcast".to_string(),
            reconnect_delay_ms: 1_000,
            delivery_buffer: 256,
        }
    }
}

impl BrokerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// WebSocket session keepalive and buffering
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for a single outbound write
    pub write_wait_ms: u64,
    /// Read deadline, extended on every pong
    pub pong_wait_ms: u64,
    /// Interval between keepalive pings; must be shorter than `pong_wait_ms`
    pub ping_period_ms: u64,
    /// Largest inbound message accepted from a client, in bytes
    pub max_message_size: usize,
    /// Outbound buffer capacity per connection
    pub send_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait_ms = 60_000;
        Self {
            write_wait_ms: 10_000,
            pong_wait_ms,
            ping_period_ms: pong_wait_ms * 9 / 10,
            max_message_size: 512,
            send_buffer: 256,
        }
    }
}

impl SessionConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

/// Reverse geocoding pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeocodeConfig {
    /// Lookup URL template; `{lat}` and `{lon}` are substituted
    pub nominatim_url: String,
    pub user_agent: String,
    pub request_timeout_ms: u64,
    /// Minimum spacing between consecutive lookups
    pub min_interval_ms: u64,
    pub queue_capacity: usize,
    /// How long a producer waits for queue space before dropping the job
    pub enqueue_timeout_ms: u64,
    pub max_attempts: u32,
    /// Linear backoff step between lookup attempts
    pub retry_backoff_ms: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            nominatim_url:
                "https://nominatim.openstreetmap.org/reverse?format=json&lat={lat}&lon={lon}"
                    .to_string(),
            user_agent: "HRIS-Backend/1.0".to_string(),
            request_timeout_ms: 15_000,
            min_interval_ms: 1_500,
            queue_capacity: 100,
            enqueue_timeout_ms: 2_000,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
        }
    }
}

impl GeocodeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Notification retention
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub purge_interval_secs: u64,
    /// Read notifications older than this are deleted by the purge task
    pub retention_days: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 24 * 60 * 60,
            retention_days: 3,
        }
    }
}

impl NotificationConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl TomlConfig {
    /// Load configuration following the resolution order in the module docs
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(CONFIG_ENV_VAR)
                .ok()
                .map(PathBuf::from)
                .or_else(find_config_file),
        };

        let config = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let session = &self.session;
        if session.ping_period_ms == 0 || session.ping_period_ms >= session.pong_wait_ms {
            return Err(Error::Config(format!(
                "session.ping_period_ms ({}) must be non-zero and below session.pong_wait_ms ({})",
                session.ping_period_ms, session.pong_wait_ms
            )));
        }
        if session.send_buffer == 0 {
            return Err(Error::Config("session.send_buffer must be at least 1".to_string()));
        }
        if session.max_message_size == 0 {
            return Err(Error::Config(
                "session.max_message_size must be at least 1".to_string(),
            ));
        }
        if self.broker.delivery_buffer == 0 {
            return Err(Error::Config(
                "broker.delivery_buffer must be at least 1".to_string(),
            ));
        }

        let geocode = &self.geocode;
        if geocode.queue_capacity == 0 {
            return Err(Error::Config(
                "geocode.queue_capacity must be at least 1".to_string(),
            ));
        }
        if geocode.max_attempts == 0 {
            return Err(Error::Config(
                "geocode.max_attempts must be at least 1".to_string(),
            ));
        }
        if !geocode.nominatim_url.contains("{lat}") || !geocode.nominatim_url.contains("{lon}") {
            return Err(Error::Config(
                "geocode.nominatim_url must contain {lat} and {lon} placeholders".to_string(),
            ));
        }

        if self.notification.retention_days < 0 {
            return Err(Error::Config(
                "notification.retention_days cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// First existing platform config file, if any
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("hris").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/hris/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hris"))
        .unwrap_or_else(|| PathBuf::from("./hris_data"))
}
