use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::SqliteChannelOptions;
pub use crate::worker::{RetryConfig, WorkerConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
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

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("turnstile.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Request channel backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelBackend {
    /// Durable queue in the service database.
    #[default]
    Sqlite,
    /// In-process queue; queued requests are lost on restart.
    Memory,
}

/// Request channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub backend: ChannelBackend,
    /// How often idle consumers look for new messages (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long a delivered message stays leased before redelivery (seconds).
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backend: ChannelBackend::default(),
            poll_interval_ms: default_poll_interval(),
            lease_secs: default_lease(),
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Options for the SQLite backend.
    pub fn sqlite_options(&self, database: &DatabaseConfig) -> SqliteChannelOptions {
        SqliteChannelOptions {
            poll_interval: self.poll_interval(),
            lease: Duration::from_secs(self.lease_secs),
            busy_timeout: database.busy_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    200
}

fn default_lease() -> u64 {
    30
}
