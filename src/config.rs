//! Configuration for the replication channel.
//!
//! This module defines everything needed to run a [`Channel`](crate::Channel).
//! Configuration is usually built by the `rds-channel` binary from its
//! positional arguments, but it can also be constructed programmatically or
//! deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use rds_channel::config::{Address, ChannelConfig};
//!
//! let config = ChannelConfig {
//!     source: Address::new("10.0.0.5", 6379),
//!     destination: Address::new("127.0.0.1", 6380),
//!     prefix: "stage:".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ChannelConfig
//! ├── source: Address              # Store being replicated
//! ├── destination: Address         # Store receiving prefix+key copies
//! ├── prefix: String               # Prepended to every destination key
//! ├── heartbeat: HeartbeatConfig   # Prober channel, interval, watchdog factor
//! ├── snapshot: SnapshotConfig     # SCAN page size
//! ├── notifications: NotificationConfig # CONFIG SET flags + PSUBSCRIBE pattern
//! └── session: SessionConfig       # Connect and prober join timeouts
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source": { "host": "10.0.0.5", "port": 6379 },
//!   "destination": { "host": "127.0.0.1", "port": 6380 },
//!   "prefix": "stage:",
//!   "heartbeat": { "interval": "10s" }
//! }
//! ```

use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default Redis port, used for both ends when not given.
pub const DEFAULT_PORT: u16 = 6379;

/// Default destination host.
pub const DEFAULT_DESTINATION_HOST: &str = "127.0.0.1";

// ═══════════════════════════════════════════════════════════════════════════════
// Address: one store endpoint
// ═══════════════════════════════════════════════════════════════════════════════

/// A store endpoint. Immutable once the channel starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connection URL understood by `redis::Client::open`.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    /// Parse a port argument, accepting only 1..=65535.
    pub fn parse_port(raw: &str) -> Option<u16> {
        match raw.trim().parse::<u32>() {
            Ok(port) if (1..=u16::MAX as u32).contains(&port) => Some(port as u16),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new(DEFAULT_DESTINATION_HOST, DEFAULT_PORT)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to Channel::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Channel::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Store to replicate from. The source, notification and heartbeat
    /// sessions all connect here.
    pub source: Address,

    /// Store to replicate into.
    #[serde(default)]
    pub destination: Address,

    /// Prepended byte-for-byte to every destination key. May be empty.
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            source: Address::new("localhost", DEFAULT_PORT),
            destination: Address::default(),
            prefix: String::new(),
            heartbeat: HeartbeatConfig::default(),
            snapshot: SnapshotConfig::default(),
            notifications: NotificationConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Create a config with fast timings for testing.
    pub fn for_testing(source: Address, destination: Address, prefix: &str) -> Self {
        Self {
            source,
            destination,
            prefix: prefix.to_string(),
            heartbeat: HeartbeatConfig {
                interval: "50ms".to_string(),
                ..Default::default()
            },
            snapshot: SnapshotConfig { page_size: 2 },
            notifications: NotificationConfig::default(),
            session: SessionConfig {
                connect_timeout: "1s".to_string(),
                prober_join_timeout: "1s".to_string(),
            },
        }
    }

    /// Load a config from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ChannelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Patterns the notification session subscribes to, in order.
    pub fn subscription_patterns(&self) -> Vec<String> {
        vec![
            self.notifications.key_pattern.clone(),
            self.heartbeat.channel.clone(),
        ]
    }

    /// Reject configurations the channel cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (role, address) in [("source", &self.source), ("destination", &self.destination)] {
            if address.host.trim().is_empty() {
                return Err(ChannelError::Config(format!("{role} host is empty")));
            }
            if address.port == 0 {
                return Err(ChannelError::Config(format!("{role} port out of range")));
            }
        }
        if self.heartbeat.interval_duration().is_zero() {
            return Err(ChannelError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.heartbeat.watchdog_factor == 0 {
            return Err(ChannelError::Config("watchdog factor must be at least 1".into()));
        }
        if self.heartbeat.channel.is_empty() {
            return Err(ChannelError::Config("heartbeat channel is empty".into()));
        }
        if self.snapshot.page_size == 0 {
            return Err(ChannelError::Config("scan page size must be non-zero".into()));
        }
        if self.notifications.flags.is_empty() {
            return Err(ChannelError::Config("notification flags are empty".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HeartbeatConfig: liveness prober and watchdog
// ═══════════════════════════════════════════════════════════════════════════════

/// Liveness prober settings.
///
/// The prober publishes `marker` on `channel` every `interval`. The
/// catch-up loop fails if nothing arrives for `interval * watchdog_factor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Pub/sub channel the prober publishes on.
    #[serde(default = "default_heartbeat_channel")]
    pub channel: String,

    /// Literal payload of every heartbeat.
    #[serde(default = "default_heartbeat_marker")]
    pub marker: String,

    /// Publish interval as a duration string (e.g., "10s").
    #[serde(default = "default_heartbeat_interval")]
    pub interval: String,

    /// Watchdog window as a multiple of the interval.
    #[serde(default = "default_watchdog_factor")]
    pub watchdog_factor: u32,
}

fn default_heartbeat_channel() -> String {
    "heartbeat".to_string()
}

fn default_heartbeat_marker() -> String {
    "1".to_string()
}

fn default_heartbeat_interval() -> String {
    "10s".to_string()
}

fn default_watchdog_factor() -> u32 {
    2
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            channel: default_heartbeat_channel(),
            marker: default_heartbeat_marker(),
            interval: default_heartbeat_interval(),
            watchdog_factor: default_watchdog_factor(),
        }
    }
}

impl HeartbeatConfig {
    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(10))
    }

    /// Read timeout armed on the notification session.
    pub fn watchdog_window(&self) -> Duration {
        self.interval_duration()
            .saturating_mul(self.watchdog_factor.max(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SnapshotConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Initial snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// COUNT hint passed to SCAN. Redis uses 10 when none is given.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    10
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NotificationConfig: keyspace event feed
// ═══════════════════════════════════════════════════════════════════════════════

/// Keyspace notification settings for the source store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Value written to `notify-keyspace-events`.
    /// "EA" = keyevent channels for all command classes.
    #[serde(default = "default_notify_flags")]
    pub flags: String,

    /// PSUBSCRIBE pattern matching the keyspace and keyevent channels.
    #[serde(default = "default_key_pattern")]
    pub key_pattern: String,
}

fn default_notify_flags() -> String {
    "EA".to_string()
}

fn default_key_pattern() -> String {
    "__key*__:*".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            flags: default_notify_flags(),
            key_pattern: default_key_pattern(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SessionConfig: connection lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on establishing each session (e.g., "5s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// How long teardown waits for the prober before aborting it.
    #[serde(default = "default_prober_join_timeout")]
    pub prober_join_timeout: String,
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_prober_join_timeout() -> String {
    "5s".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            prober_join_timeout: default_prober_join_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn prober_join_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.prober_join_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
