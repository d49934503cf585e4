// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication channel.
//!
//! Every component operation returns [`Result`]; only the channel
//! coordinator decides whether a failure tears the whole channel down.
//! Nothing is retried. An operator (or supervisor) restarts the process,
//! which always begins again with a full snapshot.
//!
//! # Error Categories
//!
//! | Error Type | Fatal for | Description |
//! |------------|-----------|-------------|
//! | `Connection` | startup | A session could not be opened |
//! | `Redis` | the enclosing step | A command returned no reply, or I/O failed |
//! | `Transaction` | the key transfer | One or more pipelined steps got no reply |
//! | `HeartbeatTimeout` | catch-up loop | Nothing arrived within the watchdog window |
//! | `FeedClosed` | catch-up loop | The subscription stream ended |
//! | `Protocol` | the enclosing step | Malformed reply or event |
//! | `Config` | startup | Configuration invalid |
//! | `InvalidState` | caller | Channel run twice |
//!
//! A key that vanished between SCAN and DUMP is *not* an error; see
//! [`TransferOutcome::Missing`](crate::transfer::TransferOutcome::Missing).

use std::time::Duration;
use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A session failed to open.
    #[error("Connection error ({role} session to {address}): {message}")]
    Connection {
        role: String,
        address: String,
        message: String,
    },

    /// Redis command error or missing reply.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A MULTI/DEL/RESTORE/EXEC batch was missing one or more replies.
    #[error("Transaction for {key} failed at: {}", failed_steps.join(", "))]
    Transaction {
        key: String,
        failed_steps: Vec<&'static str>,
    },

    /// No event (heartbeat included) arrived within the watchdog window.
    #[error("Replication stale: no heartbeat observed within {}", humantime::format_duration(*window))]
    HeartbeatTimeout { window: Duration },

    /// The notification stream ended.
    #[error("Notification feed closed")]
    FeedClosed,

    /// Malformed reply or keyspace event.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted in the wrong channel state.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl ChannelError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error for a session role.
    pub fn connection(
        role: impl ToString,
        address: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            role: role.to_string(),
            address: address.to_string(),
            message: message.into(),
        }
    }

    /// True if the notification feed can no longer be trusted to be live.
    pub fn is_stale_feed(&self) -> bool {
        matches!(self, Self::HeartbeatTimeout { .. } | Self::FeedClosed)
    }
}
