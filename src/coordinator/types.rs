//! Channel state types.
//!
//! Defines the state machine for the channel lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!            run()
//! Created ─────────→ Connecting ──→ Snapshotting ──→ Replicating
//!                        │               │                │
//!                        └───────────────┴────────────────┘
//!                                        │ (failure, or shutdown signal)
//!                                        ↓
//!                                  ShuttingDown
//!                                   │         │
//!                      (all steps ok)         (any step failed)
//!                                   ↓         ↓
//!                               Stopped     Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `Channel::new()`. No sessions open.
//! - **Connecting**: Opening the four sessions, enabling notifications, subscribing.
//! - **Snapshotting**: Copying every source key.
//! - **Replicating**: Prober running, catch-up loop consuming the feed.
//! - **ShuttingDown**: Sessions being released, prober being joined.
//! - **Stopped**: Clean shutdown after a shutdown request.
//! - **Failed**: A step failed. Restart the process to resume (full snapshot again).

use crate::listener::ListenerStats;
use crate::snapshot::SnapshotStats;

/// State of the channel.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created but not started.
    Created,
    /// Opening sessions and setting up the notification feed.
    Connecting,
    /// Initial SCAN copy in progress.
    Snapshotting,
    /// Catch-up loop running.
    Replicating,
    /// Teardown in progress.
    ShuttingDown,
    /// Shut down cleanly.
    Stopped,
    /// A step failed; the channel cannot continue.
    Failed,
}

impl ChannelState {
    /// True once `run()` has returned.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Created => write!(f, "Created"),
            ChannelState::Connecting => write!(f, "Connecting"),
            ChannelState::Snapshotting => write!(f, "Snapshotting"),
            ChannelState::Replicating => write!(f, "Replicating"),
            ChannelState::ShuttingDown => write!(f, "ShuttingDown"),
            ChannelState::Stopped => write!(f, "Stopped"),
            ChannelState::Failed => write!(f, "Failed"),
        }
    }
}

/// What a clean run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelReport {
    pub snapshot: SnapshotStats,
    pub catch_up: ListenerStats,
}
