//! # rds-channel
//!
//! Continuous one-way replication from one Redis-compatible store into
//! another, with every key remapped under a prefix.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── source store ────────────────────────────┐
//! │   keyspace            __keyevent@0__:<op>        heartbeat channel   │
//! └──────┬──────────────────────────┬─────────────────────────▲──────────┘
//!        │ SCAN / DUMP              │ PSUBSCRIBE              │ PUBLISH
//!  ┌─────┴──────┐           ┌───────┴────────┐        ┌───────┴────────┐
//!  │  source    │◄── key ───│  notification  │        │   heartbeat    │
//!  │  session   │           │  session       │        │   (prober)     │
//!  └─────┬──────┘           └────────────────┘        └────────────────┘
//!        │ blob
//!  ┌─────▼──────┐  MULTI; DEL p+k; RESTORE p+k 0 blob; EXEC
//!  │destination │──────────────────────────────────► destination store
//!  │  session   │
//!  └────────────┘
//! ```
//!
//! ## Two Phases
//!
//! 1. **Snapshot**: SCAN the whole source, DUMP/RESTORE every key.
//! 2. **Catch-up**: follow keyspace notifications and re-copy each mutated
//!    key. A heartbeat published every interval proves the feed is alive;
//!    silence for twice the interval fails the channel.
//!
//! Nothing is retried. A failed channel is restarted from scratch by
//! whatever supervises the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rds_channel::{Address, Channel, ChannelConfig, RedisSessionFactory};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChannelConfig {
//!         source: Address::new("10.0.0.5", 6379),
//!         destination: Address::new("127.0.0.1", 6379),
//!         prefix: "stage:".into(),
//!         ..Default::default()
//!     };
//!     let factory = RedisSessionFactory::new(config.session.connect_timeout_duration());
//!     let mut channel = Channel::new(config, factory);
//!
//!     let trigger = channel.shutdown_trigger();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         trigger.trigger();
//!     });
//!
//!     if let Err(e) = channel.run().await {
//!         eprintln!("channel failed: {e}");
//!     }
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod listener;
pub mod metrics;
pub mod session;
pub mod snapshot;
pub mod transfer;

// Re-exports for convenience
pub use config::{Address, ChannelConfig, HeartbeatConfig, NotificationConfig, SessionConfig, SnapshotConfig};
pub use coordinator::{Channel, ChannelReport, ChannelState, ShutdownTrigger};
pub use error::{ChannelError, Result};
pub use event::{classify, EventClass, KeyspaceMessage};
pub use session::{
    NotificationSession, RedisSessionFactory, SessionFactory, SessionRole, StoreSession,
};
pub use transfer::{destination_key, transfer_key, TransferOutcome};
