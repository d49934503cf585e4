//! Shared test utilities for replication and integration tests.
//!
//! This module provides:
//! - In-memory stores, sessions and a session factory
//! - Redis testcontainer setup
//! - Polling helpers for asynchronous assertions

pub mod containers;
pub mod mock_store;

pub use containers::*;
pub use mock_store::*;

use rds_channel::config::{Address, ChannelConfig};
use std::time::Duration;

pub fn source_address() -> Address {
    Address::new("source.test", 6379)
}

pub fn destination_address() -> Address {
    Address::new("destination.test", 6379)
}

/// Config against the mock addresses with a short, CI-tolerant heartbeat.
pub fn mock_config(prefix: &str) -> ChannelConfig {
    let mut config = ChannelConfig::for_testing(source_address(), destination_address(), prefix);
    config.heartbeat.interval = "200ms".to_string();
    config
}

/// Poll `condition` every 10ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
