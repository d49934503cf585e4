// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change listener: keyspace notifications to key transfers.
//!
//! # State Machine
//!
//! ```text
//! Setup ──► Armed ──► (receive) ──┬── heartbeat ──► log, continue
//!                        ▲        ├── deletion  ──► ignore, continue
//!                        │        └── mutation  ──► transfer_key
//!                        └───────────────┘ ok
//!
//! any failure (timeout, closed feed, malformed event, transfer) ──► return Err
//! shutdown signal ──► return Ok(stats)
//! ```
//!
//! Setup runs on the notification session: `CONFIG SET
//! notify-keyspace-events` then one PSUBSCRIBE per pattern. Once armed, the
//! read timeout is the watchdog window; the prober guarantees at least one
//! message per heartbeat interval on a healthy feed, so a timeout means the
//! feed is stale.
//!
//! Transfers read from the *source* session. The notification session is in
//! subscription mode and cannot issue DUMP.
//!
//! Deletions are not propagated. The destination keeps the last copied
//! value of a deleted key.

use crate::config::HeartbeatConfig;
use crate::error::{ChannelError, Result};
use crate::event::{classify, EventClass};
use crate::metrics;
use crate::session::{NotificationSession, StoreSession};
use crate::transfer::{transfer_key, TransferOutcome};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counters for one catch-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub events: u64,
    pub heartbeats: u64,
    pub deletions_ignored: u64,
    pub copied: u64,
    pub missing: u64,
}

/// Enable keyspace notifications on the source.
pub async fn enable_notifications<N>(session: &mut N, flags: &str) -> Result<()>
where
    N: NotificationSession + ?Sized,
{
    session.enable_notifications(flags).await.map_err(|e| {
        error!(flags, error = %e, "Failed to enable keyspace notifications");
        e
    })?;
    info!(flags, "Keyspace notifications enabled");
    Ok(())
}

/// Pattern-subscribe to every pattern, in order.
pub async fn subscribe_for_events<N>(session: &mut N, patterns: &[String]) -> Result<()>
where
    N: NotificationSession + ?Sized,
{
    for pattern in patterns {
        session.psubscribe(pattern).await.map_err(|e| {
            error!(pattern = %pattern, error = %e, "Failed to subscribe");
            e
        })?;
        debug!(pattern = %pattern, "Subscribed");
    }
    info!(patterns = ?patterns, "Subscribed to event channels");
    Ok(())
}

/// Consume the notification feed until failure or shutdown.
///
/// Arms the watchdog (read timeout = `heartbeat.watchdog_window()`), then
/// processes events strictly in delivery order. Returns `Ok` only when
/// `shutdown_rx` fires.
pub async fn catch_up<N, S, D>(
    notifications: &mut N,
    source: &mut S,
    destination: &mut D,
    prefix: &[u8],
    heartbeat: &HeartbeatConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<ListenerStats>
where
    N: NotificationSession + ?Sized,
    S: StoreSession + ?Sized,
    D: StoreSession + ?Sized,
{
    let window = heartbeat.watchdog_window();
    let span = info_span!("catch_up", watchdog_ms = window.as_millis() as u64);

    async move {
        notifications.set_read_timeout(Some(window));
        info!("Catch-up loop armed");

        let mut stats = ListenerStats::default();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received");
                return Ok(stats);
            }

            let received = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received during receive");
                        return Ok(stats);
                    }
                    continue;
                }

                received = notifications.next_event() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e @ ChannelError::HeartbeatTimeout { .. }) => {
                    metrics::record_heartbeat_timeout();
                    error!(error = %e, "Replication stale, no heartbeat observed within the watchdog window");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Notification feed failed");
                    return Err(e);
                }
            };

            stats.events += 1;
            let class = classify(&message, &heartbeat.channel).map_err(|e| {
                error!(error = %e, "Malformed keyspace event");
                e
            })?;
            metrics::record_event(class.label());

            match class {
                EventClass::Heartbeat => {
                    stats.heartbeats += 1;
                    debug!("Heartbeat");
                }
                EventClass::Deletion { key } => {
                    stats.deletions_ignored += 1;
                    debug!(key = %String::from_utf8_lossy(&key), "Deletion not propagated");
                }
                EventClass::Mutation { op, key } => {
                    debug!(op = %op, key = %String::from_utf8_lossy(&key), "Mutation");
                    match transfer_key(destination, source, &key, prefix).await {
                        Ok(TransferOutcome::Copied { bytes }) => {
                            stats.copied += 1;
                            metrics::record_key_copied("catch_up", bytes);
                        }
                        Ok(TransferOutcome::Missing) => {
                            stats.missing += 1;
                            metrics::record_key_missing("catch_up");
                        }
                        Err(e) => {
                            metrics::record_transfer_failure("catch_up");
                            warn!(op = %op, error = %e, "Transfer failed, leaving catch-up loop");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}
