//! Liveness prober.
//!
//! Publishes the heartbeat marker on the heartbeat channel every interval,
//! on its own session, so the catch-up loop sees traffic on a healthy feed
//! even when nothing is being written to the source.
//!
//! The prober stops when the shutdown signal fires or when a publish fails.
//! A failed publish is not reported: the catch-up loop notices the missing
//! heartbeats through its watchdog.

use crate::config::HeartbeatConfig;
use crate::metrics;
use crate::session::StoreSession;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

/// Why the prober stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberExit {
    /// Shutdown was signalled.
    Stopped,
    /// A publish failed.
    PublishFailed,
}

/// Publish heartbeats until shutdown or the first failed publish.
///
/// Takes ownership of the session; it is released when this returns.
pub async fn run_prober<S: StoreSession>(
    mut session: S,
    config: HeartbeatConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ProberExit {
    let interval = config.interval_duration();
    let mut published: u64 = 0;
    info!(channel = %config.channel, interval_ms = interval.as_millis() as u64, "Starting heartbeat prober");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Err(e) = session.publish(&config.channel, &config.marker).await {
            debug!(error = %e, published, "Heartbeat publish failed, prober exiting");
            return ProberExit::PublishFailed;
        }
        published += 1;
        metrics::record_heartbeat_published();

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(published, "Heartbeat prober stopped");
    ProberExit::Stopped
}

/// Spawn [`run_prober`] as a background task.
pub fn spawn_prober<S: StoreSession>(
    session: S,
    config: HeartbeatConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<ProberExit> {
    let span = info_span!("heartbeat", channel = %config.channel);
    tokio::spawn(run_prober(session, config, shutdown_rx).instrument(span))
}
