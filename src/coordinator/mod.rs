// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Channel coordinator.
//!
//! The orchestrator that owns the four sessions and sequences:
//! - Session setup via [`crate::session::SessionFactory`]
//! - Notification setup via [`crate::listener`]
//! - The initial copy via [`crate::snapshot::scan_all`]
//! - The liveness prober via [`crate::heartbeat::spawn_prober`]
//! - The catch-up loop via [`crate::listener::catch_up`]
//!
//! # Startup Order
//!
//! Strict, stopping at the first failure:
//!
//! ```text
//! open source → open notification → open destination → open heartbeat
//!   → CONFIG SET notify-keyspace-events → PSUBSCRIBE
//!   → snapshot → start prober → catch-up loop
//! ```
//!
//! Subscribing before the snapshot means writes that race the SCAN are
//! still seen by the catch-up loop.
//!
//! # Teardown
//!
//! Runs after every `run()`, whichever step ended it: signal the prober,
//! release every opened session (unopened ones are skipped), then join the
//! prober within `session.prober_join_timeout`, aborting it if that elapses.

mod types;

pub use types::{ChannelReport, ChannelState};

use crate::config::{Address, ChannelConfig};
use crate::error::{ChannelError, Result};
use crate::heartbeat::{spawn_prober, ProberExit};
use crate::listener::{catch_up, enable_notifications, subscribe_for_events};
use crate::metrics;
use crate::session::{SessionFactory, SessionRole};
use crate::snapshot::scan_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests a clean shutdown of a running channel.
///
/// Cheap to clone; hand one to a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Ask the channel to stop. The catch-up loop returns cleanly and
    /// teardown runs as usual.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Session slots, filled in startup order.
struct Sessions<F: SessionFactory> {
    source: Option<F::Store>,
    notification: Option<F::Notifications>,
    destination: Option<F::Store>,
    /// Moved into the prober task once it starts.
    heartbeat: Option<F::Store>,
}

impl<F: SessionFactory> Default for Sessions<F> {
    fn default() -> Self {
        Self {
            source: None,
            notification: None,
            destination: None,
            heartbeat: None,
        }
    }
}

fn missing(role: SessionRole) -> ChannelError {
    ChannelError::InvalidState {
        expected: format!("{role} session open"),
        actual: "not open".to_string(),
    }
}

/// One replication channel: source store → destination store.
///
/// Exactly one per process; [`run`](Self::run) consumes its lifecycle.
pub struct Channel<F: SessionFactory> {
    config: ChannelConfig,
    factory: F,

    /// State broadcaster
    state_tx: watch::Sender<ChannelState>,
    state_rx: watch::Receiver<ChannelState>,

    /// Shutdown signal, shared with the prober and the catch-up loop
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,

    sessions: Sessions<F>,
    prober: Option<JoinHandle<ProberExit>>,
}

impl<F: SessionFactory> Channel<F> {
    pub fn new(config: ChannelConfig, factory: F) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            factory,
            state_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            sessions: Sessions::default(),
            prober: None,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Get current channel state.
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Handle for requesting a clean shutdown from another task.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    fn set_state(&self, state: ChannelState) {
        let _ = self.state_tx.send(state);
        metrics::set_channel_state(&state.to_string());
    }

    /// Run the channel to completion.
    ///
    /// Returns `Ok` only when every step succeeded and the catch-up loop
    /// ended on a shutdown request. Teardown has always completed by the
    /// time this returns.
    pub async fn run(&mut self) -> Result<ChannelReport> {
        if self.state() != ChannelState::Created {
            return Err(ChannelError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        if let Err(e) = self.config.validate() {
            self.set_state(ChannelState::Failed);
            return Err(e);
        }

        info!(
            source = %self.config.source,
            destination = %self.config.destination,
            prefix = %self.config.prefix,
            "Starting channel"
        );

        let outcome = self.replicate().await;
        self.teardown().await;

        match &outcome {
            Ok(report) => {
                self.set_state(ChannelState::Stopped);
                info!(
                    snapshot_copied = report.snapshot.copied,
                    catch_up_copied = report.catch_up.copied,
                    "Channel stopped"
                );
            }
            Err(e) => {
                self.set_state(ChannelState::Failed);
                if e.is_stale_feed() {
                    error!(error = %e, "Channel failed, notification feed is stale");
                } else {
                    error!(error = %e, "Channel failed");
                }
            }
        }
        outcome
    }

    // Borrows only the factory: a session type need not be Sync.
    async fn open_store(factory: &F, role: SessionRole, address: &Address) -> Result<F::Store> {
        match factory.open_store(role, address).await {
            Ok(session) => {
                metrics::record_session_open(role.as_str(), true);
                info!(role = %role, address = %address, "Session opened");
                Ok(session)
            }
            Err(e) => {
                metrics::record_session_open(role.as_str(), false);
                error!(role = %role, address = %address, error = %e, "Failed to open session");
                Err(e)
            }
        }
    }

    async fn open_notifications(factory: &F, address: &Address) -> Result<F::Notifications> {
        let role = SessionRole::Notification;
        match factory.open_notifications(address).await {
            Ok(session) => {
                metrics::record_session_open(role.as_str(), true);
                info!(role = %role, address = %address, "Session opened");
                Ok(session)
            }
            Err(e) => {
                metrics::record_session_open(role.as_str(), false);
                error!(role = %role, address = %address, error = %e, "Failed to open session");
                Err(e)
            }
        }
    }

    async fn replicate(&mut self) -> Result<ChannelReport> {
        self.set_state(ChannelState::Connecting);

        let source_addr = self.config.source.clone();
        let destination_addr = self.config.destination.clone();

        let factory = &self.factory;
        self.sessions.source =
            Some(Self::open_store(factory, SessionRole::Source, &source_addr).await?);
        self.sessions.notification = Some(Self::open_notifications(factory, &source_addr).await?);
        self.sessions.destination =
            Some(Self::open_store(factory, SessionRole::Destination, &destination_addr).await?);
        self.sessions.heartbeat =
            Some(Self::open_store(factory, SessionRole::Heartbeat, &source_addr).await?);

        let config = &self.config;
        let Sessions {
            source,
            notification,
            destination,
            heartbeat,
        } = &mut self.sessions;
        let source = source.as_mut().ok_or_else(|| missing(SessionRole::Source))?;
        let notification = notification
            .as_mut()
            .ok_or_else(|| missing(SessionRole::Notification))?;
        let destination = destination
            .as_mut()
            .ok_or_else(|| missing(SessionRole::Destination))?;

        enable_notifications(notification, &config.notifications.flags).await?;
        subscribe_for_events(notification, &config.subscription_patterns()).await?;

        let _ = self.state_tx.send(ChannelState::Snapshotting);
        metrics::set_channel_state("Snapshotting");
        let prefix = config.prefix.as_bytes();
        let snapshot = scan_all(source, destination, prefix, config.snapshot.page_size).await?;

        let heartbeat_session = heartbeat.take().ok_or_else(|| missing(SessionRole::Heartbeat))?;
        self.prober = Some(spawn_prober(
            heartbeat_session,
            config.heartbeat.clone(),
            self.shutdown_rx.clone(),
        ));

        let _ = self.state_tx.send(ChannelState::Replicating);
        metrics::set_channel_state("Replicating");
        info!("Replicating");

        let catch_up = catch_up(
            notification,
            source,
            destination,
            prefix,
            &config.heartbeat,
            self.shutdown_rx.clone(),
        )
        .await?;

        Ok(ChannelReport { snapshot, catch_up })
    }

    async fn teardown(&mut self) {
        self.set_state(ChannelState::ShuttingDown);
        info!("Tearing down channel");

        self.shutdown_tx.send_replace(true);

        // Released in reverse opening order; an unstarted prober still
        // holds its session in the slot.
        if self.sessions.heartbeat.take().is_some() {
            release(SessionRole::Heartbeat);
        }
        if self.sessions.destination.take().is_some() {
            release(SessionRole::Destination);
        }
        if self.sessions.notification.take().is_some() {
            release(SessionRole::Notification);
        }
        if self.sessions.source.take().is_some() {
            release(SessionRole::Source);
        }

        let Some(mut handle) = self.prober.take() else {
            debug!("Prober never started");
            return;
        };

        let join_timeout = self.config.session.prober_join_timeout_duration();
        match tokio::time::timeout(join_timeout, &mut handle).await {
            Ok(Ok(exit)) => {
                debug!(exit = ?exit, "Prober finished");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Prober panicked");
            }
            Err(_) => {
                // Aborting drops the task and its session with it.
                warn!(timeout_ms = join_timeout.as_millis() as u64, "Prober did not stop in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        release(SessionRole::Heartbeat);
    }
}

fn release(role: SessionRole) {
    metrics::record_session_released(role.as_str());
    debug!(role = %role, "Released session");
}
