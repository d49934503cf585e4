// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport sessions.
//!
//! A channel holds four sessions, each owning one live connection and used
//! by exactly one role for its whole lifetime:
//!
//! ```text
//!   source ─────────┐
//!   notification ───┼──► source store
//!   heartbeat ──────┘
//!   destination ────────► destination store
//! ```
//!
//! A session blocked on the subscription feed cannot issue commands, so the
//! source reads and the notification feed always use different connections.
//! Sessions are never shared or pooled. Dropping a session releases it.
//!
//! Enabling notifications is the one exception to one-connection-per-session:
//! a redis-rs pub/sub connection only accepts subscription commands, so the
//! Redis notification session sends `CONFIG SET notify-keyspace-events` over
//! a short-lived fifth connection to the source and closes it straight away.
//!
//! The traits here are the boundary the replication logic is written
//! against; [`RedisSessionFactory`] is the production implementation and the
//! test suite swaps in an in-memory one.

use crate::config::Address;
use crate::error::{ChannelError, Result};
use crate::event::KeyspaceMessage;
use futures::{Stream, StreamExt};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

type MessageStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// The role a session plays in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Bulk reads from the source (SCAN, DUMP).
    Source,
    /// Subscription feed on the source.
    Notification,
    /// Writes into the destination.
    Destination,
    /// Liveness prober publishing into the source feed.
    Heartbeat,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Notification => "notification",
            Self::Destination => "destination",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One SCAN reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; 0 means the iteration is complete.
    pub cursor: u64,
    pub keys: Vec<Vec<u8>>,
}

/// Which replies of a MULTI/DEL/RESTORE/EXEC batch came back non-nil.
///
/// An error reply from the store is still a reply: the step counts as
/// answered and the error text is kept in `server_error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionReplies {
    pub multi: bool,
    pub del: bool,
    pub restore: bool,
    pub exec: bool,
    pub server_error: Option<String>,
}

impl TransactionReplies {
    /// Every step replied.
    pub fn complete() -> Self {
        Self {
            multi: true,
            del: true,
            restore: true,
            exec: true,
            server_error: None,
        }
    }

    /// Every step replied, at least one of them with an error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            server_error: Some(message.into()),
            ..Self::complete()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.multi && self.del && self.restore && self.exec
    }

    /// Names of the steps without a reply, in pipeline order.
    pub fn failed_steps(&self) -> Vec<&'static str> {
        [
            (self.multi, "MULTI"),
            (self.del, "DEL"),
            (self.restore, "RESTORE"),
            (self.exec, "EXEC"),
        ]
        .into_iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, step)| step)
        .collect()
    }
}

/// A request/response session.
///
/// Used for the source, destination and heartbeat roles.
pub trait StoreSession: Send + 'static {
    /// `SCAN cursor COUNT count`
    fn scan(&mut self, cursor: u64, count: usize) -> BoxFuture<'_, ScanPage>;

    /// `DUMP key`; `None` when the key does not exist.
    fn dump<'a>(&'a mut self, key: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>>;

    /// Pipelined `MULTI; DEL target; RESTORE target 0 blob; EXEC`.
    ///
    /// Reports per step whether a reply came back. `Err` means the batch
    /// could not be submitted or read at all.
    fn replace_key<'a>(
        &'a mut self,
        target: &'a [u8],
        blob: &'a [u8],
    ) -> BoxFuture<'a, TransactionReplies>;

    /// `PUBLISH channel payload`
    fn publish<'a>(&'a mut self, channel: &'a str, payload: &'a str) -> BoxFuture<'a, ()>;
}

/// A subscription session on the source.
pub trait NotificationSession: Send + 'static {
    /// `CONFIG SET notify-keyspace-events flags`
    fn enable_notifications<'a>(&'a mut self, flags: &'a str) -> BoxFuture<'a, ()>;

    /// `PSUBSCRIBE pattern`; switches the session into subscription mode.
    fn psubscribe<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, ()>;

    /// Bound every subsequent [`next_event`](Self::next_event) call.
    fn set_read_timeout(&mut self, timeout: Option<Duration>);

    /// Block for the next message.
    ///
    /// Fails with [`ChannelError::HeartbeatTimeout`] when the read timeout
    /// elapses and [`ChannelError::FeedClosed`] when the feed ends.
    fn next_event(&mut self) -> BoxFuture<'_, KeyspaceMessage>;
}

/// Opens sessions for each role.
pub trait SessionFactory: Send + Sync + 'static {
    type Store: StoreSession;
    type Notifications: NotificationSession;

    fn open_store<'a>(&'a self, role: SessionRole, address: &'a Address)
        -> BoxFuture<'a, Self::Store>;

    fn open_notifications<'a>(&'a self, address: &'a Address)
        -> BoxFuture<'a, Self::Notifications>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis implementation
// ═══════════════════════════════════════════════════════════════════════════════

/// Opens one dedicated redis connection per session.
#[derive(Debug, Clone)]
pub struct RedisSessionFactory {
    connect_timeout: Duration,
}

impl RedisSessionFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RedisSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

fn open_client(role: SessionRole, address: &Address) -> Result<Client> {
    Client::open(address.redis_url())
        .map_err(|e| ChannelError::connection(role, address, e.to_string()))
}

impl SessionFactory for RedisSessionFactory {
    type Store = RedisStoreSession;
    type Notifications = RedisNotificationSession;

    fn open_store<'a>(
        &'a self,
        role: SessionRole,
        address: &'a Address,
    ) -> BoxFuture<'a, Self::Store> {
        Box::pin(async move {
            let client = open_client(role, address)?;
            let conn = match timeout(
                self.connect_timeout,
                client.get_multiplexed_async_connection(),
            )
            .await
            {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => return Err(ChannelError::connection(role, address, e.to_string())),
                Err(_) => {
                    return Err(ChannelError::connection(
                        role,
                        address,
                        format!("timed out after {:?}", self.connect_timeout),
                    ))
                }
            };
            debug!(role = %role, address = %address, "Session opened");
            Ok(RedisStoreSession {
                role,
                address: address.clone(),
                conn,
            })
        })
    }

    fn open_notifications<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Self::Notifications> {
        Box::pin(async move {
            let role = SessionRole::Notification;
            let client = open_client(role, address)?;
            let pubsub = match timeout(self.connect_timeout, client.get_async_pubsub()).await {
                Ok(Ok(pubsub)) => pubsub,
                Ok(Err(e)) => return Err(ChannelError::connection(role, address, e.to_string())),
                Err(_) => {
                    return Err(ChannelError::connection(
                        role,
                        address,
                        format!("timed out after {:?}", self.connect_timeout),
                    ))
                }
            };
            debug!(role = %role, address = %address, "Session opened");
            Ok(RedisNotificationSession {
                client,
                address: address.clone(),
                connect_timeout: self.connect_timeout,
                pubsub: Some(pubsub),
                messages: None,
                read_timeout: None,
            })
        })
    }
}

/// Command session backed by a dedicated multiplexed connection.
///
/// The connection is never cloned out of the session, so it carries
/// exactly one role's traffic.
pub struct RedisStoreSession {
    role: SessionRole,
    address: Address,
    conn: MultiplexedConnection,
}

impl StoreSession for RedisStoreSession {
    fn scan(&mut self, cursor: u64, count: usize) -> BoxFuture<'_, ScanPage> {
        Box::pin(async move {
            let (cursor, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| ChannelError::redis("SCAN", e))?;
            Ok(ScanPage { cursor, keys })
        })
    }

    fn dump<'a>(&'a mut self, key: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let blob: Option<Vec<u8>> = redis::cmd("DUMP")
                .arg(key)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| ChannelError::redis("DUMP", e))?;
            Ok(blob)
        })
    }

    fn replace_key<'a>(
        &'a mut self,
        target: &'a [u8],
        blob: &'a [u8],
    ) -> BoxFuture<'a, TransactionReplies> {
        Box::pin(async move {
            // MULTI/EXEC are issued as plain commands so each of the four
            // replies can be inspected.
            let result: redis::RedisResult<Vec<Value>> = redis::pipe()
                .cmd("MULTI")
                .cmd("DEL")
                .arg(target)
                .cmd("RESTORE")
                .arg(target)
                .arg(0)
                .arg(blob)
                .cmd("EXEC")
                .query_async(&mut self.conn)
                .await;

            let replies = match result {
                Ok(replies) => replies,
                // redis-rs folds an error nested in the EXEC array into an
                // Err for the whole pipeline; every step still answered.
                Err(e) if is_server_reply(&e) => {
                    warn!(role = %self.role, error = %e, "Store rejected transaction step");
                    return Ok(TransactionReplies::rejected(e.to_string()));
                }
                Err(e) => return Err(ChannelError::redis("MULTI/DEL/RESTORE/EXEC", e)),
            };

            let replied = |i: usize| replies.get(i).is_some_and(|v| !matches!(v, Value::Nil));
            Ok(TransactionReplies {
                multi: replied(0),
                del: replied(1),
                restore: replied(2),
                exec: replied(3),
                server_error: None,
            })
        })
    }

    fn publish<'a>(&'a mut self, channel: &'a str, payload: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _receivers: i64 = redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| ChannelError::redis("PUBLISH", e))?;
            Ok(())
        })
    }
}

/// True when `e` carries an error reply sent by the store, as opposed to a
/// transport failure (I/O, dropped connection, timeout, unparsable reply).
pub fn is_server_reply(e: &redis::RedisError) -> bool {
    e.code().is_some() && !e.is_io_error() && !e.is_connection_dropped() && !e.is_timeout()
}

impl Drop for RedisStoreSession {
    fn drop(&mut self) {
        debug!(role = %self.role, address = %self.address, "Session released");
    }
}

/// Subscription session backed by a redis pub/sub connection.
pub struct RedisNotificationSession {
    client: Client,
    address: Address,
    connect_timeout: Duration,
    /// Present until the first receive turns it into `messages`.
    pubsub: Option<PubSub>,
    messages: Option<MessageStream>,
    read_timeout: Option<Duration>,
}

impl NotificationSession for RedisNotificationSession {
    fn enable_notifications<'a>(&'a mut self, flags: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // A pub/sub connection only accepts (P)SUBSCRIBE-family commands,
            // so the setting goes through a control connection that is closed
            // straight after.
            let mut control = match timeout(
                self.connect_timeout,
                self.client.get_multiplexed_async_connection(),
            )
            .await
            {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => return Err(ChannelError::redis("CONFIG SET", e)),
                Err(_) => {
                    return Err(ChannelError::redis_msg(
                        "CONFIG SET",
                        "timed out opening control connection",
                    ))
                }
            };
            let _: () = redis::cmd("CONFIG")
                .arg("SET")
                .arg("notify-keyspace-events")
                .arg(flags)
                .query_async(&mut control)
                .await
                .map_err(|e| ChannelError::redis("CONFIG SET", e))?;
            Ok(())
        })
    }

    fn psubscribe<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let pubsub = self.pubsub.as_mut().ok_or_else(|| {
                ChannelError::Protocol("PSUBSCRIBE after the feed started streaming".into())
            })?;
            pubsub
                .psubscribe(pattern)
                .await
                .map_err(|e| ChannelError::redis("PSUBSCRIBE", e))
        })
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    fn next_event(&mut self) -> BoxFuture<'_, KeyspaceMessage> {
        Box::pin(async move {
            if self.messages.is_none() {
                let pubsub = self.pubsub.take().ok_or(ChannelError::FeedClosed)?;
                self.messages = Some(Box::pin(pubsub.into_on_message()));
            }
            let messages = self.messages.as_mut().ok_or(ChannelError::FeedClosed)?;

            let next = match self.read_timeout {
                Some(window) => timeout(window, messages.next())
                    .await
                    .map_err(|_| ChannelError::HeartbeatTimeout { window })?,
                None => messages.next().await,
            };

            let msg = next.ok_or(ChannelError::FeedClosed)?;
            let channel: Vec<u8> = msg.get_channel().map_err(|e| {
                warn!(error = %e, "Notification without a readable channel");
                ChannelError::Protocol(format!("unreadable channel: {}", e))
            })?;
            let pattern = if msg.from_pattern() {
                msg.get_pattern::<Vec<u8>>().ok()
            } else {
                None
            };
            Ok(KeyspaceMessage {
                pattern,
                channel,
                payload: msg.get_payload_bytes().to_vec(),
            })
        })
    }
}

impl Drop for RedisNotificationSession {
    fn drop(&mut self) {
        debug!(role = %SessionRole::Notification, address = %self.address, "Session released");
    }
}
