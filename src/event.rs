//! Keyspace event parsing.
//!
//! The source publishes one message per mutation on the notification feed.
//! Two channel shapes exist, depending on the notification flags:
//!
//! ```text
//! __keyevent@<db>__:<op>     payload = key    (flag E)
//! __keyspace@<db>__:<key>    payload = op     (flag K)
//! <heartbeat channel>        payload = marker (prober)
//! ```
//!
//! [`classify`] turns a raw [`KeyspaceMessage`] into an [`EventClass`] so the
//! catch-up loop never matches on raw channel text.

use crate::error::{ChannelError, Result};

const KEYEVENT_PREFIX: &[u8] = b"__keyevent@";
const KEYSPACE_PREFIX: &[u8] = b"__keyspace@";
const DB_TERMINATOR: &[u8] = b"__:";

/// Operation name Redis emits for `DEL`.
pub const DELETE_OP: &str = "del";

/// One message received on the notification session.
///
/// Bytes are kept raw: keys are binary-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceMessage {
    /// Pattern that matched, if the message came from a PSUBSCRIBE.
    pub pattern: Option<Vec<u8>>,
    pub channel: Vec<u8>,
    pub payload: Vec<u8>,
}

impl KeyspaceMessage {
    pub fn new(channel: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: None,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Attach the matching pattern.
    pub fn with_pattern(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Which notification family a channel belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationChannel {
    /// `__keyevent@<db>__:<op>`
    KeyEvent { db: u32, op: String },
    /// `__keyspace@<db>__:<key>`
    KeySpace { db: u32, key: Vec<u8> },
}

/// What the catch-up loop should do with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// Prober marker; proves the feed is live.
    Heartbeat,
    /// Key was deleted.
    Deletion { key: Vec<u8> },
    /// Any other mutation (set, expire, rename_to, lpush, ...).
    Mutation { op: String, key: Vec<u8> },
}

impl EventClass {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Deletion { .. } => "deletion",
            Self::Mutation { .. } => "mutation",
        }
    }
}

/// Parse a notification channel name.
pub fn parse_channel(channel: &[u8]) -> Result<NotificationChannel> {
    let (is_event, rest) = if let Some(rest) = channel.strip_prefix(KEYEVENT_PREFIX) {
        (true, rest)
    } else if let Some(rest) = channel.strip_prefix(KEYSPACE_PREFIX) {
        (false, rest)
    } else {
        return Err(malformed("not a keyspace channel", channel));
    };

    let split = rest
        .windows(DB_TERMINATOR.len())
        .position(|w| w == DB_TERMINATOR)
        .ok_or_else(|| malformed("missing database terminator", channel))?;

    let db = std::str::from_utf8(&rest[..split])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| malformed("invalid database index", channel))?;

    let tail = &rest[split + DB_TERMINATOR.len()..];
    if tail.is_empty() {
        return Err(malformed("empty channel suffix", channel));
    }

    if is_event {
        Ok(NotificationChannel::KeyEvent {
            db,
            op: op_name(tail, channel)?,
        })
    } else {
        Ok(NotificationChannel::KeySpace {
            db,
            key: tail.to_vec(),
        })
    }
}

/// Classify a message received on the notification session.
pub fn classify(message: &KeyspaceMessage, heartbeat_channel: &str) -> Result<EventClass> {
    if message.channel == heartbeat_channel.as_bytes() {
        return Ok(EventClass::Heartbeat);
    }

    let (op, key) = match parse_channel(&message.channel)? {
        NotificationChannel::KeyEvent { op, .. } => (op, message.payload.clone()),
        NotificationChannel::KeySpace { key, .. } => (op_name(&message.payload, &message.channel)?, key),
    };

    if key.is_empty() {
        return Err(malformed("event without key", &message.channel));
    }

    if op == DELETE_OP {
        Ok(EventClass::Deletion { key })
    } else {
        Ok(EventClass::Mutation { op, key })
    }
}

fn op_name(raw: &[u8], channel: &[u8]) -> Result<String> {
    match std::str::from_utf8(raw) {
        Ok(op) if !op.is_empty() => Ok(op.to_ascii_lowercase()),
        _ => Err(malformed("invalid operation name", channel)),
    }
}

fn malformed(reason: &str, channel: &[u8]) -> ChannelError {
    ChannelError::Protocol(format!(
        "{}: {}",
        reason,
        String::from_utf8_lossy(channel)
    ))
}
