//! In-memory stores and sessions for testing.
//!
//! A [`MockStore`] stands in for one Redis server. Every session a
//! [`MockFactory`] opens against the same address shares that store, the
//! same way four real connections share one server. The store keeps:
//! - the keyspace (DUMP returns the stored bytes, RESTORE stores the blob)
//! - a pub/sub feed carrying keyspace events and PUBLISH traffic
//! - call logs for DUMP and the MULTI/DEL/RESTORE/EXEC batch
//!
//! The factory keeps a [`SessionLedger`] of every session opened and
//! released, so teardown can be asserted exactly.

#![allow(dead_code)]

use rds_channel::config::Address;
use rds_channel::error::{ChannelError, Result};
use rds_channel::event::KeyspaceMessage;
use rds_channel::session::{
    BoxFuture, NotificationSession, ScanPage, SessionFactory, SessionRole, StoreSession,
    TransactionReplies,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 4096;

/// One simulated server.
pub struct MockStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    feed: broadcast::Sender<KeyspaceMessage>,
    notify_flags: Mutex<Option<String>>,
    /// PUBLISH succeeds but nothing reaches subscribers.
    swallow_publishes: AtomicBool,
    /// Every command fails.
    offline: AtomicBool,
    /// Targets whose RESTORE gets no reply.
    restore_failures: Mutex<HashSet<Vec<u8>>>,
    /// Targets whose RESTORE gets an error reply.
    restore_rejections: Mutex<HashSet<Vec<u8>>>,
    /// PUBLISH never completes.
    hang_publishes: AtomicBool,
    dump_calls: Mutex<Vec<Vec<u8>>>,
    transactions: Mutex<Vec<Vec<u8>>>,
    published: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Arc::new(Self {
            data: Mutex::new(BTreeMap::new()),
            feed,
            notify_flags: Mutex::new(None),
            swallow_publishes: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            restore_failures: Mutex::new(HashSet::new()),
            restore_rejections: Mutex::new(HashSet::new()),
            hang_publishes: AtomicBool::new(false),
            dump_calls: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            published: AtomicUsize::new(0),
        })
    }

    /// Store with keys already present; no events are emitted.
    pub fn seeded(pairs: &[(&str, &str)]) -> Arc<Self> {
        let store = Self::new();
        for (k, v) in pairs {
            store.insert(k.as_bytes(), v.as_bytes());
        }
        store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keyspace
    // ─────────────────────────────────────────────────────────────────────────

    /// Write without notification.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.data.lock().unwrap().insert(key.to_vec(), value.to_vec());
    }

    /// Write and notify, like a client `SET`.
    pub fn set(&self, key: &str, value: &str) {
        self.insert(key.as_bytes(), value.as_bytes());
        self.notify("set", key.as_bytes());
    }

    /// Delete and notify, like a client `DEL`.
    pub fn del(&self, key: &str) {
        self.data.lock().unwrap().remove(key.as_bytes());
        self.notify("del", key.as_bytes());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn get_bytes(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn contents(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.data.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feed
    // ─────────────────────────────────────────────────────────────────────────

    fn notify(&self, op: &str, key: &[u8]) {
        let enabled = self
            .notify_flags
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|flags| flags.contains('E'));
        if enabled {
            let _ = self
                .feed
                .send(KeyspaceMessage::new(format!("__keyevent@0__:{op}"), key.to_vec()));
        }
    }

    /// Put an arbitrary message on the feed.
    pub fn publish_raw(&self, channel: &str, payload: &[u8]) {
        let _ = self.feed.send(KeyspaceMessage::new(channel, payload.to_vec()));
    }

    pub fn notify_flags(&self) -> Option<String> {
        self.notify_flags.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fault injection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn swallow_publishes(&self, on: bool) {
        self.swallow_publishes.store(on, Ordering::SeqCst);
    }

    pub fn set_offline(&self, on: bool) {
        self.offline.store(on, Ordering::SeqCst);
    }

    /// RESTORE of `target` answers with an error, like a blob the server
    /// cannot load.
    pub fn reject_restore_for(&self, target: &str) {
        self.restore_rejections
            .lock()
            .unwrap()
            .insert(target.as_bytes().to_vec());
    }

    /// PUBLISH hangs forever, like a wedged connection.
    pub fn hang_publishes(&self, on: bool) {
        self.hang_publishes.store(on, Ordering::SeqCst);
    }

    pub fn fail_restore_for(&self, target: &str) {
        self.restore_failures
            .lock()
            .unwrap()
            .insert(target.as_bytes().to_vec());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call logs
    // ─────────────────────────────────────────────────────────────────────────

    pub fn dump_calls(&self) -> Vec<Vec<u8>> {
        self.dump_calls.lock().unwrap().clone()
    }

    pub fn dumps_of(&self, key: &str) -> usize {
        self.dump_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_slice() == key.as_bytes())
            .count()
    }

    /// Targets of every MULTI/DEL/RESTORE/EXEC batch received.
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.transactions.lock().unwrap().clone()
    }

    fn check_online(&self, operation: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ChannelError::redis_msg(operation, "connection reset by peer"))
        } else {
            Ok(())
        }
    }

    fn scan(&self, cursor: u64, count: usize) -> Result<ScanPage> {
        self.check_online("SCAN")?;
        let data = self.data.lock().unwrap();
        let start = cursor as usize;
        let keys: Vec<Vec<u8>> = data.keys().skip(start).take(count.max(1)).cloned().collect();
        let next = start + keys.len();
        let cursor = if next >= data.len() { 0 } else { next as u64 };
        Ok(ScanPage { cursor, keys })
    }

    fn dump(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_online("DUMP")?;
        self.dump_calls.lock().unwrap().push(key.to_vec());
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn replace_key(&self, target: &[u8], blob: &[u8]) -> Result<TransactionReplies> {
        self.check_online("MULTI/DEL/RESTORE/EXEC")?;
        self.transactions.lock().unwrap().push(target.to_vec());
        if self.restore_failures.lock().unwrap().contains(target) {
            // MULTI/EXEC discard the queued DEL as well
            return Ok(TransactionReplies {
                restore: false,
                ..TransactionReplies::complete()
            });
        }
        if self.restore_rejections.lock().unwrap().contains(target) {
            return Ok(TransactionReplies::rejected(
                "ERR DUMP payload version or checksum are wrong",
            ));
        }
        self.insert(target, blob);
        Ok(TransactionReplies::complete())
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.check_online("PUBLISH")?;
        self.published.fetch_add(1, Ordering::SeqCst);
        if !self.swallow_publishes.load(Ordering::SeqCst) {
            self.publish_raw(channel, payload.as_bytes());
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session ledger
// ═══════════════════════════════════════════════════════════════════════════════

/// Records session opens and releases across a factory's lifetime.
#[derive(Default)]
pub struct SessionLedger {
    opened: Mutex<Vec<SessionRole>>,
    released: Mutex<Vec<SessionRole>>,
}

impl SessionLedger {
    pub fn opened(&self) -> Vec<SessionRole> {
        self.opened.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<SessionRole> {
        self.released.lock().unwrap().clone()
    }

    pub fn released_count(&self, role: SessionRole) -> usize {
        self.released.lock().unwrap().iter().filter(|r| **r == role).count()
    }

    /// Every opened session released exactly once, nothing else released.
    pub fn all_released_once(&self) -> bool {
        let mut opened = self.opened();
        let mut released = self.released();
        opened.sort_by_key(|r| r.as_str());
        released.sort_by_key(|r| r.as_str());
        opened == released
    }

    fn open(&self, role: SessionRole) {
        self.opened.lock().unwrap().push(role);
    }

    fn release(&self, role: SessionRole) {
        self.released.lock().unwrap().push(role);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MockStoreSession {
    role: SessionRole,
    store: Arc<MockStore>,
    ledger: Arc<SessionLedger>,
}

impl StoreSession for MockStoreSession {
    fn scan(&mut self, cursor: u64, count: usize) -> BoxFuture<'_, ScanPage> {
        let result = self.store.scan(cursor, count);
        Box::pin(async move { result })
    }

    fn dump<'a>(&'a mut self, key: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        let result = self.store.dump(key);
        Box::pin(async move { result })
    }

    fn replace_key<'a>(
        &'a mut self,
        target: &'a [u8],
        blob: &'a [u8],
    ) -> BoxFuture<'a, TransactionReplies> {
        let result = self.store.replace_key(target, blob);
        Box::pin(async move { result })
    }

    fn publish<'a>(&'a mut self, channel: &'a str, payload: &'a str) -> BoxFuture<'a, ()> {
        if self.store.hang_publishes.load(Ordering::SeqCst) {
            return Box::pin(std::future::pending::<Result<()>>());
        }
        let result = self.store.publish(channel, payload);
        Box::pin(async move { result })
    }
}

impl Drop for MockStoreSession {
    fn drop(&mut self) {
        self.ledger.release(self.role);
    }
}

pub struct MockNotificationSession {
    store: Arc<MockStore>,
    ledger: Arc<SessionLedger>,
    patterns: Vec<String>,
    rx: Option<broadcast::Receiver<KeyspaceMessage>>,
    read_timeout: Option<Duration>,
}

impl MockNotificationSession {
    fn subscribed_to(&self, channel: &[u8]) -> bool {
        self.patterns
            .iter()
            .any(|p| glob_match(p.as_bytes(), channel))
    }
}

impl NotificationSession for MockNotificationSession {
    fn enable_notifications<'a>(&'a mut self, flags: &'a str) -> BoxFuture<'a, ()> {
        let result = self.store.check_online("CONFIG SET").map(|()| {
            *self.store.notify_flags.lock().unwrap() = Some(flags.to_string());
        });
        Box::pin(async move { result })
    }

    fn psubscribe<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, ()> {
        let result = self.store.check_online("PSUBSCRIBE").map(|()| {
            if self.rx.is_none() {
                self.rx = Some(self.store.feed.subscribe());
            }
            self.patterns.push(pattern.to_string());
        });
        Box::pin(async move { result })
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    fn next_event(&mut self) -> BoxFuture<'_, KeyspaceMessage> {
        Box::pin(async move {
            let window = self.read_timeout;
            let receive = async {
                loop {
                    let Some(rx) = self.rx.as_mut() else {
                        // Never subscribed: blocks like a silent connection.
                        return std::future::pending().await;
                    };
                    match rx.recv().await {
                        Ok(msg) if self.subscribed_to(&msg.channel) => return Ok(msg),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(ChannelError::FeedClosed)
                        }
                    }
                }
            };
            match window {
                Some(window) => tokio::time::timeout(window, receive)
                    .await
                    .map_err(|_| ChannelError::HeartbeatTimeout { window })?,
                None => receive.await,
            }
        })
    }
}

impl Drop for MockNotificationSession {
    fn drop(&mut self) {
        self.ledger.release(SessionRole::Notification);
    }
}

/// Redis-style glob supporting `*` only.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Factory
// ═══════════════════════════════════════════════════════════════════════════════

/// Opens mock sessions against registered stores.
pub struct MockFactory {
    stores: HashMap<Address, Arc<MockStore>>,
    ledger: Arc<SessionLedger>,
    fail_role: Option<SessionRole>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
            ledger: Arc::new(SessionLedger::default()),
            fail_role: None,
        }
    }

    pub fn with_store(mut self, address: Address, store: Arc<MockStore>) -> Self {
        self.stores.insert(address, store);
        self
    }

    /// Opening a session for `role` fails with a connection error.
    pub fn failing_on(mut self, role: SessionRole) -> Self {
        self.fail_role = Some(role);
        self
    }

    pub fn ledger(&self) -> Arc<SessionLedger> {
        Arc::clone(&self.ledger)
    }

    fn connect(&self, role: SessionRole, address: &Address) -> Result<Arc<MockStore>> {
        if self.fail_role == Some(role) {
            return Err(ChannelError::connection(role, address, "connection refused"));
        }
        let store = self
            .stores
            .get(address)
            .cloned()
            .ok_or_else(|| ChannelError::connection(role, address, "no such host"))?;
        self.ledger.open(role);
        Ok(store)
    }
}

impl SessionFactory for MockFactory {
    type Store = MockStoreSession;
    type Notifications = MockNotificationSession;

    fn open_store<'a>(
        &'a self,
        role: SessionRole,
        address: &'a Address,
    ) -> BoxFuture<'a, Self::Store> {
        let result = self.connect(role, address).map(|store| MockStoreSession {
            role,
            store,
            ledger: Arc::clone(&self.ledger),
        });
        Box::pin(async move { result })
    }

    fn open_notifications<'a>(
        &'a self,
        address: &'a Address,
    ) -> BoxFuture<'a, Self::Notifications> {
        let result = self
            .connect(SessionRole::Notification, address)
            .map(|store| MockNotificationSession {
                store,
                ledger: Arc::clone(&self.ledger),
                patterns: Vec::new(),
                rx: None,
                read_timeout: None,
            });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"__key*__:*", b"__keyevent@0__:set"));
        assert!(glob_match(b"__key*__:*", b"__keyspace@0__:a:b"));
        assert!(glob_match(b"heartbeat", b"heartbeat"));
        assert!(!glob_match(b"heartbeat", b"heartbeats"));
        assert!(!glob_match(b"__key*__:*", b"heartbeat"));
    }
}
