//! Key transfer: copy one key from source to destination under the prefix.
//!
//! ```text
//! source:       DUMP key                      -> blob | nil
//! destination:  MULTI                         -> OK
//!               DEL prefix+key                -> QUEUED
//!               RESTORE prefix+key 0 blob     -> QUEUED
//!               EXEC                          -> [..]
//! ```
//!
//! The blob is the store's own serialization and is passed through as raw
//! bytes. DEL before RESTORE makes the transfer idempotent: running it twice
//! with an unchanged source leaves the destination as running it once.
//!
//! Only a missing reply fails the transfer. An error reply (a blob the
//! destination cannot load, say) is logged and the key counts as copied.

use crate::error::{ChannelError, Result};
use crate::metrics;
use crate::session::StoreSession;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Result of a transfer that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Key written to the destination.
    Copied { bytes: usize },
    /// Key no longer existed at DUMP time; nothing written.
    Missing,
}

/// Destination name for `key`: `prefix` followed by `key`, no separator.
pub fn destination_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut target = Vec::with_capacity(prefix.len() + key.len());
    target.extend_from_slice(prefix);
    target.extend_from_slice(key);
    target
}

/// Copy `key` from `source` into `destination` as `prefix + key`.
///
/// A key that vanished before DUMP is `Ok(TransferOutcome::Missing)`.
/// Failures are logged here with the failing step and returned; the caller
/// decides whether they are fatal.
pub async fn transfer_key<D, S>(
    destination: &mut D,
    source: &mut S,
    key: &[u8],
    prefix: &[u8],
) -> Result<TransferOutcome>
where
    D: StoreSession + ?Sized,
    S: StoreSession + ?Sized,
{
    let started = Instant::now();
    let display_key = String::from_utf8_lossy(key);

    let blob = match source.dump(key).await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            info!(key = %display_key, "Key miss, skipping");
            return Ok(TransferOutcome::Missing);
        }
        Err(e) => {
            error!(key = %display_key, error = %e, "Failed to dump source key");
            return Err(e);
        }
    };

    let target = destination_key(prefix, key);
    let display_target = String::from_utf8_lossy(&target);
    debug!(
        key = %display_key,
        dest_key = %display_target,
        key_len = key.len(),
        dest_key_len = target.len(),
        blob_len = blob.len(),
        "Transferring key"
    );
    trace!(key = %display_key, blob = %hex::encode(&blob), "Dumped value");

    let replies = match destination.replace_key(&target, &blob).await {
        Ok(replies) => replies,
        Err(e) => {
            error!(dest_key = %display_target, error = %e, "Failed to submit transaction");
            return Err(e);
        }
    };

    if !replies.multi {
        error!(dest_key = %display_target, "Failed to open transaction");
    }
    if !replies.del {
        error!(dest_key = %display_target, "Failed to remove target key");
    }
    if !replies.restore {
        error!(dest_key = %display_target, "Failed to restore target data");
    }
    if !replies.exec {
        error!(dest_key = %display_target, "Failed to finish transaction");
    }

    if !replies.is_complete() {
        return Err(ChannelError::Transaction {
            key: display_target.into_owned(),
            failed_steps: replies.failed_steps(),
        });
    }

    if let Some(reason) = &replies.server_error {
        // Every step answered; the store's own verdict is not a transport failure.
        warn!(dest_key = %display_target, reason = %reason, "Destination rejected restore");
    }

    metrics::record_transfer_latency(started.elapsed());
    Ok(TransferOutcome::Copied { bytes: blob.len() })
}
