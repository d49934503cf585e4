//! Initial snapshot: copy every key present in the source.
//!
//! Walks the source keyspace with SCAN from cursor 0 until the store
//! returns cursor 0 again, transferring each key as it is seen. There is no
//! upper bound on pages; SCAN guarantees the cycle completes.
//!
//! # Failure Handling
//!
//! A failed key transfer abandons the rest of its page, then the scan moves
//! on to the next cursor. Only a failing SCAN itself aborts the snapshot.
//! Keys skipped this way are picked up by the catch-up loop the next time
//! they change.

use crate::error::Result;
use crate::metrics;
use crate::session::StoreSession;
use crate::transfer::{transfer_key, TransferOutcome};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters for one snapshot pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub pages: u64,
    pub keys_seen: u64,
    pub copied: u64,
    pub missing: u64,
    pub failed: u64,
    /// Pages cut short by a failed transfer.
    pub pages_abandoned: u64,
    pub bytes: u64,
}

/// Copy every key in `source` to `destination` under `prefix`.
pub async fn scan_all<S, D>(
    source: &mut S,
    destination: &mut D,
    prefix: &[u8],
    page_size: usize,
) -> Result<SnapshotStats>
where
    S: StoreSession + ?Sized,
    D: StoreSession + ?Sized,
{
    let started = Instant::now();
    let mut stats = SnapshotStats::default();
    let mut cursor = 0u64;

    info!(page_size, "Starting snapshot");

    loop {
        let page = source.scan(cursor, page_size).await?;
        stats.pages += 1;
        metrics::record_scan_page(page.keys.len());
        debug!(cursor, next_cursor = page.cursor, keys = page.keys.len(), "Scanned page");

        for key in &page.keys {
            stats.keys_seen += 1;
            match transfer_key(destination, source, key, prefix).await {
                Ok(TransferOutcome::Copied { bytes }) => {
                    stats.copied += 1;
                    stats.bytes += bytes as u64;
                    metrics::record_key_copied("snapshot", bytes);
                }
                Ok(TransferOutcome::Missing) => {
                    stats.missing += 1;
                    metrics::record_key_missing("snapshot");
                }
                Err(e) => {
                    stats.failed += 1;
                    stats.pages_abandoned += 1;
                    metrics::record_transfer_failure("snapshot");
                    metrics::record_scan_page_abandoned();
                    warn!(
                        key = %String::from_utf8_lossy(key),
                        error = %e,
                        "Transfer failed, abandoning rest of page"
                    );
                    break;
                }
            }
        }

        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }

    let elapsed = started.elapsed();
    metrics::record_snapshot_duration(elapsed);
    info!(
        pages = stats.pages,
        keys = stats.keys_seen,
        copied = stats.copied,
        missing = stats.missing,
        failed = stats.failed,
        duration_ms = elapsed.as_millis() as u64,
        "Snapshot complete"
    );

    Ok(stats)
}
