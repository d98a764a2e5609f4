//! Windowed chain verification.
//!
//! `ChainVerifier` walks the records of a time window in insertion order and
//! checks every link:
//!
//! 1. `sequence` is contiguous,
//! 2. `prev_hash` equals the predecessor's stored `hash`,
//! 3. the stored `hash` matches one recomputed from the stored fields,
//! 4. `created_at` never decreases.
//!
//! The first record of the window is anchored to the record immediately
//! before it (or to the genesis value at the start of the chain), so partial
//! windows prove they connect to the rest of the chain.  A bounded window
//! also checks the first record after it without counting it.  Verification
//! only reads from the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::TimeWindow,
    record::AuditRecord,
    report::VerificationReport,
};
use ledger_core::{chain::check_link, traits::RecordStore};

/// Records fetched from the store per round trip.
pub const PAGE_SIZE: usize = 1000;

/// `duration` in whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn timeout_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The state carried from one verified record to the next.
struct Cursor {
    prev_hash: String,
    next_sequence: u64,
    prev_created_at: Option<DateTime<Utc>>,
}

/// Read-only verifier over a `RecordStore`.
pub struct ChainVerifier {
    store: Arc<dyn RecordStore>,
    page_size: usize,
    timeout: Option<Duration>,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            page_size: PAGE_SIZE,
            timeout: None,
        }
    }

    /// Bound each `verify` call.  A timed-out verification reports
    /// `LedgerError::Timeout` and has no side effects.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the page size.  Values below 1 are treated as 1.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Verify every record whose `created_at` falls in `window`.
    ///
    /// A broken chain is a normal result (`valid = false`), not an error;
    /// use [`VerificationReport::into_result`] to treat it as one.  Errors
    /// are store failures and timeouts.
    pub async fn verify(&self, window: &TimeWindow) -> LedgerResult<VerificationReport> {
        let report = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.walk(window))
                .await
                .map_err(|_| LedgerError::Timeout {
                    operation: "verify".to_string(),
                    after_ms: timeout_millis(limit),
                })??,
            None => self.walk(window).await?,
        };

        if report.valid {
            info!(checked = report.checked, "chain verified");
        } else {
            warn!(
                checked = report.checked,
                broken_at = ?report.broken_at,
                reason = report.reason.as_deref().unwrap_or_default(),
                "chain verification failed"
            );
        }
        Ok(report)
    }

    async fn walk(&self, window: &TimeWindow) -> LedgerResult<VerificationReport> {
        let mut page = self.store.scan(window, None, self.page_size).await?;
        let Some(first) = page.first() else {
            debug!("verification window is empty");
            return Ok(VerificationReport::intact(0));
        };

        let mut cursor = match self.anchor(first).await? {
            Ok(cursor) => cursor,
            Err(reason) => return Ok(VerificationReport::broken(first.id, 1, reason)),
        };

        let mut checked: u64 = 0;
        loop {
            for record in &page {
                checked += 1;
                if let Some(reason) = Self::check(record, &cursor)? {
                    return Ok(VerificationReport::broken(record.id, checked, reason));
                }
                cursor = Cursor {
                    prev_hash: record.hash.clone(),
                    next_sequence: record.sequence.saturating_add(1),
                    prev_created_at: Some(record.created_at),
                };
            }

            if page.len() < self.page_size {
                break;
            }
            let after = page.last().map(|r| r.sequence);
            page = self.store.scan(window, after, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            debug!(checked, "verification page done");
        }

        // The record after a bounded run must still link to it.
        if window.to.is_some() {
            if let Some(next) = self.store.get_by_sequence(cursor.next_sequence).await? {
                if let Some(reason) = Self::check(&next, &cursor)? {
                    return Ok(VerificationReport::broken(next.id, checked + 1, reason));
                }
            }
        }

        Ok(VerificationReport::intact(checked))
    }

    /// Link state expected by the window's first record, or the reason the
    /// window cannot be anchored.
    async fn anchor(&self, first: &AuditRecord) -> LedgerResult<Result<Cursor, String>> {
        if first.sequence == 0 {
            return Ok(Ok(Cursor {
                prev_hash: AuditRecord::GENESIS_HASH.to_string(),
                next_sequence: 0,
                prev_created_at: None,
            }));
        }
        let predecessor = self.store.get_by_sequence(first.sequence - 1).await?;
        Ok(match predecessor {
            Some(prev) => Ok(Cursor {
                prev_hash: prev.hash,
                next_sequence: first.sequence,
                prev_created_at: Some(prev.created_at),
            }),
            None => Err(format!(
                "predecessor of sequence {} is missing from the store",
                first.sequence
            )),
        })
    }

    fn check(record: &AuditRecord, cursor: &Cursor) -> LedgerResult<Option<String>> {
        if let Some(failure) = check_link(record, &cursor.prev_hash, cursor.next_sequence)? {
            return Ok(Some(failure.reason));
        }
        if let Some(prev) = cursor.prev_created_at {
            if record.created_at < prev {
                return Ok(Some(format!(
                    "created_at {} precedes predecessor's {}",
                    record.created_at, prev
                )));
            }
        }
        Ok(None)
    }
}
