//! Daily archival sealing.
//!
//! `Sealer::seal(day)` copies every record created on a completed UTC day
//! into the write-once archive:
//!
//!   Collect (insertion order) → NDJSON → SHA-256 → gzip → put object
//!   → put `<key>.sha256` companion
//!
//! Sealing is idempotent.  A day already sealed with the same payload digest
//! reports `AlreadySealed` and writes nothing new; a differing digest means
//! the live chain changed after it was sealed and fails with `SealConflict`.
//! A run interrupted between the object and its companion digest is
//! completed by the next run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::TimeWindow,
    record::AuditRecord,
    report::{SealManifest, SealStatus, VerificationReport},
};
use ledger_core::{
    chain::{digest_hex, verify_run},
    traits::{Clock, RecordStore},
};

use crate::{
    codec::{decode_ndjson, encode_ndjson, gunzip, gzip},
    store::{ArchiveStore, ObjectMetadata},
};

// ── Metadata tags ─────────────────────────────────────────────────────────────

pub const TAG_RECORD_COUNT: &str = "record_count";
pub const TAG_WINDOW_START: &str = "window_start";
pub const TAG_WINDOW_END: &str = "window_end";
pub const TAG_PAYLOAD_DIGEST: &str = "payload_digest";
pub const TAG_FIRST_SEQUENCE: &str = "first_sequence";
pub const TAG_LAST_SEQUENCE: &str = "last_sequence";
pub const TAG_TERMINAL_HASH: &str = "terminal_hash";

const SCAN_PAGE: usize = 1000;

/// Sealer settings.
#[derive(Debug, Clone)]
pub struct SealConfig {
    /// Days an archive object stays retention-locked after sealing.
    pub retention_days: u32,
    /// First path segment of every object key.
    pub prefix: String,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            prefix: "audit".to_string(),
        }
    }
}

/// `[day 00:00, day+1 00:00)` in UTC.
pub fn day_window(day: NaiveDate) -> TimeWindow {
    let (start, end) = day_bounds(day);
    TimeWindow::between(start, end)
}

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

pub struct Sealer {
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
    config: SealConfig,
}

impl Sealer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        clock: Arc<dyn Clock>,
        config: SealConfig,
    ) -> Self {
        Self {
            store,
            archive,
            clock,
            config,
        }
    }

    /// `audit/year=YYYY/month=MM/day=DD/audit_YYYYMMDDT000000Z.ndjson.gz`
    pub fn object_key(&self, day: NaiveDate) -> String {
        format!(
            "{}/year={:04}/month={:02}/day={:02}/{}",
            self.config.prefix,
            day.year(),
            day.month(),
            day.day(),
            object_file_name(day)
        )
    }

    /// Seal one completed UTC day.
    ///
    /// # Errors
    ///
    /// `Validation` if `day` is today or later, `SealConflict` if the day was
    /// sealed with different contents, `AlreadySealed` if another sealer won
    /// a race for the same key, plus store and archive failures.
    pub async fn seal(&self, day: NaiveDate) -> LedgerResult<SealManifest> {
        let today = self.clock.now().date_naive();
        if day >= today {
            return Err(LedgerError::validation(
                "day",
                format!("{day} is not a completed UTC day (today is {today})"),
            ));
        }

        let (start, end) = day_bounds(day);
        let window = TimeWindow::between(start, end);
        let records = self.collect(&window).await?;
        let payload = encode_ndjson(&records)?;
        let payload_digest = digest_hex(&payload);

        let object_key = self.object_key(day);
        let mut manifest = SealManifest {
            day,
            digest_key: digest_key(&object_key),
            object_key,
            record_count: records.len() as u64,
            payload_digest,
            window_start: start,
            window_end: end,
            first_sequence: records.first().map(|r| r.sequence),
            last_sequence: records.last().map(|r| r.sequence),
            terminal_hash: records.last().map(|r| r.hash.clone()),
            retain_until: None,
            status: SealStatus::Sealed,
        };

        if let Some(existing) = self.archive.head_object(&manifest.object_key).await? {
            let archived = existing.tag(TAG_PAYLOAD_DIGEST).unwrap_or_default();
            if archived != manifest.payload_digest {
                warn!(
                    %day,
                    archived = %archived,
                    live = %manifest.payload_digest,
                    "live records differ from the sealed archive"
                );
                return Err(LedgerError::SealConflict {
                    day: day.to_string(),
                    archived: archived.to_string(),
                    live: manifest.payload_digest,
                });
            }
            self.ensure_digest_object(&manifest, existing.retain_until).await?;
            info!(%day, key = %manifest.object_key, "day already sealed");
            manifest.retain_until = Some(existing.retain_until);
            manifest.status = SealStatus::AlreadySealed;
            return Ok(manifest);
        }

        if records.is_empty() {
            info!(%day, "no records for day, nothing sealed");
            manifest.status = SealStatus::Empty;
            return Ok(manifest);
        }

        let retain_until = self.clock.now() + Duration::days(i64::from(self.config.retention_days));
        let metadata = ObjectMetadata {
            content_type: "application/x-ndjson".to_string(),
            content_encoding: Some("gzip".to_string()),
            retain_until,
            tags: manifest_tags(&manifest),
        };

        let compressed = tokio::task::spawn_blocking(move || gzip(&payload))
            .await
            .map_err(|e| LedgerError::archive(format!("compression task failed: {e}")))??;
        let compressed_len = compressed.len();

        self.archive
            .put_object(&manifest.object_key, compressed, metadata)
            .await?;
        self.ensure_digest_object(&manifest, retain_until).await?;

        info!(
            %day,
            key = %manifest.object_key,
            records = manifest.record_count,
            bytes = compressed_len,
            digest = %manifest.payload_digest,
            "day sealed"
        );
        manifest.retain_until = Some(retain_until);
        Ok(manifest)
    }

    /// Read a sealed day back and check it end to end: the stored digest, the
    /// companion digest object, the record count, and the chain links inside
    /// the payload.
    ///
    /// A payload that no longer matches its digest is an `Archive` error.  A
    /// broken link inside a payload that does match is reported in the
    /// returned `VerificationReport`.
    pub async fn verify_archive(&self, day: NaiveDate) -> LedgerResult<VerificationReport> {
        let key = self.object_key(day);
        let object = self
            .archive
            .get_object(&key)
            .await?
            .ok_or_else(|| LedgerError::archive(format!("{day} has not been sealed")))?;

        let metadata = object.metadata;
        let body = object.body;
        let payload = tokio::task::spawn_blocking(move || gunzip(&body))
            .await
            .map_err(|e| LedgerError::archive(format!("decompression task failed: {e}")))??;
        let digest = digest_hex(&payload);

        let expected = metadata.tag(TAG_PAYLOAD_DIGEST).unwrap_or_default();
        if digest != expected {
            return Err(LedgerError::archive(format!(
                "payload digest {digest} of '{key}' does not match recorded {expected}"
            )));
        }

        let companion = self
            .archive
            .get_object(&digest_key(&key))
            .await?
            .ok_or_else(|| LedgerError::archive(format!("digest object for '{key}' is missing")))?;
        let companion_digest = String::from_utf8_lossy(&companion.body)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if companion_digest != digest {
            return Err(LedgerError::archive(format!(
                "digest object for '{key}' holds {companion_digest}, payload is {digest}"
            )));
        }

        let records = decode_ndjson(&payload)?;
        let recorded_count = metadata.tag(TAG_RECORD_COUNT).unwrap_or_default();
        if recorded_count != records.len().to_string() {
            return Err(LedgerError::archive(format!(
                "'{key}' holds {} records, metadata says {recorded_count}",
                records.len()
            )));
        }

        let Some(first) = records.first() else {
            return Ok(VerificationReport::intact(0));
        };
        let report = match verify_run(&records, &first.prev_hash, first.sequence)? {
            None => VerificationReport::intact(records.len() as u64),
            Some(failure) => {
                let checked = records
                    .iter()
                    .position(|r| r.id == failure.record_id)
                    .map_or(records.len(), |i| i + 1);
                VerificationReport::broken(failure.record_id, checked as u64, failure.reason)
            }
        };
        debug!(%day, valid = report.valid, checked = report.checked, "archive verified");
        Ok(report)
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    async fn collect(&self, window: &TimeWindow) -> LedgerResult<Vec<AuditRecord>> {
        let mut records = Vec::new();
        let mut after = None;
        loop {
            let page = self.store.scan(window, after, SCAN_PAGE).await?;
            let full = page.len() == SCAN_PAGE;
            after = page.last().map(|r| r.sequence);
            records.extend(page);
            if !full {
                return Ok(records);
            }
        }
    }

    async fn ensure_digest_object(
        &self,
        manifest: &SealManifest,
        retain_until: DateTime<Utc>,
    ) -> LedgerResult<()> {
        if self.archive.head_object(&manifest.digest_key).await?.is_some() {
            return Ok(());
        }
        let body = format!(
            "{}  {}\n",
            manifest.payload_digest,
            object_file_name(manifest.day)
        );
        let metadata = ObjectMetadata {
            content_type: "text/plain".to_string(),
            content_encoding: None,
            retain_until,
            tags: BTreeMap::from([(TAG_PAYLOAD_DIGEST.to_string(), manifest.payload_digest.clone())]),
        };
        match self
            .archive
            .put_object(&manifest.digest_key, body.into_bytes(), metadata)
            .await
        {
            Ok(()) | Err(LedgerError::AlreadySealed { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn object_file_name(day: NaiveDate) -> String {
    format!("audit_{}T000000Z.ndjson.gz", day.format("%Y%m%d"))
}

fn digest_key(object_key: &str) -> String {
    format!("{object_key}.sha256")
}

fn manifest_tags(manifest: &SealManifest) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(TAG_RECORD_COUNT.to_string(), manifest.record_count.to_string());
    tags.insert(TAG_WINDOW_START.to_string(), manifest.window_start.to_rfc3339());
    tags.insert(TAG_WINDOW_END.to_string(), manifest.window_end.to_rfc3339());
    tags.insert(TAG_PAYLOAD_DIGEST.to_string(), manifest.payload_digest.clone());
    if let Some(first) = manifest.first_sequence {
        tags.insert(TAG_FIRST_SEQUENCE.to_string(), first.to_string());
    }
    if let Some(last) = manifest.last_sequence {
        tags.insert(TAG_LAST_SEQUENCE.to_string(), last.to_string());
    }
    if let Some(hash) = &manifest.terminal_hash {
        tags.insert(TAG_TERMINAL_HASH.to_string(), hash.clone());
    }
    tags
}
