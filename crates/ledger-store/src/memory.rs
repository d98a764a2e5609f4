//! In-memory implementation of `RecordStore`.
//!
//! `ChainIndex` is the shared record index: a `Vec` in insertion order plus
//! id and idempotency-key lookups.  `MemoryStore` wraps one behind an
//! `RwLock`; `FileStore` uses the same index as its read path.
//!
//! All mutation happens inside a single synchronous critical section, so a
//! commit is visible to readers either completely or not at all.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::{SearchCriteria, TimeWindow},
    record::{AuditRecord, ChainHead, RecordId},
};
use ledger_core::traits::RecordStore;

// ── Shared index ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct ChainIndex {
    /// All committed records, in insertion order.
    pub(crate) records: Vec<AuditRecord>,
    by_id: HashMap<RecordId, usize>,
    by_key: HashMap<String, RecordId>,
}

impl ChainIndex {
    /// Rebuild an index from stored records without re-verifying them.
    pub(crate) fn from_records(records: Vec<AuditRecord>) -> Self {
        let mut index = Self::default();
        index.extend(records);
        index
    }

    pub(crate) fn head(&self) -> Option<ChainHead> {
        self.records.last().map(|r| ChainHead {
            sequence: r.sequence,
            hash: r.hash.clone(),
            created_at: r.created_at,
        })
    }

    fn head_hash(&self) -> &str {
        self.records
            .last()
            .map(|r| r.hash.as_str())
            .unwrap_or(AuditRecord::GENESIS_HASH)
    }

    /// Check that `records` may be appended on top of the current head.
    pub(crate) fn check_commit(&self, expected_prev: &str, records: &[AuditRecord]) -> LedgerResult<()> {
        let actual = self.head_hash();
        if actual != expected_prev {
            return Err(LedgerError::ForkConflict {
                expected: expected_prev.to_string(),
                actual: actual.to_string(),
            });
        }

        let mut next_sequence = self.records.last().map_or(0, |r| r.sequence + 1);
        let mut prev = expected_prev;
        for record in records {
            if record.sequence != next_sequence || record.prev_hash != prev {
                return Err(LedgerError::store(format!(
                    "record {} is not linked to sequence {next_sequence}",
                    record.id
                )));
            }
            if self.by_id.contains_key(&record.id) {
                return Err(LedgerError::store(format!("duplicate record id {}", record.id)));
            }
            if let Some(key) = &record.idempotency_key {
                if self.by_key.contains_key(key) {
                    return Err(LedgerError::store(format!(
                        "idempotency key '{key}' already committed"
                    )));
                }
            }
            prev = &record.hash;
            next_sequence += 1;
        }
        Ok(())
    }

    pub(crate) fn extend(&mut self, records: Vec<AuditRecord>) {
        for record in records {
            let position = self.records.len();
            self.by_id.insert(record.id, position);
            if let Some(key) = &record.idempotency_key {
                self.by_key.insert(key.clone(), record.id);
            }
            self.records.push(record);
        }
    }

    pub(crate) fn get(&self, id: RecordId) -> Option<AuditRecord> {
        self.by_id.get(&id).map(|&i| self.records[i].clone())
    }

    pub(crate) fn get_by_sequence(&self, sequence: u64) -> Option<AuditRecord> {
        // Sequence equals position in an intact chain; fall back to a scan
        // so a damaged chain still answers truthfully.
        let positional = usize::try_from(sequence)
            .ok()
            .and_then(|i| self.records.get(i))
            .filter(|r| r.sequence == sequence);
        positional
            .or_else(|| self.records.iter().find(|r| r.sequence == sequence))
            .cloned()
    }

    pub(crate) fn find_by_idempotency_key(&self, key: &str) -> Option<RecordId> {
        self.by_key.get(key).copied()
    }

    /// A contiguous run of the chain, never a filtered subset.
    ///
    /// The first page starts at the earliest record created at or after
    /// `window.from`; later pages resume right after `after_sequence`.  The
    /// run ends at the first record past `window.to` whose successor is not
    /// earlier than it, so a record whose `created_at` was pushed forward
    /// stays in the run together with everything after it.
    pub(crate) fn scan(
        &self,
        window: &TimeWindow,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> Vec<AuditRecord> {
        let start = match (after_sequence, window.from) {
            (Some(sequence), _) => self.position_after(sequence),
            (None, Some(from)) => self
                .records
                .iter()
                .position(|r| r.created_at >= from)
                .unwrap_or(self.records.len()),
            (None, None) => 0,
        };

        let tail = &self.records[start..];
        let mut page = Vec::new();
        for (i, record) in tail.iter().enumerate() {
            if page.len() >= limit {
                break;
            }
            if window.is_past_end(record.created_at) {
                let out_of_order = tail
                    .get(i + 1)
                    .is_some_and(|next| next.created_at < record.created_at);
                if !out_of_order {
                    break;
                }
            }
            page.push(record.clone());
        }
        page
    }

    /// Index of the record right after the one holding `sequence`.
    fn position_after(&self, sequence: u64) -> usize {
        // Sequence minus the first sequence is the position in an intact
        // chain, including one loaded from a partial export.
        let offset = self.records.first().map_or(0, |r| r.sequence);
        let positional = sequence
            .checked_sub(offset)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| self.records.get(i).is_some_and(|r| r.sequence == sequence));
        match positional {
            Some(i) => i + 1,
            None => self
                .records
                .iter()
                .position(|r| r.sequence > sequence)
                .unwrap_or(self.records.len()),
        }
    }

    pub(crate) fn search(&self, criteria: &SearchCriteria, limit: usize) -> Vec<AuditRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| criteria.matches(r))
            .take(limit)
            .cloned()
            .collect()
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A `RecordStore` held entirely in memory.
///
/// Cloning shares the same underlying index.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) index: Arc<RwLock<ChainIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store directly from stored records, bypassing the engine.
    ///
    /// Used to load exported chains and by harnesses that need to present
    /// the verifier with a chain that was altered after commit.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        Self {
            index: Arc::new(RwLock::new(ChainIndex::from_records(records))),
        }
    }

    /// A copy of every record, in insertion order.
    pub fn records(&self) -> LedgerResult<Vec<AuditRecord>> {
        Ok(self.read()?.records.clone())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, ChainIndex>> {
        self.index
            .read()
            .map_err(|e| LedgerError::store(format!("record index lock poisoned: {e}")))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, ChainIndex>> {
        self.index
            .write()
            .map_err(|e| LedgerError::store(format!("record index lock poisoned: {e}")))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn head(&self) -> LedgerResult<Option<ChainHead>> {
        Ok(self.read()?.head())
    }

    async fn commit(&self, expected_prev: &str, records: Vec<AuditRecord>) -> LedgerResult<()> {
        let mut index = self.write()?;
        index.check_commit(expected_prev, &records)?;
        index.extend(records);
        Ok(())
    }

    async fn get(&self, id: RecordId) -> LedgerResult<Option<AuditRecord>> {
        Ok(self.read()?.get(id))
    }

    async fn get_by_sequence(&self, sequence: u64) -> LedgerResult<Option<AuditRecord>> {
        Ok(self.read()?.get_by_sequence(sequence))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<RecordId>> {
        Ok(self.read()?.find_by_idempotency_key(key))
    }

    async fn scan(
        &self,
        window: &TimeWindow,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<AuditRecord>> {
        Ok(self.read()?.scan(window, after_sequence, limit))
    }

    async fn search(&self, criteria: &SearchCriteria, limit: usize) -> LedgerResult<Vec<AuditRecord>> {
        Ok(self.read()?.search(criteria, limit))
    }

    async fn count(&self) -> LedgerResult<u64> {
        Ok(self.read()?.records.len() as u64)
    }
}
