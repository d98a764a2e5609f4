//! Trait definitions at the ledger's seams.
//!
//! - `RecordStore`: the transactional record store every component reads
//!   from and only the append engine writes to
//! - `AccessPolicy`: credential, scope, role, and module gate
//! - `Clock`: the source of `created_at`, swappable in tests
//!
//! Only the append engine calls `RecordStore::commit`.  The verifier, the
//! sealer, and the query service are read-only consumers.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use ledger_contracts::{
    capability::{Operation, Principal},
    error::LedgerResult,
    query::{SearchCriteria, TimeWindow},
    record::{AuditRecord, ChainHead, RecordId},
};

/// Persistent, append-only storage for committed records.
///
/// Implementations must make `commit` atomic: either every record in the
/// batch becomes visible to readers, or none does.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The current chain head, or `None` for an empty chain.
    async fn head(&self) -> LedgerResult<Option<ChainHead>>;

    /// Append `records` if and only if the current head hash equals
    /// `expected_prev` (`GENESIS_HASH` for an empty chain).
    ///
    /// Returns `LedgerError::ForkConflict` when the head has moved, leaving
    /// the store untouched.  `records` must already be linked and hashed.
    async fn commit(&self, expected_prev: &str, records: Vec<AuditRecord>) -> LedgerResult<()>;

    /// Look up a record by id.
    async fn get(&self, id: RecordId) -> LedgerResult<Option<AuditRecord>>;

    /// Look up a record by chain position.
    async fn get_by_sequence(&self, sequence: u64) -> LedgerResult<Option<AuditRecord>>;

    /// The id of the record committed with this idempotency key, if any.
    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<RecordId>>;

    /// Up to `limit` consecutive records of `window`, in insertion order,
    /// strictly after `after_sequence` when given.
    ///
    /// The run starts at the first record created at or after the window's
    /// start and never skips a record.  It ends at the first record past the
    /// window's end unless that record's successor is earlier than it; such a
    /// record is returned so callers see the out-of-order `created_at`.
    async fn scan(
        &self,
        window: &TimeWindow,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<AuditRecord>>;

    /// Up to `limit` records matching `criteria`, newest first.
    async fn search(&self, criteria: &SearchCriteria, limit: usize) -> LedgerResult<Vec<AuditRecord>>;

    /// Total committed records.
    async fn count(&self) -> LedgerResult<u64>;
}

/// The access gate in front of the ledger's external interfaces.
///
/// Implementations must be deny-by-default: an unknown credential, an
/// operation without a granting rule, or a module absent from the allow-list
/// is refused.
pub trait AccessPolicy: Send + Sync {
    /// Resolve a bearer token to a principal.
    fn authenticate(&self, bearer: Option<&str>) -> LedgerResult<Principal>;

    /// Check that `principal` may perform `operation`.
    fn authorize(&self, principal: &Principal, operation: Operation) -> LedgerResult<()>;

    /// Check that records of `module` may be ingested.
    fn check_module(&self, module: &str) -> LedgerResult<()>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.  Used by simulations and tests
/// that need records on a specific day.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
