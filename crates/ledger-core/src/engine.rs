//! The hash-chain append engine.
//!
//! Every append runs the same pipeline:
//!
//!   Validate → [acquire writer] → Read head → Link + hash → Commit
//!
//! The chain head is the single shared mutable resource.  The engine owns a
//! writer mutex so at most one append or batch is between "read head" and
//! "commit" at any time, and the store's compare-and-commit rejects a commit
//! whose expected head is stale (another engine instance on the same store).
//! A stale head is retried a bounded number of times after re-reading.
//!
//! Validation happens before the writer is acquired, so a malformed batch
//! never touches the head.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    record::{AuditRecord, ChainHead, RecordDraft, RecordId, RecordInput},
};

use crate::{
    chain::hash_record,
    traits::{Clock, RecordStore},
};

/// Tunables for the append engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for the writer and reading the head.
    pub append_timeout: Duration,
    /// How many times a stale-head commit is retried before surfacing
    /// `ForkConflict` to the caller.
    pub max_fork_retries: u32,
    /// Largest batch accepted by `append_batch`.
    pub max_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            append_timeout: Duration::from_secs(5),
            max_fork_retries: 3,
            max_batch: 1000,
        }
    }
}

/// Records linked against one head read, ready to commit.
struct LinkPlan {
    expected_prev: String,
    records: Vec<AuditRecord>,
    /// One id per input draft, in input order.  Drafts whose idempotency key
    /// was already committed carry the existing id and add no record.
    ids: Vec<RecordId>,
}

/// Serializes appends against the chain head.
pub struct AppendEngine {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    writer: Mutex<()>,
}

impl AppendEngine {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The current chain head as committed in the store.
    pub async fn head(&self) -> LedgerResult<Option<ChainHead>> {
        self.store.head().await
    }

    /// Append a single record and return its id.
    ///
    /// # Errors
    ///
    /// `Validation` when a required classification field is missing,
    /// `Timeout` when the writer or head could not be obtained in time,
    /// `ForkConflict` when the retry budget is exhausted, and any store error.
    pub async fn append(&self, input: RecordInput) -> LedgerResult<RecordId> {
        let draft = input.validate()?;
        let ids = self.commit_drafts(vec![draft]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| LedgerError::store("commit produced no id"))
    }

    /// Append `inputs` as one all-or-nothing unit, linked in the given order.
    ///
    /// # Errors
    ///
    /// `Batch { index }` naming the first invalid record (nothing committed),
    /// `Validation` for an empty or oversized batch, plus everything
    /// `append` can return.
    pub async fn append_batch(&self, inputs: Vec<RecordInput>) -> LedgerResult<Vec<RecordId>> {
        if inputs.is_empty() {
            return Err(LedgerError::validation("records", "batch is empty"));
        }
        if inputs.len() > self.config.max_batch {
            return Err(LedgerError::validation(
                "records",
                format!(
                    "batch of {} exceeds the limit of {}",
                    inputs.len(),
                    self.config.max_batch
                ),
            ));
        }

        let drafts = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                input.validate().map_err(|e| LedgerError::Batch {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        self.commit_drafts(drafts).await
    }

    // ── Internal pipeline ─────────────────────────────────────────────────────

    async fn commit_drafts(&self, drafts: Vec<RecordDraft>) -> LedgerResult<Vec<RecordId>> {
        let deadline = Instant::now() + self.config.append_timeout;

        // Everything up to the commit is bounded by the deadline.  Dropping
        // out here leaves the store untouched.
        let _writer = timeout_at(deadline, self.writer.lock())
            .await
            .map_err(|_| self.timeout_error())?;

        let mut attempt: u32 = 0;
        loop {
            let plan = timeout_at(deadline, self.link(&drafts))
                .await
                .map_err(|_| self.timeout_error())??;

            if plan.records.is_empty() {
                debug!(count = plan.ids.len(), "all records already committed under their idempotency keys");
                return Ok(plan.ids);
            }

            let first = plan.records.first().map(|r| r.sequence);
            let last = plan.records.last().map(|r| (r.sequence, r.hash.clone()));

            // The commit itself is never raced against the deadline: the store
            // either applies the whole batch or nothing.
            match self.store.commit(&plan.expected_prev, plan.records).await {
                Ok(()) => {
                    if let (Some(first), Some((last, head_hash))) = (first, last) {
                        debug!(
                            first_sequence = first,
                            last_sequence = last,
                            head = %head_hash,
                            "records committed"
                        );
                    }
                    return Ok(plan.ids);
                }
                Err(LedgerError::ForkConflict { expected, actual })
                    if attempt < self.config.max_fork_retries =>
                {
                    attempt += 1;
                    warn!(
                        attempt,
                        expected = %expected,
                        actual = %actual,
                        "chain head moved before commit, relinking"
                    );
                }
                Err(e) => {
                    if matches!(e, LedgerError::ForkConflict { .. }) {
                        info!(attempts = attempt + 1, "fork retry budget exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Read the head once and link every draft against it locally.
    async fn link(&self, drafts: &[RecordDraft]) -> LedgerResult<LinkPlan> {
        let head = self.store.head().await?;

        let (expected_prev, mut next_sequence, floor) = match &head {
            Some(h) => (h.hash.clone(), h.sequence + 1, Some(h.created_at)),
            None => (AuditRecord::GENESIS_HASH.to_string(), 0, None),
        };

        // created_at never goes backwards along the chain, whatever the
        // wall clock does.
        let now = self.clock.now();
        let created_at = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };

        let mut prev_hash = expected_prev.clone();
        let mut records = Vec::with_capacity(drafts.len());
        let mut ids = Vec::with_capacity(drafts.len());
        let mut batch_keys: HashMap<&str, RecordId> = HashMap::new();

        for draft in drafts {
            if let Some(key) = draft.idempotency_key.as_deref() {
                if let Some(id) = batch_keys.get(key) {
                    ids.push(*id);
                    continue;
                }
                if let Some(id) = self.store.find_by_idempotency_key(key).await? {
                    debug!(idempotency_key = %key, record_id = %id, "duplicate append ignored");
                    ids.push(id);
                    continue;
                }
            }

            let id = RecordId::new();
            let mut record = AuditRecord::from_draft(
                draft.clone(),
                id,
                next_sequence,
                created_at,
                prev_hash.clone(),
            );
            record.hash = hash_record(&record)?;

            if let Some(key) = draft.idempotency_key.as_deref() {
                batch_keys.insert(key, id);
            }
            prev_hash = record.hash.clone();
            next_sequence += 1;
            ids.push(id);
            records.push(record);
        }

        Ok(LinkPlan {
            expected_prev,
            records,
            ids,
        })
    }

    fn timeout_error(&self) -> LedgerError {
        LedgerError::Timeout {
            operation: "append".to_string(),
            after_ms: u64::try_from(self.config.append_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex as StdMutex,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use ledger_contracts::{
        error::{LedgerError, LedgerResult},
        query::{SearchCriteria, TimeWindow},
        record::{ActorType, AuditRecord, ChainHead, Outcome, RecordId, RecordInput},
    };

    use crate::chain::{hash_record, verify_run};
    use crate::traits::{ManualClock, RecordStore};

    use super::{AppendEngine, EngineConfig};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn input(module: &str, result: Outcome) -> RecordInput {
        RecordInput {
            module: Some(module.to_string()),
            action: Some("charge".to_string()),
            actor_type: Some(ActorType::User),
            actor_id: Some("u1".to_string()),
            result: Some(result),
            data_redacted: json!({ "n": 1 }),
            ..Default::default()
        }
    }

    /// A store that keeps records in a Vec and can simulate a concurrent
    /// writer by injecting a foreign record just before a commit.
    #[derive(Default)]
    struct MockStore {
        records: StdMutex<Vec<AuditRecord>>,
        /// Number of upcoming commits that should find the head moved.
        forks_to_inject: AtomicU32,
        commits: AtomicU32,
    }

    impl MockStore {
        fn snapshot(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }

        fn inject_foreign(&self, records: &mut Vec<AuditRecord>) {
            let (prev, seq) = records
                .last()
                .map(|r| (r.hash.clone(), r.sequence + 1))
                .unwrap_or((AuditRecord::GENESIS_HASH.to_string(), 0));
            let mut foreign = AuditRecord::from_draft(
                input("foreign", Outcome::Allow).validate().unwrap(),
                RecordId::new(),
                seq,
                Utc::now(),
                prev,
            );
            foreign.hash = hash_record(&foreign).unwrap();
            records.push(foreign);
        }
    }

    #[async_trait]
    impl RecordStore for MockStore {
        async fn head(&self) -> LedgerResult<Option<ChainHead>> {
            Ok(self.records.lock().unwrap().last().map(|r| ChainHead {
                sequence: r.sequence,
                hash: r.hash.clone(),
                created_at: r.created_at,
            }))
        }

        async fn commit(&self, expected_prev: &str, new: Vec<AuditRecord>) -> LedgerResult<()> {
            let mut records = self.records.lock().unwrap();
            if self.forks_to_inject.load(Ordering::SeqCst) > 0 {
                self.forks_to_inject.fetch_sub(1, Ordering::SeqCst);
                self.inject_foreign(&mut records);
            }
            let actual = records
                .last()
                .map(|r| r.hash.clone())
                .unwrap_or_else(|| AuditRecord::GENESIS_HASH.to_string());
            if actual != expected_prev {
                return Err(LedgerError::ForkConflict {
                    expected: expected_prev.to_string(),
                    actual,
                });
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            records.extend(new);
            Ok(())
        }

        async fn get(&self, id: RecordId) -> LedgerResult<Option<AuditRecord>> {
            Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
        }

        async fn get_by_sequence(&self, sequence: u64) -> LedgerResult<Option<AuditRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.sequence == sequence)
                .cloned())
        }

        async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<RecordId>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.idempotency_key.as_deref() == Some(key))
                .map(|r| r.id))
        }

        async fn scan(
            &self,
            _window: &TimeWindow,
            _after_sequence: Option<u64>,
            _limit: usize,
        ) -> LedgerResult<Vec<AuditRecord>> {
            Ok(self.snapshot())
        }

        async fn search(&self, _criteria: &SearchCriteria, _limit: usize) -> LedgerResult<Vec<AuditRecord>> {
            Ok(self.snapshot())
        }

        async fn count(&self) -> LedgerResult<u64> {
            Ok(self.records.lock().unwrap().len() as u64)
        }
    }

    fn engine(store: Arc<MockStore>) -> AppendEngine {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        AppendEngine::new(store, Arc::new(clock), EngineConfig::default())
    }

    // ── Test cases ────────────────────────────────────────────────────────────

    /// The first record links to genesis and later ones to their predecessor.
    #[tokio::test]
    async fn test_append_links_records() {
        let store = Arc::new(MockStore::default());
        let engine = engine(store.clone());

        let a = engine.append(input("pay", Outcome::Success)).await.unwrap();
        let b = engine.append(input("pay", Outcome::Failure)).await.unwrap();

        let records = store.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, a);
        assert_eq!(records[1].id, b);
        assert_eq!(records[0].prev_hash, AuditRecord::GENESIS_HASH);
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert_eq!(records[1].sequence, 1);
        assert!(verify_run(&records, AuditRecord::GENESIS_HASH, 0).unwrap().is_none());
    }

    /// A missing classification field is rejected before anything is written.
    #[tokio::test]
    async fn test_append_rejects_invalid_record() {
        let store = Arc::new(MockStore::default());
        let engine = engine(store.clone());

        let mut bad = input("pay", Outcome::Success);
        bad.actor_type = None;

        match engine.append(bad).await {
            Err(LedgerError::Validation { field, .. }) => assert_eq!(field, "actor_type"),
            other => panic!("expected Validation, got {:?}", other),
        }
        assert!(store.snapshot().is_empty());
    }

    /// One bad record in a batch commits nothing and leaves the head alone.
    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = Arc::new(MockStore::default());
        let engine = engine(store.clone());
        engine.append(input("pay", Outcome::Success)).await.unwrap();
        let head_before = engine.head().await.unwrap();

        let mut bad = input("pay", Outcome::Success);
        bad.module = None;
        let batch = vec![input("pay", Outcome::Success), bad, input("pay", Outcome::Deny)];

        match engine.append_batch(batch).await {
            Err(LedgerError::Batch { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("module"), "unexpected reason: {reason}");
            }
            other => panic!("expected Batch, got {:?}", other),
        }
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(engine.head().await.unwrap(), head_before);
    }

    /// A valid batch lands as one commit, linked in the given order.
    #[tokio::test]
    async fn test_batch_commits_once_in_order() {
        let store = Arc::new(MockStore::default());
        let engine = engine(store.clone());

        let ids = engine
            .append_batch(vec![
                input("a", Outcome::Success),
                input("b", Outcome::Success),
                input("c", Outcome::Success),
            ])
            .await
            .unwrap();

        let records = store.snapshot();
        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert_eq!(
            records.iter().map(|r| r.module.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(verify_run(&records, AuditRecord::GENESIS_HASH, 0).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let store = Arc::new(MockStore::default());
        let engine = AppendEngine::new(
            store,
            Arc::new(ManualClock::new(Utc::now())),
            EngineConfig { max_batch: 2, ..Default::default() },
        );
        assert!(matches!(
            engine.append_batch(vec![]).await,
            Err(LedgerError::Validation { .. })
        ));
        let three = vec![
            input("a", Outcome::Success),
            input("a", Outcome::Success),
            input("a", Outcome::Success),
        ];
        assert!(matches!(
            engine.append_batch(three).await,
            Err(LedgerError::Validation { .. })
        ));
    }

    /// A head that moves under the engine is detected and relinked.
    #[tokio::test]
    async fn test_fork_conflict_is_retried() {
        let store = Arc::new(MockStore::default());
        store.forks_to_inject.store(2, Ordering::SeqCst);
        let engine = engine(store.clone());

        let id = engine.append(input("pay", Outcome::Success)).await.unwrap();

        let records = store.snapshot();
        assert_eq!(records.len(), 3, "two foreign records plus ours");
        assert_eq!(records[2].id, id);
        assert!(verify_run(&records, AuditRecord::GENESIS_HASH, 0).unwrap().is_none());
    }

    /// Past the retry budget the conflict reaches the caller, nothing of ours
    /// committed.
    #[tokio::test]
    async fn test_fork_conflict_budget_exhausted() {
        let store = Arc::new(MockStore::default());
        store.forks_to_inject.store(10, Ordering::SeqCst);
        let engine = engine(store.clone());

        let result = engine.append(input("pay", Outcome::Success)).await;
        assert!(matches!(result, Err(LedgerError::ForkConflict { .. })));
        assert!(store.snapshot().iter().all(|r| r.module == "foreign"));
    }

    /// Re-sending a record with the same idempotency key is a no-op.
    #[tokio::test]
    async fn test_idempotency_key_deduplicates() {
        let store = Arc::new(MockStore::default());
        let engine = engine(store.clone());

        let mut first = input("pay", Outcome::Success);
        first.idempotency_key = Some("msg-1".to_string());
        let a = engine.append(first.clone()).await.unwrap();
        let b = engine.append(first.clone()).await.unwrap();
        assert_eq!(a, b);

        let ids = engine
            .append_batch(vec![first.clone(), input("pay", Outcome::Deny), first])
            .await
            .unwrap();
        assert_eq!(ids[0], a);
        assert_eq!(ids[2], a);
        assert_eq!(store.snapshot().len(), 2);
    }

    /// created_at never decreases even if the clock steps backwards.
    #[tokio::test]
    async fn test_created_at_is_monotonic() {
        let store = Arc::new(MockStore::default());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let engine = AppendEngine::new(store.clone(), clock.clone(), EngineConfig::default());

        engine.append(input("pay", Outcome::Success)).await.unwrap();
        clock.advance(chrono::Duration::minutes(-30));
        engine.append(input("pay", Outcome::Success)).await.unwrap();

        let records = store.snapshot();
        assert!(records[1].created_at >= records[0].created_at);
    }

    /// Waiting on a busy writer past the deadline times out without writing.
    #[tokio::test]
    async fn test_append_times_out_waiting_for_writer() {
        let store = Arc::new(MockStore::default());
        let engine = AppendEngine::new(
            store.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            EngineConfig {
                append_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let _held = engine.writer.lock().await;
        match engine.append(input("pay", Outcome::Success)).await {
            Err(LedgerError::Timeout { operation, .. }) => assert_eq!(operation, "append"),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(store.snapshot().is_empty());
    }
}
