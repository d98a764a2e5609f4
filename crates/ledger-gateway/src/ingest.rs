//! The single entry point both ingestion paths go through.
//!
//! `Ingestor` rejects modules outside the allow-list, discards engine-owned
//! fields a caller tried to supply, and hands the record to the append
//! engine.  The HTTP handlers and the stream consumer are thin adapters over
//! it.

use std::sync::Arc;

use tracing::{debug, warn};

use ledger_contracts::{
    error::LedgerResult,
    record::{RecordId, RecordInput},
};
use ledger_core::{traits::AccessPolicy, AppendEngine};

/// Which path a record arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    /// Request/response over HTTP.
    Sync,
    /// At-least-once message stream.
    Async,
}

/// Result of ingesting one stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Appended(RecordId),
    /// The idempotency key was already committed; nothing was appended.
    Duplicate(RecordId),
}

impl Ingested {
    pub fn id(&self) -> RecordId {
        match self {
            Ingested::Appended(id) | Ingested::Duplicate(id) => *id,
        }
    }
}

pub struct Ingestor {
    engine: Arc<AppendEngine>,
    policy: Arc<dyn AccessPolicy>,
}

impl Ingestor {
    pub fn new(engine: Arc<AppendEngine>, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { engine, policy }
    }

    pub fn engine(&self) -> &Arc<AppendEngine> {
        &self.engine
    }

    /// Append one record.
    pub async fn ingest(&self, input: RecordInput, path: IngestPath) -> LedgerResult<RecordId> {
        let input = self.prepare(input, path)?;
        self.engine.append(input).await
    }

    /// Append a batch as one all-or-nothing unit.
    ///
    /// A record whose module is not allowed rejects the whole batch with
    /// `ModuleNotAllowed`.
    pub async fn ingest_batch(&self, inputs: Vec<RecordInput>, path: IngestPath) -> LedgerResult<Vec<RecordId>> {
        let inputs = inputs
            .into_iter()
            .map(|input| self.prepare(input, path))
            .collect::<LedgerResult<Vec<_>>>()?;
        self.engine.append_batch(inputs).await
    }

    /// Append one stream message, telling a redelivery apart from a new
    /// record.
    pub async fn ingest_message(&self, input: RecordInput) -> LedgerResult<Ingested> {
        let input = self.prepare(input, IngestPath::Async)?;
        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(existing) = self.engine.store().find_by_idempotency_key(key).await? {
                debug!(idempotency_key = %key, id = %existing, "redelivered message ignored");
                return Ok(Ingested::Duplicate(existing));
            }
        }
        self.engine.append(input).await.map(Ingested::Appended)
    }

    fn prepare(&self, mut input: RecordInput, path: IngestPath) -> LedgerResult<RecordInput> {
        let client_id = input.client_id();
        let stripped = input.strip_engine_fields();
        if !stripped.is_empty() {
            warn!(
                fields = ?stripped,
                path = ?path,
                "discarded engine-owned fields supplied by caller"
            );
        }

        // A producer's own message id makes redeliveries of that message
        // no-ops instead of new records.
        if path == IngestPath::Async && input.idempotency_key.is_none() {
            input.idempotency_key = client_id;
        }

        if let Some(module) = input.module.as_deref() {
            let module = module.trim();
            if !module.is_empty() {
                self.policy.check_module(module)?;
            }
        }
        Ok(input)
    }
}
