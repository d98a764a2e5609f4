//! Result types produced by the verifier, the sealer, and the stats query.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{LedgerError, LedgerResult},
    query::TimeWindow,
    record::RecordId,
};

/// Outcome of walking a window of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if every record in the window passed every check.
    pub valid: bool,
    /// The first record that failed, if any.
    pub broken_at: Option<RecordId>,
    /// Records examined, including the failing one.
    pub checked: u64,
    /// Human-readable description of the failure.
    pub reason: Option<String>,
}

impl VerificationReport {
    pub fn intact(checked: u64) -> Self {
        Self {
            valid: true,
            broken_at: None,
            checked,
            reason: None,
        }
    }

    pub fn broken(at: RecordId, checked: u64, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            broken_at: Some(at),
            checked,
            reason: Some(reason.into()),
        }
    }

    /// Convert a failed report into `LedgerError::ChainBroken`.
    pub fn into_result(self) -> LedgerResult<Self> {
        match (self.valid, self.broken_at) {
            (true, _) => Ok(self),
            (false, at) => Err(LedgerError::ChainBroken {
                record_id: at.map(|id| id.to_string()).unwrap_or_default(),
                reason: self.reason.unwrap_or_default(),
            }),
        }
    }
}

/// What a seal run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealStatus {
    /// A new archive object was written.
    Sealed,
    /// The day was already sealed with an identical digest; nothing written.
    AlreadySealed,
    /// The day had no records; nothing written.
    Empty,
}

/// Integrity manifest for one sealed day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealManifest {
    pub day: NaiveDate,
    pub object_key: String,
    pub digest_key: String,
    pub record_count: u64,
    /// Lowercase hex SHA-256 of the uncompressed NDJSON payload.
    pub payload_digest: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    /// `hash` of the last record in the sealed range.
    pub terminal_hash: Option<String>,
    pub retain_until: Option<DateTime<Utc>>,
    pub status: SealStatus,
}

/// Aggregate counts over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub window: TimeWindow,
    pub total: u64,
    pub by_result: BTreeMap<String, u64>,
    pub by_actor_type: BTreeMap<String, u64>,
    pub by_module: BTreeMap<String, u64>,
    /// Most frequent actor ids, highest count first.
    pub top_actors: Vec<ActorCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorCount {
    pub actor_id: String,
    pub count: u64,
}
