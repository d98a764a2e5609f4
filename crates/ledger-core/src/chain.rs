//! Hash-chain primitives: canonical hashing and link checks.
//!
//! A record's hash is SHA-256 over the compact JSON encoding of a fixed,
//! explicitly listed projection of the record.  Every field except `hash`
//! itself is listed so nothing is accidentally omitted, and `prev_hash` is
//! included so each hash commits to the entire history before it.
//!
//! Determinism rests on three things:
//!   1. struct fields serialize in declaration order,
//!   2. `serde_json` maps (the `data_redacted` payload) keep keys sorted,
//!   3. `created_at` is rendered with a fixed RFC 3339 nanosecond format.

use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    record::{ActorType, AuditRecord, Outcome, RecordId},
};

/// The hashed projection of an `AuditRecord`: everything but `hash`.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    id: &'a RecordId,
    sequence: u64,
    module: &'a str,
    action: &'a str,
    resource_type: Option<&'a str>,
    resource_id: Option<&'a str>,
    actor_type: ActorType,
    actor_id: Option<&'a str>,
    actor_org: Option<&'a str>,
    result: Outcome,
    reason: Option<&'a str>,
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    device_id: Option<&'a str>,
    geo_country: Option<&'a str>,
    geo_city: Option<&'a str>,
    request_id: Option<&'a str>,
    session_id: Option<&'a str>,
    risk_score: Option<i32>,
    data_redacted: &'a serde_json::Value,
    data_ciphertext: Option<&'a str>,
    idempotency_key: Option<&'a str>,
    created_at: String,
    prev_hash: &'a str,
}

impl<'a> CanonicalRecord<'a> {
    fn of(r: &'a AuditRecord) -> Self {
        Self {
            id: &r.id,
            sequence: r.sequence,
            module: &r.module,
            action: &r.action,
            resource_type: r.resource_type.as_deref(),
            resource_id: r.resource_id.as_deref(),
            actor_type: r.actor_type,
            actor_id: r.actor_id.as_deref(),
            actor_org: r.actor_org.as_deref(),
            result: r.result,
            reason: r.reason.as_deref(),
            ip: r.ip.as_deref(),
            user_agent: r.user_agent.as_deref(),
            device_id: r.device_id.as_deref(),
            geo_country: r.geo_country.as_deref(),
            geo_city: r.geo_city.as_deref(),
            request_id: r.request_id.as_deref(),
            session_id: r.session_id.as_deref(),
            risk_score: r.risk_score,
            data_redacted: &r.data_redacted,
            data_ciphertext: r.data_ciphertext.as_deref(),
            idempotency_key: r.idempotency_key.as_deref(),
            created_at: r.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            prev_hash: &r.prev_hash,
        }
    }
}

/// Compute the SHA-256 hash of a record from its stored fields.
///
/// The stored `hash` field is ignored.  Returns a lowercase 64-character hex
/// string.
pub fn hash_record(record: &AuditRecord) -> LedgerResult<String> {
    let canonical = serde_json::to_vec(&CanonicalRecord::of(record))
        .map_err(|e| LedgerError::store(format!("canonical encoding failed: {e}")))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Hex SHA-256 of an arbitrary byte payload.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Why a record failed a chain check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub record_id: RecordId,
    pub reason: String,
}

/// Check one record against its expected predecessor.
///
/// `expected_prev` is the stored hash of the previous record (or
/// `GENESIS_HASH`), `expected_sequence` its sequence plus one.  Checks, in
/// order: contiguous sequence, `prev_hash` linkage, recomputed hash.
pub fn check_link(
    record: &AuditRecord,
    expected_prev: &str,
    expected_sequence: u64,
) -> LedgerResult<Option<LinkFailure>> {
    let fail = |reason: String| {
        Ok(Some(LinkFailure {
            record_id: record.id,
            reason,
        }))
    };

    if record.sequence != expected_sequence {
        return fail(format!(
            "sequence gap: expected {expected_sequence}, found {}",
            record.sequence
        ));
    }
    if record.prev_hash != expected_prev {
        return fail(format!(
            "prev_hash {} does not match predecessor hash {expected_prev}",
            record.prev_hash
        ));
    }
    let recomputed = hash_record(record)?;
    if record.hash != recomputed {
        return fail(format!(
            "stored hash {} does not match recomputed {recomputed}",
            record.hash
        ));
    }
    Ok(None)
}

/// Verify a contiguous run of records starting after `expected_prev`.
///
/// Returns the first failure, or `None` when every link holds.  An empty
/// slice is valid.
pub fn verify_run(
    records: &[AuditRecord],
    expected_prev: &str,
    first_sequence: u64,
) -> LedgerResult<Option<LinkFailure>> {
    let mut prev = expected_prev.to_string();
    let mut sequence = first_sequence;
    for record in records {
        if let Some(failure) = check_link(record, &prev, sequence)? {
            return Ok(Some(failure));
        }
        prev = record.hash.clone();
        sequence = sequence.saturating_add(1);
    }
    Ok(None)
}
