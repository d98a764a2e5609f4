//! The audit record model.
//!
//! `RecordInput` is what callers send: every field optional, engine-owned
//! fields tolerated on the wire but never trusted.  `RecordDraft` is a
//! validated input with the classification fields guaranteed present.
//! `AuditRecord` is the committed, hash-chained entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};

/// Maximum length of `module` and `action`.
pub const MAX_LABEL_LEN: usize = 100;

/// Maximum length of any other free-text field.
pub const MAX_TEXT_LEN: usize = 4096;

/// Globally unique identifier of a committed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub uuid::Uuid);

impl RecordId {
    /// Create a new, random record ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| LedgerError::validation("id", format!("not a UUID: {e}")))
    }
}

/// Who performed the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Employee,
    Service,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Employee => "employee",
            ActorType::Service => "service",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "employee" => Ok(ActorType::Employee),
            "service" => Ok(ActorType::Service),
            other => Err(LedgerError::validation(
                "actor_type",
                format!("unknown actor type '{other}'"),
            )),
        }
    }
}

/// How the audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Deny,
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Outcome::Allow),
            "deny" => Ok(Outcome::Deny),
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            other => Err(LedgerError::validation(
                "result",
                format!("unknown result '{other}'"),
            )),
        }
    }
}

// ── Wire input ────────────────────────────────────────────────────────────────

/// A record as submitted by a caller, before validation.
///
/// The engine-owned fields (`id`, `sequence`, `hash`, `prev_hash`,
/// `created_at`) are accepted with any JSON type so that a forged value never
/// causes a parse failure; they are discarded by [`RecordInput::strip_engine_fields`]
/// and ignored by [`RecordInput::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordInput {
    pub module: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
    pub actor_org: Option<String>,
    pub result: Option<Outcome>,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub risk_score: Option<i32>,
    pub data_redacted: Value,
    pub data_ciphertext: Option<String>,
    pub idempotency_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
}

impl RecordInput {
    /// Remove every engine-owned field the caller supplied.
    ///
    /// Returns the names of the fields that were present, for logging.
    pub fn strip_engine_fields(&mut self) -> Vec<&'static str> {
        let mut stripped = Vec::new();
        if self.id.take().is_some() {
            stripped.push("id");
        }
        if self.sequence.take().is_some() {
            stripped.push("sequence");
        }
        if self.hash.take().is_some() {
            stripped.push("hash");
        }
        if self.prev_hash.take().is_some() {
            stripped.push("prev_hash");
        }
        if self.created_at.take().is_some() {
            stripped.push("created_at");
        }
        stripped
    }

    /// The caller-supplied `id` rendered as a string, if there is one.
    ///
    /// Stream producers use the message id as a retry key; the gateway turns
    /// it into an idempotency key before stripping.
    pub fn client_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Check required classification fields and size limits.
    ///
    /// Returns `LedgerError::Validation` naming the first offending field.
    pub fn validate(self) -> LedgerResult<RecordDraft> {
        let module = required_label("module", self.module)?;
        let action = required_label("action", self.action)?;
        let actor_type = self
            .actor_type
            .ok_or_else(|| LedgerError::validation("actor_type", "is required"))?;
        let result = self
            .result
            .ok_or_else(|| LedgerError::validation("result", "is required"))?;

        let optional = [
            ("resource_type", &self.resource_type),
            ("resource_id", &self.resource_id),
            ("actor_id", &self.actor_id),
            ("actor_org", &self.actor_org),
            ("reason", &self.reason),
            ("ip", &self.ip),
            ("user_agent", &self.user_agent),
            ("device_id", &self.device_id),
            ("geo_country", &self.geo_country),
            ("geo_city", &self.geo_city),
            ("request_id", &self.request_id),
            ("session_id", &self.session_id),
            ("idempotency_key", &self.idempotency_key),
        ];
        for (field, value) in optional {
            if let Some(v) = value {
                if v.chars().count() > MAX_TEXT_LEN {
                    return Err(LedgerError::validation(
                        field,
                        format!("exceeds {MAX_TEXT_LEN} characters"),
                    ));
                }
            }
        }

        Ok(RecordDraft {
            module,
            action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            actor_type,
            actor_id: self.actor_id,
            actor_org: self.actor_org,
            result,
            reason: self.reason,
            ip: self.ip,
            user_agent: self.user_agent,
            device_id: self.device_id,
            geo_country: self.geo_country,
            geo_city: self.geo_city,
            request_id: self.request_id,
            session_id: self.session_id,
            risk_score: self.risk_score,
            data_redacted: self.data_redacted,
            data_ciphertext: self.data_ciphertext,
            idempotency_key: self.idempotency_key,
        })
    }
}

fn required_label(field: &'static str, value: Option<String>) -> LedgerResult<String> {
    let value = value.ok_or_else(|| LedgerError::validation(field, "is required"))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(field, "must not be blank"));
    }
    if trimmed.chars().count() > MAX_LABEL_LEN {
        return Err(LedgerError::validation(
            field,
            format!("exceeds {MAX_LABEL_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// A validated record that has not yet been linked into the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub module: String,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub actor_org: Option<String>,
    pub result: Outcome,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub risk_score: Option<i32>,
    pub data_redacted: Value,
    pub data_ciphertext: Option<String>,
    pub idempotency_key: Option<String>,
}

// ── Committed record ──────────────────────────────────────────────────────────

/// One immutable, hash-chained audit event.
///
/// `hash` commits to every other field including `prev_hash`, so modifying
/// any stored byte is detectable by recomputation, and removing or reordering
/// records breaks the `prev_hash` linkage of the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: RecordId,
    /// Zero-based position in the global chain. Contiguous.
    pub sequence: u64,
    pub module: String,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub actor_org: Option<String>,
    pub result: Outcome,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub risk_score: Option<i32>,
    /// PII-scrubbed, searchable payload.
    #[serde(default)]
    pub data_redacted: Value,
    /// Opaque encrypted payload. Never searched.
    pub data_ciphertext: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `hash` of the preceding record, or `GENESIS_HASH` for sequence 0.
    pub prev_hash: String,
    /// Lowercase hex SHA-256 of the canonical encoding of all other fields.
    pub hash: String,
}

impl AuditRecord {
    /// The `prev_hash` of the first record in the chain.
    ///
    /// 64 hex zeros, which is never the SHA-256 of real data.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Attach chain position to a draft.  `hash` is left empty for the caller
    /// to fill in once the canonical digest is computed.
    pub fn from_draft(
        draft: RecordDraft,
        id: RecordId,
        sequence: u64,
        created_at: DateTime<Utc>,
        prev_hash: String,
    ) -> Self {
        Self {
            id,
            sequence,
            module: draft.module,
            action: draft.action,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id,
            actor_type: draft.actor_type,
            actor_id: draft.actor_id,
            actor_org: draft.actor_org,
            result: draft.result,
            reason: draft.reason,
            ip: draft.ip,
            user_agent: draft.user_agent,
            device_id: draft.device_id,
            geo_country: draft.geo_country,
            geo_city: draft.geo_city,
            request_id: draft.request_id,
            session_id: draft.session_id,
            risk_score: draft.risk_score,
            data_redacted: draft.data_redacted,
            data_ciphertext: draft.data_ciphertext,
            idempotency_key: draft.idempotency_key,
            created_at,
            prev_hash,
            hash: String::new(),
        }
    }
}

/// The most recently committed record's position and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}
