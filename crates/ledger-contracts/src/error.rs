//! Error taxonomy for the audit ledger.
//!
//! All fallible ledger operations return `LedgerResult<T>`.  Every variant
//! maps to a stable machine-readable code via [`LedgerError::code`], which is
//! what callers of the HTTP interface see next to the human message.

use thiserror::Error;

/// The unified error type for the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record is malformed or incomplete. Caller fault, never retried.
    #[error("validation failed on '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// One record in a batch failed validation; nothing was committed.
    #[error("batch rejected at index {index}: {reason}")]
    Batch { index: usize, reason: String },

    /// The chain head moved between read and commit.
    ///
    /// The engine retries this internally; callers only see it once the
    /// retry budget is exhausted.
    #[error("chain head moved: expected prev_hash {expected}, head is {actual}")]
    ForkConflict { expected: String, actual: String },

    /// The write-once archive already holds an object under this key.
    #[error("archive object '{key}' is already sealed")]
    AlreadySealed { key: String },

    /// A day was sealed before with a different payload digest.
    ///
    /// The live chain changed after the prior seal, which is itself a tamper
    /// signal.
    #[error("seal conflict for {day}: archived digest {archived}, live digest {live}")]
    SealConflict {
        day: String,
        archived: String,
        live: String,
    },

    /// The verifier found a broken link or a hash mismatch.
    #[error("chain broken at record {record_id}: {reason}")]
    ChainBroken { record_id: String, reason: String },

    /// An append or verify exceeded its deadline before committing.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The record store failed. Usually transient.
    #[error("store error: {reason}")]
    Store { reason: String },

    /// The archive backend failed.
    #[error("archive error: {reason}")]
    Archive { reason: String },

    /// The record's module is not on the ingestion allow-list.
    #[error("module '{module}' is not allowed")]
    ModuleNotAllowed { module: String },

    /// No or unknown credential.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// The credential lacks the scope or role the operation needs.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// A write-once object cannot be removed before its retention horizon.
    #[error("archive object '{key}' is retention-locked until {until}")]
    RetentionLocked { key: String, until: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl LedgerError {
    /// Shorthand for `LedgerError::Validation`.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for `LedgerError::Store`.
    pub fn store(reason: impl Into<String>) -> Self {
        LedgerError::Store {
            reason: reason.into(),
        }
    }

    /// Shorthand for `LedgerError::Archive`.
    pub fn archive(reason: impl Into<String>) -> Self {
        LedgerError::Archive {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::Batch { .. } => "BATCH_ERROR",
            LedgerError::ForkConflict { .. } => "FORK_CONFLICT",
            LedgerError::AlreadySealed { .. } => "ALREADY_SEALED",
            LedgerError::SealConflict { .. } => "SEAL_CONFLICT",
            LedgerError::ChainBroken { .. } => "CHAIN_BROKEN",
            LedgerError::Timeout { .. } => "TIMEOUT",
            LedgerError::Store { .. } => "STORE_ERROR",
            LedgerError::Archive { .. } => "ARCHIVE_ERROR",
            LedgerError::ModuleNotAllowed { .. } => "MODULE_NOT_ALLOWED",
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::Forbidden { .. } => "FORBIDDEN",
            LedgerError::RetentionLocked { .. } => "RETENTION_LOCKED",
            LedgerError::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// True for failures worth retrying with backoff at the ingestion
    /// boundary.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Store { .. } | LedgerError::Timeout { .. } | LedgerError::ForkConflict { .. }
        )
    }
}

/// Convenience alias used throughout the ledger crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
