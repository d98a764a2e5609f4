//! Write-once object storage.
//!
//! `ArchiveStore` is the seam between the sealer and wherever sealed days
//! live.  Every backend enforces the same WORM rules:
//!
//! - `put_object` on an existing key fails with `AlreadySealed`; objects are
//!   never overwritten.
//! - `delete_object` before the object's `retain_until` fails with
//!   `RetentionLocked`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledger_contracts::error::{LedgerError, LedgerResult};

/// Metadata stored alongside an archive object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub content_encoding: Option<String>,
    /// The object cannot be deleted before this instant.
    pub retain_until: DateTime<Utc>,
    /// Free-form tags: record count, window, digests.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// A stored object and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedObject {
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Store `body` under `key`.  Fails with `AlreadySealed` if the key exists.
    async fn put_object(&self, key: &str, body: Vec<u8>, metadata: ObjectMetadata) -> LedgerResult<()>;

    /// Metadata for `key`, or `None` if nothing is stored there.
    async fn head_object(&self, key: &str) -> LedgerResult<Option<ObjectMetadata>>;

    async fn get_object(&self, key: &str) -> LedgerResult<Option<ArchivedObject>>;

    /// Remove `key`, honouring its retention lock as of `now`.
    async fn delete_object(&self, key: &str, now: DateTime<Utc>) -> LedgerResult<()>;
}

/// The error a backend returns for a delete inside the retention window.
pub(crate) fn retention_locked(key: &str, metadata: &ObjectMetadata) -> LedgerError {
    LedgerError::RetentionLocked {
        key: key.to_string(),
        until: metadata.retain_until.to_rfc3339(),
    }
}
