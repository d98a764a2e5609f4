//! In-memory `ArchiveStore`, for tests and simulations.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ledger_contracts::error::{LedgerError, LedgerResult};

use crate::store::{retention_locked, ArchiveStore, ArchivedObject, ObjectMetadata};

/// Cloning shares the same object map.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    objects: Arc<RwLock<BTreeMap<String, ArchivedObject>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> LedgerResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .map_err(|e| LedgerError::archive(format!("archive lock poisoned: {e}")))?
            .keys()
            .cloned()
            .collect())
    }

    /// Replace an object's body in place, bypassing the WORM rules.
    ///
    /// Only for harnesses that simulate storage-level tampering.
    pub fn tamper(&self, key: &str, body: Vec<u8>) -> LedgerResult<bool> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| LedgerError::archive(format!("archive lock poisoned: {e}")))?;
        Ok(match objects.get_mut(key) {
            Some(object) => {
                object.body = body;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn put_object(&self, key: &str, body: Vec<u8>, metadata: ObjectMetadata) -> LedgerResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| LedgerError::archive(format!("archive lock poisoned: {e}")))?;
        if objects.contains_key(key) {
            return Err(LedgerError::AlreadySealed { key: key.to_string() });
        }
        objects.insert(key.to_string(), ArchivedObject { body, metadata });
        Ok(())
    }

    async fn head_object(&self, key: &str) -> LedgerResult<Option<ObjectMetadata>> {
        Ok(self.get_object(key).await?.map(|o| o.metadata))
    }

    async fn get_object(&self, key: &str) -> LedgerResult<Option<ArchivedObject>> {
        Ok(self
            .objects
            .read()
            .map_err(|e| LedgerError::archive(format!("archive lock poisoned: {e}")))?
            .get(key)
            .cloned())
    }

    async fn delete_object(&self, key: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| LedgerError::archive(format!("archive lock poisoned: {e}")))?;
        match objects.get(key) {
            None => Err(LedgerError::archive(format!("no object at '{key}'"))),
            Some(object) if now < object.metadata.retain_until => {
                Err(retention_locked(key, &object.metadata))
            }
            Some(_) => {
                objects.remove(key);
                Ok(())
            }
        }
    }
}
