//! Filesystem `ArchiveStore`.
//!
//! Layout: `<root>/<bucket>/<key>` holds the object body and
//! `<root>/<bucket>/<key>.meta.json` its metadata.  Both are created with
//! create-new semantics, synced, and marked read-only.  An object exists
//! once its metadata sidecar exists; a body without a sidecar is the residue
//! of an interrupted put and is replaced by the next put.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ledger_contracts::error::{LedgerError, LedgerResult};

use crate::store::{retention_locked, ArchiveStore, ArchivedObject, ObjectMetadata};

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct FsArchive {
    bucket_dir: PathBuf,
}

impl FsArchive {
    /// An archive rooted at `<root>/<bucket>`.  Directories are created on
    /// first write.
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.as_ref().join(bucket),
        }
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn paths(&self, key: &str) -> LedgerResult<(PathBuf, PathBuf)> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(LedgerError::archive(format!("invalid object key '{key}'")));
        }
        let body = self.bucket_dir.join(relative);
        let meta = PathBuf::from(format!("{}{META_SUFFIX}", body.display()));
        Ok((body, meta))
    }
}

fn io_error(path: &Path, action: &str, e: std::io::Error) -> LedgerError {
    LedgerError::archive(format!("failed to {action} '{}': {e}", path.display()))
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> LedgerResult<T> + Send + 'static,
) -> LedgerResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::archive(format!("archive task failed: {e}")))?
}

fn write_once(path: &Path, bytes: &[u8]) -> LedgerResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| io_error(path, "create", e))?;
    file.write_all(bytes).map_err(|e| io_error(path, "write", e))?;
    file.sync_all().map_err(|e| io_error(path, "sync", e))?;
    set_read_only(path, true)
}

fn set_read_only(path: &Path, read_only: bool) -> LedgerResult<()> {
    let mut perms = fs::metadata(path)
        .map_err(|e| io_error(path, "stat", e))?
        .permissions();
    perms.set_readonly(read_only);
    fs::set_permissions(path, perms).map_err(|e| io_error(path, "set permissions on", e))
}

fn remove(path: &Path) -> LedgerResult<()> {
    set_read_only(path, false)?;
    fs::remove_file(path).map_err(|e| io_error(path, "remove", e))
}

fn read_metadata(path: &Path) -> LedgerResult<Option<ObjectMetadata>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LedgerError::archive(format!("corrupt metadata '{}': {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, "read", e)),
    }
}

#[async_trait]
impl ArchiveStore for FsArchive {
    async fn put_object(&self, key: &str, body: Vec<u8>, metadata: ObjectMetadata) -> LedgerResult<()> {
        let (body_path, meta_path) = self.paths(key)?;
        let key = key.to_string();
        blocking(move || {
            if meta_path.exists() {
                return Err(LedgerError::AlreadySealed { key });
            }
            if body_path.exists() {
                warn!(key = %key, "replacing body left by an interrupted archive write");
                remove(&body_path)?;
            }
            if let Some(parent) = body_path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, "create directory", e))?;
            }

            let meta_bytes = serde_json::to_vec_pretty(&metadata)
                .map_err(|e| LedgerError::archive(format!("metadata encoding failed: {e}")))?;
            write_once(&body_path, &body)?;
            write_once(&meta_path, &meta_bytes)?;
            debug!(key = %key, bytes = body.len(), "archive object written");
            Ok(())
        })
        .await
    }

    async fn head_object(&self, key: &str) -> LedgerResult<Option<ObjectMetadata>> {
        let (_, meta_path) = self.paths(key)?;
        blocking(move || read_metadata(&meta_path)).await
    }

    async fn get_object(&self, key: &str) -> LedgerResult<Option<ArchivedObject>> {
        let (body_path, meta_path) = self.paths(key)?;
        blocking(move || {
            let Some(metadata) = read_metadata(&meta_path)? else {
                return Ok(None);
            };
            let body = fs::read(&body_path).map_err(|e| io_error(&body_path, "read", e))?;
            Ok(Some(ArchivedObject { body, metadata }))
        })
        .await
    }

    async fn delete_object(&self, key: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let (body_path, meta_path) = self.paths(key)?;
        let key = key.to_string();
        blocking(move || {
            let metadata = read_metadata(&meta_path)?
                .ok_or_else(|| LedgerError::archive(format!("no object at '{key}'")))?;
            if now < metadata.retain_until {
                return Err(retention_locked(&key, &metadata));
            }
            remove(&body_path)?;
            remove(&meta_path)
        })
        .await
    }
}
