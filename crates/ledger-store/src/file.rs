//! Durable, append-only NDJSON implementation of `RecordStore`.
//!
//! Storage format: one JSON-encoded `AuditRecord` per line, in insertion
//! order.  The whole file is indexed in memory on open; reads never touch
//! the disk.
//!
//! A commit serializes every record of the batch into one buffer, writes it
//! with a single `write_all`, and calls `sync_data` before the in-memory
//! index is extended.  The commit runs on a blocking task, so dropping the
//! caller's future cannot interrupt it halfway.  If the write fails, the file
//! is truncated back to its previous length.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::{SearchCriteria, TimeWindow},
    record::{AuditRecord, ChainHead, RecordId},
};
use ledger_core::traits::RecordStore;

use crate::memory::ChainIndex;

struct FileInner {
    path: PathBuf,
    index: RwLock<ChainIndex>,
    /// Held for the whole check-write-extend sequence of a commit.
    file: Mutex<File>,
}

/// A `RecordStore` backed by an append-only NDJSON file.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<FileInner>,
}

impl FileStore {
    /// Open (or create) the store at `path` and index its contents.
    ///
    /// A torn final line left by a crash mid-write is discarded and the file
    /// truncated to the last complete record.  Any other unparseable line is
    /// a `Store` error: the file has been altered outside the ledger.
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = tokio::task::spawn_blocking(move || open_blocking(path))
            .await
            .map_err(|e| LedgerError::store(format!("store open task failed: {e}")))??;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn read<T>(&self, f: impl FnOnce(&ChainIndex) -> T) -> LedgerResult<T> {
        let index = self
            .inner
            .index
            .read()
            .map_err(|e| LedgerError::store(format!("record index lock poisoned: {e}")))?;
        Ok(f(&index))
    }
}

fn io_error(path: &Path, action: &str, e: std::io::Error) -> LedgerError {
    LedgerError::store(format!("failed to {action} '{}': {e}", path.display()))
}

fn open_blocking(path: PathBuf) -> LedgerResult<FileInner> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, "create directory", e))?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|e| io_error(&path, "open", e))?;

    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| io_error(&path, "read", e))?;

    // Everything after the last newline is an incomplete write.
    let complete_len = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    if complete_len < contents.len() {
        warn!(
            path = %path.display(),
            discarded_bytes = contents.len() - complete_len,
            "discarding torn trailing record"
        );
        file.set_len(complete_len as u64)
            .map_err(|e| io_error(&path, "truncate", e))?;
    }

    let mut records = Vec::new();
    for (line_no, line) in contents[..complete_len].split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_slice(line).map_err(|e| {
            LedgerError::store(format!(
                "corrupt record at {}:{}: {e}",
                path.display(),
                line_no + 1
            ))
        })?;
        records.push(record);
    }

    info!(path = %path.display(), records = records.len(), "record store opened");

    Ok(FileInner {
        path,
        index: RwLock::new(ChainIndex::from_records(records)),
        file: Mutex::new(file),
    })
}

impl FileInner {
    fn commit_blocking(&self, expected_prev: &str, records: Vec<AuditRecord>) -> LedgerResult<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| LedgerError::store(format!("store file lock poisoned: {e}")))?;

        {
            let index = self
                .index
                .read()
                .map_err(|e| LedgerError::store(format!("record index lock poisoned: {e}")))?;
            index.check_commit(expected_prev, &records)?;
        }

        let mut buf = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| LedgerError::store(format!("failed to encode record {}: {e}", record.id)))?;
            buf.push(b'\n');
        }

        let previous_len = file
            .metadata()
            .map_err(|e| io_error(&self.path, "stat", e))?
            .len();

        if let Err(e) = file.write_all(&buf).and_then(|()| file.sync_data()) {
            if let Err(rollback) = file.set_len(previous_len) {
                warn!(path = %self.path.display(), error = %rollback, "failed to roll back partial write");
            }
            return Err(io_error(&self.path, "append to", e));
        }

        let mut index = self
            .index
            .write()
            .map_err(|e| LedgerError::store(format!("record index lock poisoned: {e}")))?;
        debug!(path = %self.path.display(), count = records.len(), bytes = buf.len(), "records appended");
        index.extend(records);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn head(&self) -> LedgerResult<Option<ChainHead>> {
        self.read(ChainIndex::head)
    }

    async fn commit(&self, expected_prev: &str, records: Vec<AuditRecord>) -> LedgerResult<()> {
        let inner = Arc::clone(&self.inner);
        let expected_prev = expected_prev.to_string();
        tokio::task::spawn_blocking(move || inner.commit_blocking(&expected_prev, records))
            .await
            .map_err(|e| LedgerError::store(format!("commit task failed: {e}")))?
    }

    async fn get(&self, id: RecordId) -> LedgerResult<Option<AuditRecord>> {
        self.read(|index| index.get(id))
    }

    async fn get_by_sequence(&self, sequence: u64) -> LedgerResult<Option<AuditRecord>> {
        self.read(|index| index.get_by_sequence(sequence))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<RecordId>> {
        self.read(|index| index.find_by_idempotency_key(key))
    }

    async fn scan(
        &self,
        window: &TimeWindow,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<AuditRecord>> {
        self.read(|index| index.scan(window, after_sequence, limit))
    }

    async fn search(&self, criteria: &SearchCriteria, limit: usize) -> LedgerResult<Vec<AuditRecord>> {
        self.read(|index| index.search(criteria, limit))
    }

    async fn count(&self) -> LedgerResult<u64> {
        self.read(|index| index.records.len() as u64)
    }
}
