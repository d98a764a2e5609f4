//! # ledger-store
//!
//! `RecordStore` backends for the audit ledger.
//!
//! - [`MemoryStore`] keeps the chain in memory; used by tests, simulations,
//!   and as the index behind the file store.
//! - [`FileStore`] persists the chain as an append-only NDJSON file and
//!   recovers it on restart.
//!
//! Both enforce the compare-and-commit contract: a commit whose expected
//! head is stale fails with `ForkConflict` and changes nothing.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
