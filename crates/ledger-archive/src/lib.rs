//! # ledger-archive
//!
//! WORM archival of completed days of the audit chain.
//!
//! - [`Sealer`] turns one UTC day of records into a gzip NDJSON object plus
//!   a SHA-256 companion, and can read a sealed day back for verification.
//! - [`ArchiveStore`] is the write-once object store seam, with an in-memory
//!   backend ([`MemoryArchive`]) and a filesystem backend ([`FsArchive`]).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ledger_archive::{FsArchive, SealConfig, Sealer};
//!
//! let archive = Arc::new(FsArchive::new("/var/lib/ledger/archive", "audit-worm"));
//! let sealer = Sealer::new(store, archive, Arc::new(SystemClock), SealConfig::default());
//! let manifest = sealer.seal(yesterday).await?;
//! ```

pub mod codec;
pub mod fs;
pub mod memory;
pub mod sealer;
pub mod store;

pub use fs::FsArchive;
pub use memory::MemoryArchive;
pub use sealer::{day_window, SealConfig, Sealer};
pub use store::{ArchiveStore, ArchivedObject, ObjectMetadata};

// ── Tests ─────────────────────────────────────────────────────────────────────
