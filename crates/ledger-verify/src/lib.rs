//! # ledger-verify
//!
//! Integrity verification for the audit ledger's hash chain.
//!
//! [`ChainVerifier`] recomputes every record's hash in a time window, checks
//! each `prev_hash` against its predecessor, and reports the first broken
//! link.  It never mutates the store and tolerates partial windows, which is
//! what the nightly job relies on.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ledger_verify::ChainVerifier;
//!
//! let report = ChainVerifier::new(store).verify(&TimeWindow::unbounded()).await?;
//! assert!(report.valid);
//! ```

pub mod engine;

pub use engine::{ChainVerifier, PAGE_SIZE};

// ── Tests ─────────────────────────────────────────────────────────────────────
