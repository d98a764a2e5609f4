//! # ledger-core
//!
//! The linearized append path of the tamper-evident audit ledger.
//!
//! This crate provides:
//! - The `RecordStore` and `Clock` traits every backend and service builds on
//! - Canonical record hashing and link checks (`chain`)
//! - The `AppendEngine`, the only writer of the chain head
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_core::{AppendEngine, EngineConfig, traits::SystemClock};
//!
//! let engine = AppendEngine::new(store, Arc::new(SystemClock), EngineConfig::default());
//! let id = engine.append(record_input).await?;
//! ```

pub mod chain;
pub mod engine;
pub mod traits;

pub use engine::{AppendEngine, EngineConfig};
