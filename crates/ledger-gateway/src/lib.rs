//! # ledger-gateway
//!
//! The ledger's external surface.
//!
//! - [`Ingestor`]: allow-list check, engine-owned field stripping, append
//! - [`http`]: the axum router: synchronous appends and the back-office API
//! - [`StreamConsumer`]: the asynchronous path, fed by a [`MessageSource`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ingestor = Arc::new(Ingestor::new(engine, policy.clone()));
//! let app = build_router(AppState { ingestor, policy, queries, verifier });
//! axum::serve(listener, app).await?;
//! ```

pub mod consumer;
pub mod error;
pub mod http;
pub mod ingest;
pub mod source;

pub use consumer::{ConsumerCounters, RetryPolicy, StreamConsumer};
pub use error::ApiError;
pub use http::{build_router, AppState};
pub use ingest::{IngestPath, Ingested, Ingestor};
pub use source::{channel, feed_lines, serve_lines, ChannelSource, Message, MessageSender, MessageSource};

// ── Tests ─────────────────────────────────────────────────────────────────────
