//! The asynchronous ingestion path.
//!
//! `StreamConsumer` takes messages from a `MessageSource` strictly one at a
//! time and appends each through the `Ingestor`.  Per message:
//!
//! - unparseable JSON, validation failures, and disallowed modules are
//!   logged and skipped;
//! - a redelivered message (same idempotency key) is counted and skipped;
//! - transient failures (store errors, timeouts, exhausted fork retries) are
//!   retried with exponential backoff, then skipped with an error log.
//!
//! No message ever stops the consumer.  It ends when the source closes or
//! the cancellation token fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ledger_contracts::record::RecordInput;

use crate::{
    ingest::{Ingested, Ingestor},
    source::{Message, MessageSource},
};

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Total attempts per message, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Snapshot of what the consumer has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerCounters {
    pub appended: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub retried: u64,
}

#[derive(Debug, Default)]
struct Counters {
    appended: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerCounters {
        ConsumerCounters {
            appended: self.appended.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

pub struct StreamConsumer {
    ingestor: Arc<Ingestor>,
    retry: RetryPolicy,
    counters: Counters,
}

impl StreamConsumer {
    pub fn new(ingestor: Arc<Ingestor>, retry: RetryPolicy) -> Self {
        Self {
            ingestor,
            retry,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> ConsumerCounters {
        self.counters.snapshot()
    }

    /// Consume `source` until it closes or `cancel` fires.
    ///
    /// A message already being appended when `cancel` fires is finished
    /// first; only waiting for the next message or a backoff is interrupted.
    pub async fn run<S: MessageSource>(&self, mut source: S, cancel: CancellationToken) -> ConsumerCounters {
        info!("stream consumer started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = source.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle(message, &cancel).await;
        }
        let counters = self.counters();
        info!(
            appended = counters.appended,
            duplicates = counters.duplicates,
            skipped = counters.skipped,
            retried = counters.retried,
            "stream consumer stopped"
        );
        counters
    }

    async fn handle(&self, message: Message, cancel: &CancellationToken) {
        let input: RecordInput = match serde_json::from_slice(&message.payload) {
            Ok(input) => input,
            Err(e) => {
                warn!(offset = message.offset, error = %e, "skipping malformed message");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut attempt: u32 = 1;
        loop {
            match self.ingestor.ingest_message(input.clone()).await {
                Ok(Ingested::Appended(id)) => {
                    debug!(offset = message.offset, %id, "message appended");
                    self.counters.appended.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Ok(Ingested::Duplicate(_)) => {
                    self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        offset = message.offset,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient append failure, retrying"
                    );
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(offset = message.offset, "cancelled during backoff, message not appended");
                            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    error!(
                        offset = message.offset,
                        attempts = attempt,
                        error = %e,
                        "giving up on message after repeated transient failures"
                    );
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    warn!(offset = message.offset, code = e.code(), error = %e, "skipping rejected message");
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}
