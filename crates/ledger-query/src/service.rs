//! The read side of the ledger.
//!
//! - `search` answers filtered queries, newest first, capped, and serves
//!   repeated identical queries from a short-lived cache.
//! - `export` streams every record of a window in insertion order, paging
//!   through the store lazily.
//! - `stats` aggregates counts over a trailing window.
//!
//! The cache only ever backs `search`.  Verification reads the store
//! directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::{SearchCriteria, TimeWindow},
    record::AuditRecord,
    report::{ActorCount, LedgerStats},
};
use ledger_core::traits::{Clock, RecordStore};

pub const DEFAULT_STATS_DAYS: u32 = 7;
pub const MAX_STATS_DAYS: u32 = 366;
const TOP_ACTORS: usize = 10;

#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long a search result may be served from cache.
    pub cache_ttl: Duration,
    /// Records fetched per store round trip by `export` and `stats`.
    pub page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            page_size: 1000,
        }
    }
}

struct CachedResult {
    expires_at: DateTime<Utc>,
    records: Arc<Vec<AuditRecord>>,
}

pub struct QueryService {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: QueryConfig,
    /// normalized criteria (JSON) → result
    cache: DashMap<String, CachedResult>,
}

impl QueryService {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: QueryConfig) -> Self {
        Self {
            store,
            clock,
            config,
            cache: DashMap::new(),
        }
    }

    /// Records matching `criteria`, newest first, at most
    /// `criteria.effective_limit()` of them.
    ///
    /// Identical criteria within the cache TTL share one store query, so a
    /// record committed in the meantime may be missing from a cached answer.
    pub async fn search(&self, criteria: &SearchCriteria) -> LedgerResult<Arc<Vec<AuditRecord>>> {
        let criteria = criteria.normalized();
        check_window(criteria.from, criteria.to)?;

        let key = serde_json::to_string(&criteria)
            .map_err(|e| LedgerError::store(format!("cache key encoding failed: {e}")))?;
        let now = self.clock.now();

        if let Some(hit) = self.cache.get(&key) {
            if hit.expires_at > now {
                debug!(count = hit.records.len(), "search served from cache");
                return Ok(hit.records.clone());
            }
        }

        let records = Arc::new(
            self.store
                .search(&criteria, criteria.effective_limit())
                .await?,
        );
        let ttl = chrono::Duration::from_std(self.config.cache_ttl).unwrap_or(chrono::Duration::zero());
        self.cache.insert(
            key,
            CachedResult {
                expires_at: now + ttl,
                records: records.clone(),
            },
        );
        debug!(count = records.len(), "search served from store");
        Ok(records)
    }

    /// Drop expired cache entries.  Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.expires_at > now);
        before - self.cache.len()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Every record in `window`, in insertion order, with no cap.
    ///
    /// The stream owns everything it needs and fetches one page at a time as
    /// it is polled.  A store failure ends the stream with that error.
    pub fn export(&self, window: TimeWindow) -> LedgerResult<BoxStream<'static, LedgerResult<AuditRecord>>> {
        check_window(window.from, window.to)?;
        let store = self.store.clone();
        let page_size = self.config.page_size.max(1);

        let pages = stream::try_unfold(
            (store, None::<u64>, false),
            move |(store, after, done)| async move {
                if done {
                    return Ok::<_, LedgerError>(None);
                }
                let page = store.scan(&window, after, page_size).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = page.last().map(|r| r.sequence);
                let done = page.len() < page_size;
                Ok(Some((page, (store, next, done))))
            },
        );

        Ok(pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }

    /// Aggregate counts over `[now - days, now)`.
    ///
    /// `days` defaults to 7 and must lie in `1..=366`.
    pub async fn stats(&self, days: Option<u32>) -> LedgerResult<LedgerStats> {
        let days = days.unwrap_or(DEFAULT_STATS_DAYS);
        if !(1..=MAX_STATS_DAYS).contains(&days) {
            return Err(LedgerError::validation(
                "days",
                format!("must be between 1 and {MAX_STATS_DAYS}, got {days}"),
            ));
        }

        let now = self.clock.now();
        let window = TimeWindow::between(now - chrono::Duration::days(i64::from(days)), now);
        let mut stats = LedgerStats {
            window,
            ..Default::default()
        };
        let mut actors: HashMap<String, u64> = HashMap::new();

        let mut records = self.export(window)?;
        while let Some(record) = records.next().await {
            let record = record?;
            stats.total += 1;
            *stats.by_result.entry(record.result.as_str().to_string()).or_default() += 1;
            *stats
                .by_actor_type
                .entry(record.actor_type.as_str().to_string())
                .or_default() += 1;
            *stats.by_module.entry(record.module).or_default() += 1;
            if let Some(actor) = record.actor_id {
                *actors.entry(actor).or_default() += 1;
            }
        }

        let mut top: Vec<ActorCount> = actors
            .into_iter()
            .map(|(actor_id, count)| ActorCount { actor_id, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.actor_id.cmp(&b.actor_id)));
        top.truncate(TOP_ACTORS);
        stats.top_actors = top;

        debug!(days, total = stats.total, "stats computed");
        Ok(stats)
    }
}

fn check_window(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> LedgerResult<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(LedgerError::validation(
            "from",
            format!("window start {from} is after its end {to}"),
        )),
        _ => Ok(()),
    }
}
