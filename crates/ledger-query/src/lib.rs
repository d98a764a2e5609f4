//! # ledger-query
//!
//! Search, export, and stats over the audit ledger for back-office callers.
//!
//! ```rust,ignore
//! use ledger_query::{QueryConfig, QueryService};
//!
//! let queries = QueryService::new(store, clock, QueryConfig::default());
//! let failures = queries.search(&criteria).await?;
//! ```

pub mod service;

pub use service::{QueryConfig, QueryService, DEFAULT_STATS_DAYS, MAX_STATS_DAYS};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use futures::TryStreamExt;
    use serde_json::json;

    use ledger_contracts::{
        error::LedgerError,
        query::{SearchCriteria, TimeWindow},
        record::{ActorType, Outcome, RecordInput},
    };
    use ledger_core::{traits::ManualClock, AppendEngine, EngineConfig};
    use ledger_store::MemoryStore;

    use crate::{QueryConfig, QueryService};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn input(module: &str, actor: &str, result: Outcome) -> RecordInput {
        RecordInput {
            module: Some(module.to_string()),
            action: Some("charge".to_string()),
            actor_type: Some(ActorType::User),
            actor_id: Some(actor.to_string()),
            result: Some(result),
            data_redacted: json!({ "merchant": "Acme Books" }),
            ..Default::default()
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        engine: AppendEngine,
        queries: QueryService,
    }

    fn fixture(config: QueryConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        Fixture {
            engine: AppendEngine::new(store.clone(), clock.clone(), EngineConfig::default()),
            queries: QueryService::new(store, clock.clone(), config),
            clock,
        }
    }

    fn failures() -> SearchCriteria {
        SearchCriteria {
            module: Some("pay".to_string()),
            result: Some(Outcome::Failure),
            limit: Some(10),
            ..Default::default()
        }
    }

    // ── 1. search ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_search_scenario() {
        let f = fixture(QueryConfig::default());
        f.engine.append(input("pay", "user:u1", Outcome::Success)).await.unwrap();
        f.engine.append(input("pay", "user:u1", Outcome::Success)).await.unwrap();
        let third = f.engine.append(input("pay", "user:u1", Outcome::Failure)).await.unwrap();
        f.engine.append(input("auth", "user:u1", Outcome::Failure)).await.unwrap();

        let found = f.queries.search(&failures()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, third);
    }

    #[tokio::test]
    async fn test_search_is_newest_first_and_capped() {
        let f = fixture(QueryConfig::default());
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(f.engine.append(input("pay", "user:u2", Outcome::Success)).await.unwrap());
            f.clock.advance(Duration::seconds(1));
        }

        let criteria = SearchCriteria {
            actor_id: Some("user:u2".to_string()),
            limit: Some(3),
            ..Default::default()
        };
        let found = f.queries.search(&criteria).await.unwrap();
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3], ids[2], ids[1]]);

        let zero = SearchCriteria {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(f.queries.search(&zero).await.unwrap().len(), 1);
    }

    /// Free text matches the redacted payload and reason, never ciphertext.
    #[tokio::test]
    async fn test_free_text_skips_ciphertext() {
        let f = fixture(QueryConfig::default());
        let mut secret = input("pay", "user:u3", Outcome::Success);
        secret.data_redacted = json!({});
        secret.data_ciphertext = Some("acme-books-ciphertext".to_string());
        f.engine.append(secret).await.unwrap();
        let visible = f.engine.append(input("pay", "user:u3", Outcome::Success)).await.unwrap();

        let criteria = SearchCriteria {
            q: Some("ACME".to_string()),
            ..Default::default()
        };
        let found = f.queries.search(&criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, visible);
    }

    #[tokio::test]
    async fn test_inverted_window_is_rejected() {
        let f = fixture(QueryConfig::default());
        let criteria = SearchCriteria {
            from: Some(start()),
            to: Some(start() - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            f.queries.search(&criteria).await,
            Err(LedgerError::Validation { .. })
        ));
    }

    // ── 2. cache ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cache_serves_until_ttl() {
        let f = fixture(QueryConfig {
            cache_ttl: StdDuration::from_secs(30),
            ..Default::default()
        });
        f.engine.append(input("pay", "user:u1", Outcome::Failure)).await.unwrap();
        assert_eq!(f.queries.search(&failures()).await.unwrap().len(), 1);

        f.engine.append(input("pay", "user:u1", Outcome::Failure)).await.unwrap();
        assert_eq!(f.queries.search(&failures()).await.unwrap().len(), 1, "cached");

        // Equivalent criteria share the cache entry.
        let mut padded = failures();
        padded.actor_id = Some("   ".to_string());
        assert_eq!(f.queries.search(&padded).await.unwrap().len(), 1);
        assert_eq!(f.queries.cached_entries(), 1);

        f.clock.advance(Duration::seconds(31));
        assert_eq!(f.queries.search(&failures()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let f = fixture(QueryConfig::default());
        f.queries.search(&failures()).await.unwrap();
        f.queries.search(&SearchCriteria::default()).await.unwrap();
        assert_eq!(f.queries.purge_expired(), 0);

        f.clock.advance(Duration::minutes(5));
        assert_eq!(f.queries.purge_expired(), 2);
        assert_eq!(f.queries.cached_entries(), 0);
    }

    // ── 3. export ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_export_streams_every_page_in_order() {
        let f = fixture(QueryConfig {
            page_size: 2,
            ..Default::default()
        });
        for _ in 0..5 {
            f.engine.append(input("pay", "user:u1", Outcome::Success)).await.unwrap();
            f.clock.advance(Duration::minutes(1));
        }

        let all: Vec<_> = f
            .queries
            .export(TimeWindow::unbounded())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        let window = TimeWindow::between(start() + Duration::minutes(1), start() + Duration::minutes(3));
        let part: Vec<_> = f.queries.export(window).unwrap().try_collect().await.unwrap();
        assert_eq!(part.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_export_of_empty_store() {
        let f = fixture(QueryConfig::default());
        let all: Vec<_> = f
            .queries
            .export(TimeWindow::unbounded())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    // ── 4. stats ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stats_counts_trailing_window() {
        let f = fixture(QueryConfig::default());
        f.engine.append(input("pay", "user:old", Outcome::Success)).await.unwrap();
        f.clock.advance(Duration::days(10));
        f.engine.append(input("pay", "user:a", Outcome::Success)).await.unwrap();
        f.engine.append(input("pay", "user:a", Outcome::Failure)).await.unwrap();
        f.engine.append(input("auth", "user:b", Outcome::Deny)).await.unwrap();
        f.clock.advance(Duration::hours(1));

        let stats = f.queries.stats(None).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_module.get("pay"), Some(&2));
        assert_eq!(stats.by_module.get("auth"), Some(&1));
        assert_eq!(stats.by_result.get("deny"), Some(&1));
        assert_eq!(stats.by_actor_type.get("user"), Some(&3));
        assert_eq!(stats.top_actors[0].actor_id, "user:a");
        assert_eq!(stats.top_actors[0].count, 2);
        assert_eq!(stats.top_actors.len(), 2);

        assert_eq!(f.queries.stats(Some(30)).await.unwrap().total, 4);
    }

    #[tokio::test]
    async fn test_stats_day_bounds() {
        let f = fixture(QueryConfig::default());
        for days in [0, 367] {
            assert!(matches!(
                f.queries.stats(Some(days)).await,
                Err(LedgerError::Validation { .. })
            ));
        }
        assert!(f.queries.stats(Some(366)).await.is_ok());
    }
}
