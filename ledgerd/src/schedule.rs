//! Background jobs: the daily seal of the previous UTC day followed by a
//! verification of that day's chain window, and periodic search-cache
//! cleanup.
//!
//! Job failures are logged and the loop carries on; a bad night never takes
//! the service down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ledger_archive::{day_window, Sealer};
use ledger_contracts::report::{SealManifest, SealStatus, VerificationReport};
use ledger_core::traits::Clock;
use ledger_query::QueryService;
use ledger_verify::ChainVerifier;

/// What one daily run achieved.  `None` means that step failed and was
/// logged.
#[derive(Debug)]
pub struct DailyRun {
    pub day: NaiveDate,
    pub seal: Option<SealManifest>,
    pub chain: Option<VerificationReport>,
    pub archive: Option<VerificationReport>,
}

pub struct Scheduler {
    sealer: Arc<Sealer>,
    verifier: Arc<ChainVerifier>,
    queries: Arc<QueryService>,
    clock: Arc<dyn Clock>,
    seal_time: NaiveTime,
    purge_every: Duration,
}

/// The next instant at or after `now` whose UTC time of day is `at`,
/// strictly in the future.
pub fn next_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

impl Scheduler {
    pub fn new(
        sealer: Arc<Sealer>,
        verifier: Arc<ChainVerifier>,
        queries: Arc<QueryService>,
        clock: Arc<dyn Clock>,
        seal_time: NaiveTime,
        purge_every: Duration,
    ) -> Self {
        Self {
            sealer,
            verifier,
            queries,
            clock,
            seal_time,
            purge_every: purge_every.max(Duration::from_secs(1)),
        }
    }

    /// Run until `cancel` fires.
    ///
    /// When started after today's seal time the previous day is sealed right
    /// away; sealing is idempotent, so a restart never double-archives.
    pub async fn run(self, cancel: CancellationToken) {
        let now = self.clock.now();
        if now.time() >= self.seal_time {
            if let Some(day) = previous_day(now) {
                self.run_daily(day).await;
            }
        }

        let mut purge = tokio::time::interval(self.purge_every);
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let now = self.clock.now();
            let wait = (next_run(now, self.seal_time) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            debug!(wait_secs = wait.as_secs(), "next daily seal scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = purge.tick() => {
                    let purged = self.queries.purge_expired();
                    if purged > 0 {
                        debug!(purged, "expired search results dropped");
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    if let Some(day) = previous_day(self.clock.now()) {
                        self.run_daily(day).await;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Seal `day`, read the archive back, and verify the day's chain window.
    pub async fn run_daily(&self, day: NaiveDate) -> DailyRun {
        info!(%day, "daily seal started");

        let seal = match self.sealer.seal(day).await {
            Ok(manifest) => {
                info!(
                    %day,
                    status = ?manifest.status,
                    records = manifest.record_count,
                    key = %manifest.object_key,
                    "daily seal finished"
                );
                Some(manifest)
            }
            Err(e) => {
                error!(%day, code = e.code(), error = %e, "daily seal failed");
                None
            }
        };

        let archive = match &seal {
            Some(manifest) if manifest.status != SealStatus::Empty => {
                match self.sealer.verify_archive(day).await {
                    Ok(report) => {
                        log_report("archive", day, &report);
                        Some(report)
                    }
                    Err(e) => {
                        error!(%day, code = e.code(), error = %e, "archive read-back failed");
                        None
                    }
                }
            }
            _ => None,
        };

        let chain = match self.verifier.verify(&day_window(day)).await {
            Ok(report) => {
                log_report("chain", day, &report);
                Some(report)
            }
            Err(e) => {
                error!(%day, code = e.code(), error = %e, "daily verification failed");
                None
            }
        };

        DailyRun {
            day,
            seal,
            chain,
            archive,
        }
    }
}

fn previous_day(now: DateTime<Utc>) -> Option<NaiveDate> {
    now.date_naive().checked_sub_days(Days::new(1))
}

fn log_report(scope: &str, day: NaiveDate, report: &VerificationReport) {
    if report.valid {
        info!(%day, scope, checked = report.checked, "verification passed");
    } else {
        warn!(
            %day,
            scope,
            checked = report.checked,
            broken_at = ?report.broken_at,
            reason = report.reason.as_deref().unwrap_or(""),
            "verification failed"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
