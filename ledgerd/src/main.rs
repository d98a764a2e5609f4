//! ledgerd, the tamper-evident audit ledger service.
//!
//! Usage:
//!   ledgerd --config ledger.toml serve
//!   ledgerd --config ledger.toml verify --from 2026-03-01T00:00:00Z
//!   ledgerd --config ledger.toml seal --day 2026-03-09
//!   ledgerd --config ledger.toml verify-archive --day 2026-03-09
//!   ledgerd hash-token <token>

mod config;
mod schedule;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ledger_archive::{FsArchive, Sealer};
use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    query::TimeWindow,
};
use ledger_core::{
    traits::{AccessPolicy, Clock, RecordStore, SystemClock},
    AppendEngine,
};
use ledger_gateway::{build_router, channel, serve_lines, AppState, Ingestor, RetryPolicy, StreamConsumer};
use ledger_policy::{hash_token, TomlAccessPolicy};
use ledger_query::QueryService;
use ledger_store::FileStore;
use ledger_verify::ChainVerifier;

use crate::config::{LedgerConfig, LogFormat};
use crate::schedule::Scheduler;

/// How long background tasks get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ── CLI definition ────────────────────────────────────────────────────────────

/// Tamper-evident, append-only audit ledger.
#[derive(Parser)]
#[command(name = "ledgerd", version, about = "Tamper-evident append-only audit ledger")]
struct Cli {
    /// TOML configuration file.  `LEDGER_*` variables override it.
    #[arg(long, global = true, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, the stream listener, and the daily seal scheduler.
    Serve,
    /// Verify the live chain over `[from, to)` and print the report.
    Verify {
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Seal one completed UTC day into the write-once archive.
    Seal {
        #[arg(long)]
        day: NaiveDate,
    },
    /// Read a sealed day back and check its digest and chain links.
    VerifyArchive {
        #[arg(long)]
        day: NaiveDate,
    },
    /// Print the SHA-256 digest to put in a credential's `token_sha256`.
    HashToken { token: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::HashToken { token } = &cli.command {
        println!("{}", hash_token(token));
        return ExitCode::SUCCESS;
    }

    let config = match LedgerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ledgerd: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(config.log_format);

    let result = match cli.command {
        Command::Serve => serve(config).await,
        Command::Verify { from, to } => verify(config, TimeWindow { from, to }).await,
        Command::Seal { day } => seal(config, day).await,
        Command::VerifyArchive { day } => verify_archive(config, day).await,
        Command::HashToken { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), error = %e, "ledgerd failed");
            ExitCode::FAILURE
        }
    }
}

/// Structured logging.  `RUST_LOG` overrides the default `info` filter.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn open_store(config: &LedgerConfig) -> LedgerResult<Arc<dyn RecordStore>> {
    if let Some(parent) = config.store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LedgerError::store(format!("cannot create '{}': {e}", parent.display())))?;
    }
    let store = FileStore::open(&config.store.path).await?;
    info!(path = %config.store.path.display(), "record store opened");
    Ok(Arc::new(store))
}

fn sealer(config: &LedgerConfig, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Sealer {
    let archive = FsArchive::new(&config.archive.root, &config.archive.bucket);
    info!(
        bucket = %config.archive.bucket,
        region = %config.archive.region,
        root = %config.archive.root.display(),
        "archive bucket configured"
    );
    Sealer::new(store, Arc::new(archive), clock, config.seal_config())
}

fn print_json<T: Serialize>(value: &T) -> LedgerResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LedgerError::store(format!("failed to render output: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn serve(config: LedgerConfig) -> LedgerResult<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config).await?;
    let policy: Arc<dyn AccessPolicy> = Arc::new(TomlAccessPolicy::from_config(config.access.clone())?);
    if config.access.credentials.is_empty() {
        warn!("no credentials configured; every API call except /health will be refused");
    }

    let engine = Arc::new(AppendEngine::new(store.clone(), clock.clone(), config.engine_config()));
    let queries = Arc::new(QueryService::new(store.clone(), clock.clone(), config.query_config()));
    let verifier = Arc::new(ChainVerifier::new(store.clone()).with_timeout(config.verify_timeout()));
    let ingestor = Arc::new(Ingestor::new(engine, policy.clone()));
    let cancel = CancellationToken::new();
    let mut background = Vec::new();

    if let Some(addr) = config.stream_addr()? {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LedgerError::Config {
                reason: format!("cannot bind stream listener {addr}: {e}"),
            })?;
        info!(
            %addr,
            topic = %config.stream.topic,
            group = %config.stream.group,
            capacity = config.stream.channel_capacity,
            "stream ingestion enabled"
        );
        let (sender, source) = channel(config.stream.channel_capacity);
        background.push(tokio::spawn(serve_lines(listener, sender, cancel.clone())));

        let consumer = StreamConsumer::new(ingestor.clone(), RetryPolicy::default());
        let token = cancel.clone();
        background.push(tokio::spawn(async move {
            consumer.run(source, token).await;
        }));
    }

    let scheduler = Scheduler::new(
        Arc::new(sealer(&config, store.clone(), clock.clone())),
        verifier.clone(),
        queries.clone(),
        clock,
        config.seal_time()?,
        config.query_config().cache_ttl,
    );
    background.push(tokio::spawn(scheduler.run(cancel.clone())));

    let app = build_router(AppState {
        ingestor,
        policy,
        queries,
        verifier,
    });
    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| LedgerError::Config {
        reason: format!("cannot bind HTTP listener {addr}: {e}"),
    })?;
    info!(%addr, "ledgerd listening");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await;

    cancel.cancel();
    for task in background {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("background task did not stop in time");
        }
    }
    info!("ledgerd stopped");

    served.map_err(|e| LedgerError::store(format!("HTTP server failed: {e}")))
}

async fn verify(config: LedgerConfig, window: TimeWindow) -> LedgerResult<()> {
    let store = open_store(&config).await?;
    let report = ChainVerifier::new(store)
        .with_timeout(config.verify_timeout())
        .verify(&window)
        .await?;
    print_json(&report)?;
    report.into_result().map(|_| ())
}

async fn seal(config: LedgerConfig, day: NaiveDate) -> LedgerResult<()> {
    let store = open_store(&config).await?;
    let manifest = sealer(&config, store, Arc::new(SystemClock)).seal(day).await?;
    print_json(&manifest)
}

async fn verify_archive(config: LedgerConfig, day: NaiveDate) -> LedgerResult<()> {
    let store = open_store(&config).await?;
    let report = sealer(&config, store, Arc::new(SystemClock))
        .verify_archive(day)
        .await?;
    print_json(&report)?;
    report.into_result().map(|_| ())
}
