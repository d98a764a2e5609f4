//! Service configuration.
//!
//! Loaded from a TOML file, then overridden by `LEDGER_*` environment
//! variables.  Every field has a default, so an empty file (or no file) is a
//! runnable development setup with no credentials.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [store]
//! path = "/var/lib/ledger/chain.ndjson"
//!
//! [stream]
//! listen = "0.0.0.0:9092"
//! topic = "audit.records"
//! group = "ledgerd"
//!
//! [archive]
//! root = "/var/lib/ledger/archive"
//! bucket = "audit-worm"
//! retention_days = 365
//! seal_time = "00:15"
//!
//! [verify]
//! timeout_ms = 30000
//!
//! [access]
//! allowed_modules = ["pay", "auth"]
//! reader_roles = ["auditor"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use ledger_archive::SealConfig;
use ledger_contracts::error::{LedgerError, LedgerResult};
use ledger_core::EngineConfig;
use ledger_policy::AccessConfig;
use ledger_query::QueryConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(config_error(format!("unknown log format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// HTTP listen address.
    pub listen: String,
    pub log_format: LogFormat,
    pub store: StoreSection,
    pub stream: StreamSection,
    pub archive: ArchiveSection,
    pub query: QuerySection,
    pub engine: EngineSection,
    pub verify: VerifySection,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// NDJSON chain file; created on first start.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSection {
    /// Address producers connect to.  Unset disables the asynchronous path.
    pub listen: Option<String>,
    pub topic: String,
    pub group: String,
    /// Undelivered messages held before producers are made to wait.
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSection {
    pub root: PathBuf,
    pub bucket: String,
    pub region: String,
    pub retention_days: u32,
    /// Daily seal time, `HH:MM` UTC.
    pub seal_time: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuerySection {
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub append_timeout_ms: u64,
    pub max_batch: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifySection {
    /// Upper bound on one chain verification, API or CLI.
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            log_format: LogFormat::default(),
            store: StoreSection::default(),
            stream: StreamSection::default(),
            archive: ArchiveSection::default(),
            query: QuerySection::default(),
            engine: EngineSection::default(),
            verify: VerifySection::default(),
            access: AccessConfig::default(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/chain.ndjson"),
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            listen: None,
            topic: "audit.records".to_string(),
            group: "ledgerd".to_string(),
            channel_capacity: 1024,
        }
    }
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/archive"),
            bucket: "audit-worm".to_string(),
            region: "local".to_string(),
            retention_days: 365,
            seal_time: "00:15".to_string(),
        }
    }
}

impl Default for QuerySection {
    fn default() -> Self {
        Self { cache_ttl_secs: 30 }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            append_timeout_ms: u64::try_from(engine.append_timeout.as_millis()).unwrap_or(u64::MAX),
            max_batch: engine.max_batch,
        }
    }
}

impl Default for VerifySection {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl LedgerConfig {
    /// Read `path` (when given), apply the process environment, validate.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| config_error(format!("failed to read config '{}': {e}", path.display())))?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        toml::from_str(s).map_err(|e| config_error(format!("failed to parse config: {e}")))
    }

    /// Override fields from `LEDGER_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> LedgerResult<()> {
        if let Some(v) = var("LEDGER_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = var("LEDGER_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Some(v) = var("LEDGER_STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = var("LEDGER_STREAM_LISTEN") {
            self.stream.listen = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = var("LEDGER_STREAM_TOPIC") {
            self.stream.topic = v;
        }
        if let Some(v) = var("LEDGER_STREAM_GROUP") {
            self.stream.group = v;
        }
        if let Some(v) = var("LEDGER_STREAM_CAPACITY") {
            self.stream.channel_capacity = parse_number("LEDGER_STREAM_CAPACITY", &v)?;
        }
        if let Some(v) = var("LEDGER_ARCHIVE_ROOT") {
            self.archive.root = PathBuf::from(v);
        }
        if let Some(v) = var("LEDGER_ARCHIVE_BUCKET") {
            self.archive.bucket = v;
        }
        if let Some(v) = var("LEDGER_ARCHIVE_REGION") {
            self.archive.region = v;
        }
        if let Some(v) = var("LEDGER_RETENTION_DAYS") {
            self.archive.retention_days = parse_number("LEDGER_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = var("LEDGER_SEAL_TIME") {
            self.archive.seal_time = v;
        }
        if let Some(v) = var("LEDGER_CACHE_TTL_SECS") {
            self.query.cache_ttl_secs = parse_number("LEDGER_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("LEDGER_APPEND_TIMEOUT_MS") {
            self.engine.append_timeout_ms = parse_number("LEDGER_APPEND_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("LEDGER_MAX_BATCH") {
            self.engine.max_batch = parse_number("LEDGER_MAX_BATCH", &v)?;
        }
        if let Some(v) = var("LEDGER_VERIFY_TIMEOUT_MS") {
            self.verify.timeout_ms = parse_number("LEDGER_VERIFY_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> LedgerResult<()> {
        self.listen_addr()?;
        if let Some(addr) = &self.stream.listen {
            parse_addr("stream.listen", addr)?;
        }
        if self.stream.channel_capacity == 0 {
            return Err(config_error("stream.channel_capacity must be at least 1"));
        }
        if self.archive.retention_days == 0 {
            return Err(config_error("archive.retention_days must be at least 1"));
        }
        if self.archive.bucket.trim().is_empty() {
            return Err(config_error("archive.bucket must not be empty"));
        }
        self.seal_time()?;
        if self.engine.max_batch == 0 {
            return Err(config_error("engine.max_batch must be at least 1"));
        }
        if self.engine.append_timeout_ms == 0 {
            return Err(config_error("engine.append_timeout_ms must be at least 1"));
        }
        if self.verify.timeout_ms == 0 {
            return Err(config_error("verify.timeout_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> LedgerResult<SocketAddr> {
        parse_addr("listen", &self.listen)
    }

    pub fn stream_addr(&self) -> LedgerResult<Option<SocketAddr>> {
        self.stream
            .listen
            .as_deref()
            .map(|addr| parse_addr("stream.listen", addr))
            .transpose()
    }

    pub fn seal_time(&self) -> LedgerResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.archive.seal_time, "%H:%M").map_err(|e| {
            config_error(format!(
                "archive.seal_time '{}' is not HH:MM: {e}",
                self.archive.seal_time
            ))
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            append_timeout: Duration::from_millis(self.engine.append_timeout_ms),
            max_batch: self.engine.max_batch,
            ..EngineConfig::default()
        }
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify.timeout_ms)
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            cache_ttl: Duration::from_secs(self.query.cache_ttl_secs),
            ..QueryConfig::default()
        }
    }

    pub fn seal_config(&self) -> SealConfig {
        SealConfig {
            retention_days: self.archive.retention_days,
            ..SealConfig::default()
        }
    }
}

fn config_error(reason: impl Into<String>) -> LedgerError {
    LedgerError::Config { reason: reason.into() }
}

fn parse_addr(field: &str, value: &str) -> LedgerResult<SocketAddr> {
    value
        .parse()
        .map_err(|e| config_error(format!("{field} '{value}' is not a socket address: {e}")))
}

fn parse_number<T: FromStr>(var: &str, value: &str) -> LedgerResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| config_error(format!("{var}='{value}': {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.archive.retention_days, 365);
        assert_eq!(config.query_config().cache_ttl, Duration::from_secs(30));
        assert_eq!(config.engine_config().append_timeout, Duration::from_secs(5));
        assert_eq!(config.verify_timeout(), Duration::from_secs(30));
        assert_eq!(config.seal_time().unwrap(), NaiveTime::from_hms_opt(0, 15, 0).unwrap());
        assert!(config.stream_addr().unwrap().is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = LedgerConfig::from_toml_str(
            r#"
            listen = "0.0.0.0:9000"
            log_format = "json"

            [store]
            path = "/tmp/chain.ndjson"

            [stream]
            listen = "127.0.0.1:9092"
            channel_capacity = 8

            [archive]
            bucket = "worm"
            retention_days = 2555
            seal_time = "01:30"

            [engine]
            max_batch = 50

            [verify]
            timeout_ms = 120000

            [access]
            allowed_modules = ["pay"]
            reader_roles = ["auditor"]

            [[access.credentials]]
            subject = "svc"
            token_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
            scopes = ["audit:append"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.store.path, PathBuf::from("/tmp/chain.ndjson"));
        assert_eq!(config.stream.channel_capacity, 8);
        assert_eq!(config.stream.topic, "audit.records", "unset fields keep defaults");
        assert_eq!(config.seal_config().retention_days, 2555);
        assert_eq!(config.engine_config().max_batch, 50);
        assert_eq!(config.verify_timeout(), Duration::from_secs(120));
        assert_eq!(config.access.credentials.len(), 1);
        assert!(config.access.admits_module("pay"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = LedgerConfig::from_toml_str("[archive]\nbuckt = \"typo\"\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = LedgerConfig::from_toml_str("listen = \"0.0.0.0:9000\"").unwrap();
        config
            .apply_env(env(&[
                ("LEDGER_LISTEN", "127.0.0.1:7000"),
                ("LEDGER_RETENTION_DAYS", "30"),
                ("LEDGER_SEAL_TIME", "03:00"),
                ("LEDGER_STREAM_LISTEN", "127.0.0.1:7001"),
                ("LEDGER_LOG_FORMAT", "json"),
                ("LEDGER_VERIFY_TIMEOUT_MS", "750"),
            ]))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 7000);
        assert_eq!(config.archive.retention_days, 30);
        assert_eq!(config.seal_time().unwrap(), NaiveTime::from_hms_opt(3, 0, 0).unwrap());
        assert_eq!(config.stream_addr().unwrap().map(|a| a.port()), Some(7001));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.verify_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = LedgerConfig::default();
        let err = config
            .apply_env(env(&[("LEDGER_RETENTION_DAYS", "forever")]))
            .unwrap_err();
        assert!(err.to_string().contains("LEDGER_RETENTION_DAYS"));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = LedgerConfig::default();
        config.archive.seal_time = "25:00".to_string();
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.listen = "localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.archive.retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.stream.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.verify.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "[query]\ncache_ttl_secs = 5\n").unwrap();
        let config = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.query_config().cache_ttl, Duration::from_secs(5));

        let missing = LedgerConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(missing.is_err());
    }
}
