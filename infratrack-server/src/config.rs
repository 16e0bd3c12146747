use anyhow::{Context, Result};
use chrono::FixedOffset;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;

/// File name of the project store inside the state directory.
pub const DB_FILE_NAME: &str = "infratrack.db";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the SQLite database. Defaults to the current directory.
    pub state_dir: PathBuf,
    /// Upper bound on one mutating call, lock wait included.
    pub transaction_timeout_ms: u64,
    /// Extra attempts after a commit loses a version race.
    pub max_commit_retries: u32,
    pub cache_ttl_secs: u64,
    /// Offset of the sites' local time from UTC, for off-hours advisories.
    pub workday_utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            transaction_timeout_ms: 5000,
            max_commit_retries: 3,
            cache_ttl_secs: 300,
            workday_utc_offset_minutes: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let state_dir = lookup("INFRATRACK_STATE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let transaction_timeout_ms = parse_var(
            "INFRATRACK_TRANSACTION_TIMEOUT_MS",
            lookup("INFRATRACK_TRANSACTION_TIMEOUT_MS"),
            defaults.transaction_timeout_ms,
        )?;
        if transaction_timeout_ms == 0 {
            anyhow::bail!("INFRATRACK_TRANSACTION_TIMEOUT_MS must be greater than zero");
        }

        let max_commit_retries = parse_var(
            "INFRATRACK_MAX_COMMIT_RETRIES",
            lookup("INFRATRACK_MAX_COMMIT_RETRIES"),
            defaults.max_commit_retries,
        )?;

        let cache_ttl_secs = parse_var(
            "INFRATRACK_CACHE_TTL_SECS",
            lookup("INFRATRACK_CACHE_TTL_SECS"),
            defaults.cache_ttl_secs,
        )?;

        let workday_utc_offset_minutes = parse_var(
            "INFRATRACK_WORKDAY_UTC_OFFSET_MINUTES",
            lookup("INFRATRACK_WORKDAY_UTC_OFFSET_MINUTES"),
            defaults.workday_utc_offset_minutes,
        )?;

        Ok(Config {
            state_dir,
            transaction_timeout_ms,
            max_commit_retries,
            cache_ttl_secs,
            workday_utc_offset_minutes,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join(DB_FILE_NAME)
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let workday_offset = self
            .workday_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .with_context(|| {
                format!(
                    "INFRATRACK_WORKDAY_UTC_OFFSET_MINUTES out of range: {}",
                    self.workday_utc_offset_minutes
                )
            })?;

        Ok(EngineSettings {
            transaction_timeout: Duration::from_millis(self.transaction_timeout_ms),
            max_commit_retries: self.max_commit_retries,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            workday_offset,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset or blank.
fn parse_var<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value.filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number (got {:?})", name, raw)),
        None => Ok(default),
    }
}
