//! Import configuration
//!
//! Tuning for the import pipeline, loaded from `IMPORT_*` environment
//! variables with the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::sink::MAX_BATCH_ROWS;
use super::{DEFAULT_OBJECT_BATCH_SIZE, DEFAULT_REMOTE_BATCH_SIZE};

/// Default registry extract location
pub const DEFAULT_REGISTRY_URL: &str = "https://download.cms.gov/nppes/NPPES_Data_Dissemination.csv";

/// Size heuristic used for remote progress (8 GiB)
pub const DEFAULT_REGISTRY_ESTIMATED_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Carry-over limit for a single unterminated line (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Main import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Registry extract used when a registry import names no URL
    pub registry_url: String,
    /// Expected registry extract size, for percent estimation
    pub registry_estimated_bytes: u64,
    /// Rows per insert for remote streaming sources
    pub remote_batch_size: usize,
    /// Rows per insert for stored objects
    pub object_batch_size: usize,
    /// Minimum time between periodic progress writes
    pub progress_interval_secs: u64,
    /// Validation errors kept on the job result
    pub max_reported_errors: usize,
    /// Longest line the decoder will buffer before truncating
    pub max_line_bytes: usize,
    /// Attempts when fetching a stored object
    pub fetch_attempts: u32,
    /// Linear backoff step between fetch attempts
    pub fetch_retry_delay_ms: u64,
    /// Pause after every batch flush
    pub batch_pause_ms: u64,
    /// Take a longer pause every N processed rows
    pub long_pause_every: u64,
    pub long_pause_ms: u64,
    /// Reference data file; the bundled copy is used when unset
    pub reference_path: Option<PathBuf>,
    /// Webhook that receives completion notifications
    pub notify_webhook_url: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            registry_estimated_bytes: DEFAULT_REGISTRY_ESTIMATED_BYTES,
            remote_batch_size: DEFAULT_REMOTE_BATCH_SIZE,
            object_batch_size: DEFAULT_OBJECT_BATCH_SIZE,
            progress_interval_secs: 3,
            max_reported_errors: 100,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            fetch_attempts: 3,
            fetch_retry_delay_ms: 1000,
            batch_pause_ms: 10,
            long_pause_every: 10_000,
            long_pause_ms: 250,
            reference_path: None,
            notify_webhook_url: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ImportConfig {
    /// Load import configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            registry_url: std::env::var("IMPORT_REGISTRY_URL").unwrap_or(defaults.registry_url),
            registry_estimated_bytes: env_or(
                "IMPORT_REGISTRY_ESTIMATED_BYTES",
                defaults.registry_estimated_bytes,
            ),
            remote_batch_size: env_or("IMPORT_REMOTE_BATCH_SIZE", defaults.remote_batch_size),
            object_batch_size: env_or("IMPORT_OBJECT_BATCH_SIZE", defaults.object_batch_size),
            progress_interval_secs: env_or(
                "IMPORT_PROGRESS_INTERVAL_SECS",
                defaults.progress_interval_secs,
            ),
            max_reported_errors: env_or("IMPORT_MAX_REPORTED_ERRORS", defaults.max_reported_errors),
            max_line_bytes: env_or("IMPORT_MAX_LINE_BYTES", defaults.max_line_bytes),
            fetch_attempts: env_or("IMPORT_FETCH_RETRIES", defaults.fetch_attempts),
            fetch_retry_delay_ms: env_or(
                "IMPORT_FETCH_RETRY_DELAY_MS",
                defaults.fetch_retry_delay_ms,
            ),
            batch_pause_ms: env_or("IMPORT_BATCH_PAUSE_MS", defaults.batch_pause_ms),
            long_pause_every: env_or("IMPORT_LONG_PAUSE_EVERY", defaults.long_pause_every),
            long_pause_ms: env_or("IMPORT_LONG_PAUSE_MS", defaults.long_pause_ms),
            reference_path: std::env::var("IMPORT_REFERENCE_PATH").ok().map(PathBuf::from),
            notify_webhook_url: std::env::var("IMPORT_NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote_batch_size == 0 || self.object_batch_size == 0 {
            anyhow::bail!("IMPORT_REMOTE_BATCH_SIZE and IMPORT_OBJECT_BATCH_SIZE must be greater than 0");
        }
        if self.remote_batch_size > MAX_BATCH_ROWS || self.object_batch_size > MAX_BATCH_ROWS {
            anyhow::bail!(
                "IMPORT_REMOTE_BATCH_SIZE and IMPORT_OBJECT_BATCH_SIZE must be at most {}",
                MAX_BATCH_ROWS
            );
        }
        if self.fetch_attempts == 0 {
            anyhow::bail!("IMPORT_FETCH_RETRIES must be at least 1");
        }
        if self.max_line_bytes < 1024 {
            anyhow::bail!("IMPORT_MAX_LINE_BYTES must be at least 1024");
        }
        if self.registry_estimated_bytes == 0 {
            anyhow::bail!("IMPORT_REGISTRY_ESTIMATED_BYTES must be greater than 0");
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn long_pause(&self) -> Duration {
        Duration::from_millis(self.long_pause_ms)
    }

    /// Configuration without pauses or retry delays, for tests and local runs
    pub fn without_pauses() -> Self {
        Self {
            progress_interval_secs: 0,
            fetch_retry_delay_ms: 0,
            batch_pause_ms: 0,
            long_pause_ms: 0,
            ..Self::default()
        }
    }
}
