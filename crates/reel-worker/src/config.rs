//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::DEFAULT_MAX_SLOTS;

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{RetryConfig, RetryPolicy};

/// Heartbeats that must fit in `claim_min_idle`.
const HEARTBEATS_PER_CLAIM_WINDOW: u32 = 3;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker slots (jobs rendered at once)
    pub max_concurrent_jobs: usize,
    /// Concurrent downloads within one job
    pub download_fanout: usize,
    /// Attempts per asset download, including the first
    pub download_attempts: u32,
    /// Base backoff between download attempts
    pub download_backoff: Duration,
    /// Per-request timeout for HTTP asset downloads
    pub download_timeout: Duration,
    /// Root of the per-job scratch directories
    pub work_dir: PathBuf,
    /// Scratch directories older than this are removed at startup
    pub scratch_max_age: Duration,
    /// Attempts per job before dead-lettering
    pub max_attempts: u32,
    /// Job retry backoff base
    pub retry_base_delay: Duration,
    /// Job retry backoff cap
    pub retry_max_delay: Duration,
    pub transcode_timeout_multiplier: u32,
    pub transcode_timeout_floor: Duration,
    /// Largest composition (in slots) the graph builder accepts
    pub max_slots: usize,
    /// Font for text overlays; FFmpeg's default when unset
    pub font_file: Option<String>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often running jobs refresh their idle time in the queue
    pub heartbeat_interval: Duration,
    /// How often due retries are moved back onto the stream
    pub retry_promote_interval: Duration,
    /// Public base URL artifacts are served from
    pub public_base_url: String,
    /// Prometheus listener port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            download_fanout: 4,
            download_attempts: 3,
            download_backoff: Duration::from_millis(500),
            download_timeout: Duration::from_secs(300),
            work_dir: PathBuf::from("/tmp/reel"),
            scratch_max_age: Duration::from_secs(2 * 3600),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            transcode_timeout_multiplier: 5,
            transcode_timeout_floor: Duration::from_secs(60),
            max_slots: DEFAULT_MAX_SLOTS,
            font_file: None,
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(600), // 10 minutes
            heartbeat_interval: Duration::from_secs(60),
            retry_promote_interval: Duration::from_millis(1000),
            public_base_url: "http://localhost:9000".to_string(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// `PUBLIC_BASE_URL` is required; everything else has a default.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .map_err(|_| WorkerError::config_error("PUBLIC_BASE_URL not set"))?;

        let config = Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs),
            download_fanout: env_or("WORKER_DOWNLOAD_FANOUT", defaults.download_fanout),
            download_attempts: env_or("WORKER_DOWNLOAD_ATTEMPTS", defaults.download_attempts),
            download_backoff: Duration::from_millis(env_or("WORKER_DOWNLOAD_BACKOFF_MS", 500)),
            download_timeout: Duration::from_secs(env_or("WORKER_DOWNLOAD_TIMEOUT_SECS", 300)),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            scratch_max_age: Duration::from_secs(env_or("WORKER_SCRATCH_MAX_AGE_SECS", 7200)),
            max_attempts: env_or("WORKER_MAX_ATTEMPTS", defaults.max_attempts),
            retry_base_delay: Duration::from_millis(env_or("WORKER_RETRY_BASE_MS", 5000)),
            retry_max_delay: Duration::from_millis(env_or("WORKER_RETRY_MAX_MS", 300_000)),
            transcode_timeout_multiplier: env_or(
                "WORKER_TRANSCODE_TIMEOUT_MULTIPLIER",
                defaults.transcode_timeout_multiplier,
            ),
            transcode_timeout_floor: Duration::from_secs(env_or(
                "WORKER_TRANSCODE_TIMEOUT_FLOOR_SECS",
                60,
            )),
            max_slots: env_or("WORKER_MAX_SLOTS", defaults.max_slots),
            font_file: std::env::var("WORKER_FONT_FILE").ok().filter(|s| !s.is_empty()),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT", 60)),
            claim_interval: Duration::from_secs(env_or("WORKER_CLAIM_INTERVAL_SECS", 30)),
            claim_min_idle: Duration::from_secs(env_or("WORKER_CLAIM_MIN_IDLE_SECS", 600)),
            heartbeat_interval: Duration::from_secs(env_or("WORKER_HEARTBEAT_INTERVAL_SECS", 60)),
            retry_promote_interval: Duration::from_millis(env_or(
                "WORKER_RETRY_PROMOTE_INTERVAL_MS",
                1000,
            )),
            public_base_url,
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.download_fanout == 0 {
            return Err(WorkerError::config_error(
                "WORKER_DOWNLOAD_FANOUT must be at least 1",
            ));
        }
        if self.download_attempts == 0 || self.max_attempts == 0 {
            return Err(WorkerError::config_error("attempt limits must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_HEARTBEAT_INTERVAL_SECS must be at least 1",
            ));
        }
        // A running job must get several heartbeats in before it looks abandoned.
        if self.claim_min_idle < self.heartbeat_interval * HEARTBEATS_PER_CLAIM_WINDOW {
            return Err(WorkerError::config_error(format!(
                "WORKER_CLAIM_MIN_IDLE_SECS must be at least {} x WORKER_HEARTBEAT_INTERVAL_SECS",
                HEARTBEATS_PER_CLAIM_WINDOW
            )));
        }
        if self.public_base_url.trim().is_empty() {
            return Err(WorkerError::config_error("PUBLIC_BASE_URL is empty"));
        }
        Ok(())
    }

    /// Job-level retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }

    /// Retry settings for a single asset download.
    pub fn download_retry(&self) -> RetryConfig {
        RetryConfig::new("asset_download")
            .with_max_retries(self.download_attempts.saturating_sub(1))
            .with_base_delay(self.download_backoff)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "PUBLIC_BASE_URL",
            "WORKER_MAX_JOBS",
            "WORKER_DOWNLOAD_ATTEMPTS",
            "WORKER_RETRY_BASE_MS",
            "WORKER_FONT_FILE",
            "WORKER_CLAIM_MIN_IDLE_SECS",
            "WORKER_HEARTBEAT_INTERVAL_SECS",
            "METRICS_PORT",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_requires_public_base_url() {
        clear_env();
        assert!(WorkerConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_overrides() {
        clear_env();
        std::env::set_var("PUBLIC_BASE_URL", "https://cdn.example.com");
        std::env::set_var("WORKER_MAX_JOBS", "8");
        std::env::set_var("WORKER_RETRY_BASE_MS", "250");
        std::env::set_var("METRICS_PORT", "not-a-port");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.download_attempts, 3);
        assert_eq!(config.claim_min_idle, Duration::from_secs(600));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.font_file, None);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_slots() {
        clear_env();
        std::env::set_var("PUBLIC_BASE_URL", "https://cdn.example.com");
        std::env::set_var("WORKER_MAX_JOBS", "0");
        assert!(WorkerConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_claim_window_shorter_than_heartbeats() {
        clear_env();
        std::env::set_var("PUBLIC_BASE_URL", "https://cdn.example.com");
        std::env::set_var("WORKER_HEARTBEAT_INTERVAL_SECS", "60");
        std::env::set_var("WORKER_CLAIM_MIN_IDLE_SECS", "120");
        assert!(WorkerConfig::from_env().is_err());

        std::env::set_var("WORKER_CLAIM_MIN_IDLE_SECS", "180");
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        let config = WorkerConfig {
            heartbeat_interval: Duration::ZERO,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_download_retry_counts_first_attempt() {
        let config = WorkerConfig::default();
        assert_eq!(config.download_retry().max_retries, 2);
    }
}
