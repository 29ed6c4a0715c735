//! Runner configuration
//!
//! Defines all configurable parameters for the runner including polling
//! intervals, concurrency, queue and code host connection settings, and the
//! on-disk locations used for staging and caching.

use splice_engine::{ArchiveFormat, default_cache_dir};
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
///
/// All intervals are configurable to allow tuning for different deployment
/// scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Job queue base URL (e.g., "http://localhost:8080")
    pub queue_url: String,

    /// Code host serving repository archives
    pub endpoint: String,

    /// Sent as `Authorization: token <value>` to the queue and code host
    pub access_token: Option<String>,

    /// How long an idle slot waits before asking for work again
    pub poll_interval: Duration,

    /// How often buffered job logs are sent to the queue
    pub log_send_interval: Duration,

    /// How often a running job's remote state is checked for cancellation
    pub cancel_check_interval: Duration,

    /// Number of worker slots, i.e. jobs run at the same time
    pub max_parallel_jobs: usize,

    /// Root of the result cache and persistent container caches
    pub cache_dir: PathBuf,

    /// Where archives and working trees are staged
    pub temp_dir: PathBuf,

    /// Container runtime binary ("podman" or "docker")
    pub container_runtime: String,

    pub archive_format: ArchiveFormat,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, queue_url: String) -> Self {
        Self {
            runner_id,
            endpoint: queue_url.clone(),
            queue_url,
            access_token: None,
            poll_interval: Duration::from_secs(5),
            log_send_interval: Duration::from_secs(5),
            cancel_check_interval: Duration::from_secs(5),
            max_parallel_jobs: 2,
            cache_dir: default_cache_dir(),
            temp_dir: std::env::temp_dir(),
            container_runtime: "podman".to_string(),
            archive_format: ArchiveFormat::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - QUEUE_URL (required)
    /// - RUNNER_ID (optional, default: random UUID)
    /// - SPLICE_ENDPOINT (optional, default: QUEUE_URL)
    /// - SPLICE_ACCESS_TOKEN (optional)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - LOG_SEND_INTERVAL (optional, seconds, default: 5)
    /// - CANCEL_CHECK_INTERVAL (optional, seconds, default: 5)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - SPLICE_CACHE_DIR (optional, default: user cache dir)
    /// - SPLICE_TEMP_DIR (optional, default: system temp dir)
    /// - CONTAINER_RUNTIME (optional, default: podman)
    /// - ARCHIVE_FORMAT (optional, zip or tar.gz, default: zip)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let queue_url =
            var("QUEUE_URL").ok_or_else(|| anyhow::anyhow!("QUEUE_URL environment variable not set"))?;

        let runner_id = var("RUNNER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut config = Self::new(runner_id, queue_url);

        if let Some(endpoint) = var("SPLICE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        config.access_token = var("SPLICE_ACCESS_TOKEN").filter(|t| !t.is_empty());

        let seconds = |key: &str, default: Duration| {
            var(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        config.poll_interval = seconds("POLL_INTERVAL", config.poll_interval);
        config.log_send_interval = seconds("LOG_SEND_INTERVAL", config.log_send_interval);
        config.cancel_check_interval = seconds("CANCEL_CHECK_INTERVAL", config.cancel_check_interval);

        config.max_parallel_jobs = var("MAX_PARALLEL_JOBS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.max_parallel_jobs);

        if let Some(dir) = var("SPLICE_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("SPLICE_TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }
        if let Some(runtime) = var("CONTAINER_RUNTIME") {
            config.container_runtime = runtime;
        }
        if let Some(format) = var("ARCHIVE_FORMAT") {
            config.archive_format = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        for (name, url) in [("queue_url", &self.queue_url), ("endpoint", &self.endpoint)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_send_interval.as_secs() == 0 {
            anyhow::bail!("log_send_interval must be greater than 0");
        }

        if self.cancel_check_interval.as_secs() == 0 {
            anyhow::bail!("cancel_check_interval must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.container_runtime.is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}
