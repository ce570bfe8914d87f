//! Configuration management for hostpace
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section has defaults, so a file only needs
//! to name what it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared rate-limit / due-queue store
    pub redis: RedisConfig,

    /// Persistent URL store
    pub database: DatabaseConfig,

    /// Per-host pacing
    pub politeness: PolitenessConfig,

    /// Deferred work drain
    pub due_queue: DueQueueConfig,

    /// Backlog admission
    pub scheduler: SchedulerConfig,

    /// Crashed-worker repair
    pub recovery: RecoveryConfig,

    /// HTTP fetching
    pub fetch: FetchConfig,

    /// Work hand-off between scheduler and workers
    pub transport: TransportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            key_prefix: "hostpace".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost/hostpace".to_string(),
            pool_size: 10,
        }
    }
}

/// What the limiter does when the shared store is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Keep crawling with per-process pacing only
    #[default]
    Local,
    /// Surface the store failure and crawl nothing
    Refuse,
}

/// Politeness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Delay between two fetches of the same host
    pub default_delay_ms: u64,

    /// Lower clamp applied to any delay
    pub min_delay_ms: u64,

    /// Upper clamp applied to any delay
    pub max_delay_ms: u64,

    /// Behaviour when the shared store cannot be reached
    pub degraded_mode: DegradedMode,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1_000,
            min_delay_ms: 250,
            max_delay_ms: 60_000,
            degraded_mode: DegradedMode::Local,
        }
    }
}

impl PolitenessConfig {
    /// Clamp a delay into `[min_delay_ms, max_delay_ms]`
    pub fn clamp_delay(&self, delay_ms: u64) -> u64 {
        delay_ms.clamp(self.min_delay_ms, self.max_delay_ms)
    }
}

/// Due queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DueQueueConfig {
    /// How often the drain looks for due work
    pub poll_interval_ms: u64,

    /// Maximum entries popped per poll
    pub batch_size: usize,

    /// Delay before re-offering an entry whose replay failed
    pub replay_retry_delay_ms: u64,

    /// Entries replayed concurrently within one batch
    pub concurrency: usize,
}

impl Default for DueQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 100,
            replay_retry_delay_ms: 30_000,
            concurrency: 8,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the backlog is polled
    pub poll_interval_ms: u64,

    /// Maximum URLs claimed per poll
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            batch_size: 100,
        }
    }
}

/// Orphan recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Time between sweeps
    pub sweep_interval_secs: u64,

    /// In-flight age after which a URL is considered orphaned
    pub stuck_threshold_secs: u64,

    /// Added to now to form the recovered URL's `next_crawl_at`
    pub recovery_delay_secs: u64,

    /// Maximum URLs reset per sweep
    pub batch_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            stuck_threshold_secs: 30 * 60,
            recovery_delay_secs: 60,
            batch_limit: 500,
        }
    }
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string, also used for robots.txt matching
    pub user_agent: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Median of the first backoff delay
    pub backoff_median_ms: u64,

    /// How long a parsed robots.txt is reused
    pub robots_cache_ttl_secs: u64,

    /// Delay before a fetched URL becomes eligible again
    pub recrawl_interval_secs: u64,

    /// Delay before a URL whose crawl failed is retried
    pub failure_recrawl_secs: u64,

    /// Concurrent fetches per worker process
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("hostpace/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            max_retries: 3,
            backoff_median_ms: 1_000,
            robots_cache_ttl_secs: 3_600,
            recrawl_interval_secs: 24 * 3_600,
            failure_recrawl_secs: 3_600,
            concurrency: 8,
        }
    }
}

/// Transport backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Redis list shared by all processes
    #[default]
    Redis,
    /// In-process channel, single-binary deployments only
    Channel,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Redis list name, prefixed by `redis.key_prefix`
    pub queue_name: String,

    /// Blocking pop timeout, bounds shutdown latency
    pub pop_timeout_secs: u64,

    /// Channel capacity for the in-process transport
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Redis,
            queue_name: "work".to_string(),
            pop_timeout_secs: 5,
            channel_capacity: 1_024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Overlay environment variables onto an existing configuration
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(v) = env_parse("HOSTPACE_REDIS_POOL_SIZE") {
            self.redis.pool_size = v;
        }
        if let Ok(prefix) = std::env::var("HOSTPACE_KEY_PREFIX") {
            self.redis.key_prefix = prefix;
        }

        if let Ok(url) = std::env::var("POSTGRES_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            self.database.postgres_url = url;
        }
        if let Some(v) = env_parse("HOSTPACE_DB_POOL_SIZE") {
            self.database.pool_size = v;
        }

        if let Some(v) = env_parse("HOSTPACE_DEFAULT_DELAY_MS") {
            self.politeness.default_delay_ms = v;
        }
        if let Some(v) = env_parse("HOSTPACE_MIN_DELAY_MS") {
            self.politeness.min_delay_ms = v;
        }
        if let Some(v) = env_parse("HOSTPACE_MAX_DELAY_MS") {
            self.politeness.max_delay_ms = v;
        }
        if let Ok(mode) = std::env::var("HOSTPACE_DEGRADED_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "local" => self.politeness.degraded_mode = DegradedMode::Local,
                "refuse" => self.politeness.degraded_mode = DegradedMode::Refuse,
                other => tracing::warn!(value = %other, "Ignoring unknown HOSTPACE_DEGRADED_MODE"),
            }
        }

        if let Some(v) = env_parse("HOSTPACE_SCHEDULER_BATCH_SIZE") {
            self.scheduler.batch_size = v;
        }
        if let Some(v) = env_parse("HOSTPACE_SCHEDULER_INTERVAL_MS") {
            self.scheduler.poll_interval_ms = v;
        }
        if let Some(v) = env_parse("HOSTPACE_DUE_QUEUE_BATCH_SIZE") {
            self.due_queue.batch_size = v;
        }
        if let Some(v) = env_parse("HOSTPACE_DUE_QUEUE_INTERVAL_MS") {
            self.due_queue.poll_interval_ms = v;
        }
        if let Some(v) = env_parse("HOSTPACE_STUCK_THRESHOLD_SECS") {
            self.recovery.stuck_threshold_secs = v;
        }
        if let Some(v) = env_parse("HOSTPACE_RECOVERY_INTERVAL_SECS") {
            self.recovery.sweep_interval_secs = v;
        }

        if let Ok(agent) = std::env::var("HOSTPACE_USER_AGENT") {
            self.fetch.user_agent = agent;
        }
        if let Some(v) = env_parse("HOSTPACE_MAX_RETRIES") {
            self.fetch.max_retries = v;
        }
        if let Some(v) = env_parse("HOSTPACE_REQUEST_TIMEOUT") {
            self.fetch.request_timeout_secs = v;
        }

        if let Ok(kind) = std::env::var("HOSTPACE_TRANSPORT") {
            match kind.to_ascii_lowercase().as_str() {
                "redis" => self.transport.kind = TransportKind::Redis,
                "channel" => self.transport.kind = TransportKind::Channel,
                other => tracing::warn!(value = %other, "Ignoring unknown HOSTPACE_TRANSPORT"),
            }
        }

        if let Ok(level) = std::env::var("HOSTPACE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HOSTPACE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.redis.pool_size == 0 {
            anyhow::bail!("redis.pool_size must be greater than 0");
        }

        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be greater than 0");
        }

        if self.politeness.min_delay_ms > self.politeness.max_delay_ms {
            anyhow::bail!(
                "politeness.min_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.politeness.min_delay_ms,
                self.politeness.max_delay_ms
            );
        }

        if self.scheduler.batch_size == 0 {
            anyhow::bail!("scheduler.batch_size must be greater than 0");
        }

        if self.due_queue.batch_size == 0 || self.due_queue.concurrency == 0 {
            anyhow::bail!("due_queue.batch_size and due_queue.concurrency must be greater than 0");
        }

        if self.recovery.batch_limit == 0 {
            anyhow::bail!("recovery.batch_limit must be greater than 0");
        }

        if self.recovery.stuck_threshold_secs == 0 {
            anyhow::bail!("recovery.stuck_threshold_secs must be greater than 0");
        }

        // Deferred URLs stay in flight while they wait in the due queue
        let longest_deferral_ms = self
            .politeness
            .max_delay_ms
            .saturating_add(self.due_queue.poll_interval_ms);
        if self.recovery.stuck_threshold_secs.saturating_mul(1_000) <= longest_deferral_ms {
            anyhow::bail!(
                "recovery.stuck_threshold_secs ({}s) must exceed politeness.max_delay_ms plus due_queue.poll_interval_ms ({}ms)",
                self.recovery.stuck_threshold_secs,
                longest_deferral_ms
            );
        }

        if self.fetch.concurrency == 0 {
            anyhow::bail!("fetch.concurrency must be greater than 0");
        }

        if self.transport.channel_capacity == 0 {
            anyhow::bail!("transport.channel_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_delay_bounds_rejected() {
        let mut config = Config::default();
        config.politeness.min_delay_ms = 10_000;
        config.politeness.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_sizes_rejected() {
        let mut config = Config::default();
        config.scheduler.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.recovery.batch_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stuck_threshold_must_outlast_longest_deferral() {
        let mut config = Config::default();
        config.politeness.max_delay_ms = 60_000;
        config.due_queue.poll_interval_ms = 1_000;

        config.recovery.stuck_threshold_secs = 60;
        assert!(config.validate().is_err());
        config.recovery.stuck_threshold_secs = 61;
        assert!(config.validate().is_err());
        config.recovery.stuck_threshold_secs = 62;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamp_delay() {
        let politeness = PolitenessConfig {
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            ..Default::default()
        };
        assert_eq!(politeness.clamp_delay(0), 100);
        assert_eq!(politeness.clamp_delay(500), 500);
        assert_eq!(politeness.clamp_delay(1_000_000), 2_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [politeness]
            default_delay_ms = 2500
            degraded_mode = "refuse"

            [recovery]
            batch_limit = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.politeness.default_delay_ms, 2_500);
        assert_eq!(config.politeness.degraded_mode, DegradedMode::Refuse);
        assert_eq!(config.politeness.min_delay_ms, 250);
        assert_eq!(config.recovery.batch_limit, 10);
        assert_eq!(config.scheduler.batch_size, 100);
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
