//! Configuration module for Semaphore.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ranking::ScoreParams;
use crate::{Result, SemaphoreError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    /// Upper bound for a single storage statement in milliseconds.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
}

fn default_db_path() -> String {
    "data/semaphore.db".to_string()
}

fn default_db_max_connections() -> u32 {
    8
}

fn default_statement_timeout() -> u64 {
    3000
}

impl DatabaseConfig {
    /// Statement timeout as a duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_db_max_connections(),
            statement_timeout_ms: default_statement_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Console only when empty.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/semaphore.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed refresher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RefresherConfig {
    /// Whether the background refresher runs.
    #[serde(default = "default_refresher_enabled")]
    pub enabled: bool,
    /// Time between refresh cycles in seconds.
    #[serde(default = "default_refresh_period")]
    pub refresh_period_secs: u64,
    /// A feed is stale once its last fetch or failure is older than this.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Number of concurrent refresh workers per cycle.
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
    /// Per-feed fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Maximum items taken from one feed payload.
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
    /// Maximum feed payload size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// User agent sent with feed requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Allow loopback and private network hosts (tests, intranets).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_refresher_enabled() -> bool {
    true
}

fn default_refresh_period() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    300 // 5 minutes
}

fn default_max_concurrent_refreshes() -> usize {
    5
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_max_items_per_feed() -> usize {
    200
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    "Semaphore/0.1 (feed refresher)".to_string()
}

impl RefresherConfig {
    /// Refresh period as a duration.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    /// Staleness threshold as a duration.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Per-feed fetch timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            enabled: default_refresher_enabled(),
            refresh_period_secs: default_refresh_period(),
            stale_after_secs: default_stale_after(),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_items_per_feed: default_max_items_per_feed(),
            max_feed_size_bytes: default_max_feed_size(),
            connect_timeout_secs: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Time between item cleanup runs in seconds.
    #[serde(default = "default_items_cleanup_period")]
    pub items_cleanup_period_secs: u64,
    /// Items ingested longer ago than this are removed unless saved.
    #[serde(default = "default_items_max_age_days")]
    pub items_max_age_days: u64,
    /// Time between follower count recomputations in seconds.
    #[serde(default = "default_follower_recount_period")]
    pub follower_recount_period_secs: u64,
}

fn default_items_cleanup_period() -> u64 {
    86400 // 1 day
}

fn default_items_max_age_days() -> u64 {
    30
}

fn default_follower_recount_period() -> u64 {
    3600
}

impl CleanupConfig {
    /// Cleanup period as a duration.
    pub fn items_cleanup_period(&self) -> Duration {
        Duration::from_secs(self.items_cleanup_period_secs)
    }

    /// Maximum item age as a duration.
    pub fn items_max_age(&self) -> Duration {
        Duration::from_secs(self.items_max_age_days * 86400)
    }

    /// Follower recount period as a duration.
    pub fn follower_recount_period(&self) -> Duration {
        Duration::from_secs(self.follower_recount_period_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            items_cleanup_period_secs: default_items_cleanup_period(),
            items_max_age_days: default_items_max_age_days(),
            follower_recount_period_secs: default_follower_recount_period(),
        }
    }
}

/// Pagination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// Lifetime of a cached hot-ranking snapshot in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Number of ranked items captured when a walk starts.
    #[serde(default = "default_snapshot_size")]
    pub snapshot_size: usize,
    /// Number of ranked items captured when an expired session is replaced.
    #[serde(default = "default_refresh_snapshot_size")]
    pub refresh_snapshot_size: usize,
    /// Upper bound for a single cache operation in milliseconds.
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,
    /// Page size used when the caller passes zero.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Largest accepted page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Key for the cursor integrity tag.
    #[serde(default)]
    pub cursor_secret: String,
    /// Upper bound on snapshots held by the in-process cache.
    #[serde(default = "default_max_cached_sessions")]
    pub max_cached_sessions: usize,
}

fn default_session_ttl() -> u64 {
    600 // 10 minutes
}

fn default_snapshot_size() -> usize {
    300
}

fn default_refresh_snapshot_size() -> usize {
    100
}

fn default_cache_timeout() -> u64 {
    500
}

fn default_page_size() -> usize {
    16
}

fn default_max_page_size() -> usize {
    100
}

fn default_max_cached_sessions() -> usize {
    10_000
}

impl PaginationConfig {
    /// Session TTL as a duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Cache operation timeout as a duration.
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            snapshot_size: default_snapshot_size(),
            refresh_snapshot_size: default_refresh_snapshot_size(),
            cache_timeout_ms: default_cache_timeout(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cursor_secret: String::new(),
            max_cached_sessions: default_max_cached_sessions(),
        }
    }
}

/// Hot ranking configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// Score floor so items without engagement still rank by age.
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    /// Multiplier for the dampened like count.
    #[serde(default = "default_like_weight")]
    pub like_weight: f64,
    /// Multiplier for the dampened save count.
    #[serde(default = "default_save_weight")]
    pub save_weight: f64,
    /// Hours added to the age before decay.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    /// Decay exponent.
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    /// Newest items considered before scoring.
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
}

fn default_base_score() -> f64 {
    1.0
}

fn default_like_weight() -> f64 {
    1.0
}

fn default_save_weight() -> f64 {
    3.0
}

fn default_smoothing() -> f64 {
    10.0
}

fn default_gravity() -> f64 {
    1.5
}

fn default_candidate_pool() -> usize {
    3000
}

impl RankingConfig {
    /// Scoring constants for the ranking engine.
    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            base: self.base_score,
            like_weight: self.like_weight,
            save_weight: self.save_weight,
            smoothing: self.smoothing,
            gravity: self.gravity,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            base_score: default_base_score(),
            like_weight: default_like_weight(),
            save_weight: default_save_weight(),
            smoothing: default_smoothing(),
            gravity: default_gravity(),
            candidate_pool: default_candidate_pool(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed refresher configuration.
    #[serde(default)]
    pub refresher: RefresherConfig,
    /// Background cleanup configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Pagination configuration.
    #[serde(default)]
    pub pagination: PaginationConfig,
    /// Hot ranking configuration.
    #[serde(default)]
    pub ranking: RankingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(SemaphoreError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SemaphoreError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SEMAPHORE_CURSOR_SECRET`: key for the cursor integrity tag
    /// - `SEMAPHORE_DB_PATH`: database file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("SEMAPHORE_CURSOR_SECRET") {
            if !secret.is_empty() {
                self.pagination.cursor_secret = secret;
            }
        }
        if let Ok(path) = std::env::var("SEMAPHORE_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pagination.cursor_secret.is_empty() {
            return Err(SemaphoreError::Config(
                "cursor_secret is not set. \
                 Set it in config.toml or via SEMAPHORE_CURSOR_SECRET environment variable."
                    .to_string(),
            ));
        }
        if self.refresher.max_concurrent_refreshes == 0 {
            return Err(SemaphoreError::Config(
                "max_concurrent_refreshes must be at least 1".to_string(),
            ));
        }
        if self.pagination.default_page_size == 0
            || self.pagination.default_page_size > self.pagination.max_page_size
        {
            return Err(SemaphoreError::Config(
                "default_page_size must be within 1..=max_page_size".to_string(),
            ));
        }
        if self.pagination.snapshot_size == 0 || self.pagination.refresh_snapshot_size == 0 {
            return Err(SemaphoreError::Config(
                "snapshot_size and refresh_snapshot_size must be at least 1".to_string(),
            ));
        }
        if self.ranking.smoothing <= 0.0 || self.ranking.gravity <= 0.0 {
            return Err(SemaphoreError::Config(
                "ranking smoothing and gravity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
