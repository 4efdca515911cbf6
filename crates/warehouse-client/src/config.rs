//! Configuration types for warehouse-client.

use std::env;
use std::time::Duration;

use rand::Rng;

use crate::error::WarehouseError;

/// Default REST endpoint of the warehouse API.
pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given (1-based) failed attempt.
    ///
    /// `min(base * 2^(attempt - 1) + jitter, max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        backoff.saturating_add(jitter).min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Configuration for connecting to the warehouse.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Base URL of the REST API (e.g., "https://bigquery.googleapis.com/bigquery/v2").
    pub base_url: String,
    /// Project that owns the dataset and runs the query jobs.
    pub project_id: String,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// How long to refuse requests after a rate-limit response.
    pub rate_limit_cooldown: Duration,
    /// Minimum interval between "still cooling down" log lines.
    pub cooldown_log_interval: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: String::new(),
            retry: RetryConfig::default(),
            rate_limit_cooldown: Duration::from_secs(30),
            cooldown_log_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl WarehouseConfig {
    /// Create a new configuration for the given project.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `WAREHOUSE_PROJECT_ID` - Project that runs the query jobs
    ///
    /// Optional environment variables:
    /// - `WAREHOUSE_BASE_URL` - REST endpoint (default: BigQuery v2)
    /// - `WAREHOUSE_MAX_ATTEMPTS` - Attempts per call (default: 4)
    /// - `WAREHOUSE_RETRY_BASE_MS` - First retry delay (default: 250)
    /// - `WAREHOUSE_RETRY_MAX_MS` - Maximum retry delay (default: 8000)
    /// - `WAREHOUSE_RETRY_JITTER_MS` - Maximum jitter (default: 100)
    /// - `WAREHOUSE_RATE_LIMIT_COOLDOWN_SECS` - Cooldown window (default: 30)
    /// - `WAREHOUSE_COOLDOWN_LOG_INTERVAL_SECS` - Cooldown log interval (default: 10)
    /// - `WAREHOUSE_REQUEST_TIMEOUT_SECS` - HTTP timeout (default: 30)
    pub fn from_env() -> Result<Self, WarehouseError> {
        let project_id = env::var("WAREHOUSE_PROJECT_ID")
            .map_err(|_| WarehouseError::Config("WAREHOUSE_PROJECT_ID not set".to_string()))?;

        let defaults = Self::default();
        let retry_defaults = RetryConfig::default();

        let base_url = env::var("WAREHOUSE_BASE_URL").unwrap_or(defaults.base_url);

        let retry = RetryConfig {
            max_attempts: env_parse("WAREHOUSE_MAX_ATTEMPTS").unwrap_or(retry_defaults.max_attempts),
            base_delay: env_parse("WAREHOUSE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: env_parse("WAREHOUSE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            jitter: env_parse("WAREHOUSE_RETRY_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.jitter),
        };

        let config = Self {
            base_url,
            project_id,
            retry,
            rate_limit_cooldown: env_parse("WAREHOUSE_RATE_LIMIT_COOLDOWN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_cooldown),
            cooldown_log_interval: env_parse("WAREHOUSE_COOLDOWN_LOG_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cooldown_log_interval),
            request_timeout: env_parse("WAREHOUSE_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot issue a single request.
    pub fn validate(&self) -> Result<(), WarehouseError> {
        if self.project_id.trim().is_empty() {
            return Err(WarehouseError::Config("project id is empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(WarehouseError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the synchronous query endpoint.
    pub fn query_path(&self) -> String {
        format!("/projects/{}/queries", urlencoding::encode(&self.project_id))
    }

    /// Path of the streaming insert endpoint for a table.
    pub fn insert_all_path(&self, dataset: &str, table: &str) -> String {
        format!(
            "/projects/{}/datasets/{}/tables/{}/insertAll",
            urlencoding::encode(&self.project_id),
            urlencoding::encode(dataset),
            urlencoding::encode(table)
        )
    }

    /// Join an endpoint path onto the base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the rate-limit cooldown window.
    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
