//! Store configuration.

use std::env;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Where the store keeps its tables and how it adapts to them.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Dataset holding both tables.
    pub dataset: String,
    /// Wide table for chats, messages and every meta-row.
    pub messages_table: String,
    /// File metadata table.
    pub files_table: String,
    /// Issue `CREATE TABLE IF NOT EXISTS` before the first write.
    pub auto_create_tables: bool,
    /// Read the live column list before writing.
    pub probe_schema: bool,
    /// How long a capability probe stays valid.
    pub schema_probe_ttl: Duration,
    /// Minimum interval between warnings from degraded read paths.
    pub read_log_interval: Duration,
    /// Concurrent chat deletions in bulk deletes.
    pub delete_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dataset: "chat".to_string(),
            messages_table: "messages".to_string(),
            files_table: "files".to_string(),
            auto_create_tables: false,
            probe_schema: true,
            schema_probe_ttl: Duration::from_secs(600),
            read_log_interval: Duration::from_secs(30),
            delete_concurrency: 4,
        }
    }
}

impl StoreConfig {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `CHAT_STORE_DATASET` (default: chat)
    /// - `CHAT_STORE_MESSAGES_TABLE` (default: messages)
    /// - `CHAT_STORE_FILES_TABLE` (default: files)
    /// - `CHAT_STORE_AUTO_CREATE_TABLES` (default: false)
    /// - `CHAT_STORE_PROBE_SCHEMA` (default: true)
    /// - `CHAT_STORE_SCHEMA_PROBE_TTL_SECS` (default: 600)
    /// - `CHAT_STORE_READ_LOG_INTERVAL_SECS` (default: 30)
    /// - `CHAT_STORE_DELETE_CONCURRENCY` (default: 4)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            dataset: env::var("CHAT_STORE_DATASET").unwrap_or(defaults.dataset),
            messages_table: env::var("CHAT_STORE_MESSAGES_TABLE")
                .unwrap_or(defaults.messages_table),
            files_table: env::var("CHAT_STORE_FILES_TABLE").unwrap_or(defaults.files_table),
            auto_create_tables: env::var("CHAT_STORE_AUTO_CREATE_TABLES")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.auto_create_tables),
            probe_schema: env::var("CHAT_STORE_PROBE_SCHEMA")
                .map(|v| !matches!(v.trim(), "0" | "false" | "no"))
                .unwrap_or(defaults.probe_schema),
            schema_probe_ttl: env_parse("CHAT_STORE_SCHEMA_PROBE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.schema_probe_ttl),
            read_log_interval: env_parse("CHAT_STORE_READ_LOG_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_log_interval),
            delete_concurrency: env_parse("CHAT_STORE_DELETE_CONCURRENCY")
                .unwrap_or(defaults.delete_concurrency),
        };
        config.validate()?;
        Ok(config)
    }

    /// Table and dataset names are spliced into SQL, so only identifier
    /// characters are accepted.
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("dataset", &self.dataset),
            ("messages table", &self.messages_table),
            ("files table", &self.files_table),
        ] {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(StoreError::Validation(format!(
                    "invalid {} name: {:?}",
                    what, name
                )));
            }
        }
        if self.delete_concurrency == 0 {
            return Err(StoreError::Validation(
                "delete_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backtick-quoted `dataset.messages` reference.
    pub fn messages_ref(&self) -> String {
        format!("`{}.{}`", self.dataset, self.messages_table)
    }

    /// Backtick-quoted `dataset.files` reference.
    pub fn files_ref(&self) -> String {
        format!("`{}.{}`", self.dataset, self.files_table)
    }

    pub fn with_tables(
        mut self,
        messages_table: impl Into<String>,
        files_table: impl Into<String>,
    ) -> Self {
        self.messages_table = messages_table.into();
        self.files_table = files_table.into();
        self
    }

    pub fn with_auto_create_tables(mut self, enabled: bool) -> Self {
        self.auto_create_tables = enabled;
        self
    }

    pub fn with_schema_probe_ttl(mut self, ttl: Duration) -> Self {
        self.schema_probe_ttl = ttl;
        self
    }

    /// Rely on reactive negotiation only.
    pub fn without_schema_probe(mut self) -> Self {
        self.probe_schema = false;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
