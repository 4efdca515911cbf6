//! Warehouse API client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::config::WarehouseConfig;
use crate::error::WarehouseError;
use crate::executor::RequestExecutor;
use crate::transport::{HttpTransport, Transport};
use crate::types::{InsertAllRequest, InsertAllResponse, InsertRow, QueryRequest, QueryResult};

/// Client for the warehouse query and streaming-insert endpoints.
///
/// Cheap to share behind an `Arc`; all adaptive state (the rate-limit
/// cooldown) belongs to this instance.
pub struct WarehouseClient {
    config: WarehouseConfig,
    executor: RequestExecutor,
}

impl WarehouseClient {
    /// Build a client that talks HTTP with tokens from `tokens`.
    pub fn connect(
        config: WarehouseConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, WarehouseError> {
        config.validate()?;
        let transport = HttpTransport::new(config.clone(), tokens)?;
        info!(
            "Warehouse client ready for project {} at {}",
            config.project_id, config.base_url
        );
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a client over an arbitrary transport.
    pub fn with_transport(config: WarehouseConfig, transport: Arc<dyn Transport>) -> Self {
        let executor = RequestExecutor::new(transport, &config);
        Self { config, executor }
    }

    /// Run a query (SELECT or DML) and decode its rows.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult, WarehouseError> {
        debug!(
            "Query [{}]: {}",
            request
                .labels
                .get("operation")
                .map(String::as_str)
                .unwrap_or("unlabeled"),
            request.query
        );
        let body = serde_json::to_value(&request)?;
        let response = self.executor.execute(&self.config.query_path(), &body).await?;
        QueryResult::from_response(response)
    }

    /// Stream rows into a table.
    pub async fn insert_all(
        &self,
        dataset: &str,
        table: &str,
        rows: Vec<InsertRow>,
    ) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let count = rows.len();
        let body = serde_json::to_value(InsertAllRequest::new(rows))?;
        let path = self.config.insert_all_path(dataset, table);
        let response = self.executor.execute(&path, &body).await?;

        let parsed: InsertAllResponse = if response.is_null() {
            InsertAllResponse::default()
        } else {
            serde_json::from_value(response)?
        };

        if let Some(message) = parsed.first_error_message() {
            return Err(WarehouseError::InsertRejected {
                count: parsed.insert_errors.len(),
                message,
            });
        }

        debug!("Inserted {} row(s) into {}.{}", count, dataset, table);
        Ok(())
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<bool, WarehouseError> {
        let result = self
            .query(QueryRequest::new("SELECT 1 AS ok").operation("ping"))
            .await?;
        Ok(result.first().and_then(|r| r.get_i64("ok")) == Some(1))
    }

    /// Get the configuration.
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Remaining rate-limit cooldown, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.executor.cooldown_remaining()
    }
}

impl std::fmt::Debug for WarehouseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}
