//! Store error types.

use thiserror::Error;
use warehouse_client::WarehouseError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Request to the warehouse failed.
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// The live table schema could not be reconciled with the row being written.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// No chat metadata and no conversation rows to derive an owner from.
    #[error("cannot resolve owner of chat {chat_id}")]
    OwnershipResolution { chat_id: String },

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A batch write stopped part-way.
    #[error("batch write stopped at message {message_id} after {persisted} row(s) persisted: {source}")]
    BatchWrite {
        persisted: usize,
        message_id: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Invalid input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the underlying failure may clear up on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Warehouse(err) => err.is_retryable(),
            StoreError::BatchWrite { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
