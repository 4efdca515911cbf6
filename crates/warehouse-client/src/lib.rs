//! Client library for a columnar warehouse's HTTP API.
//!
//! This crate wraps the synchronous query endpoint and the streaming insert
//! endpoint of a BigQuery-style REST API. It provides:
//!
//! - Named-parameter queries with job labels, decoded into named rows
//! - Streaming inserts with per-row de-duplication ids
//! - Retry with exponential backoff and jitter for transient failures
//! - A per-client rate-limit cooldown that fails fast without network calls
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warehouse_client::{QueryParameter, QueryRequest, StaticToken, WarehouseClient, WarehouseConfig};
//!
//! # async fn example() -> Result<(), warehouse_client::WarehouseError> {
//! let config = WarehouseConfig::new("my-project");
//! let client = WarehouseClient::connect(config, Arc::new(StaticToken::from_env()?))?;
//!
//! let result = client
//!     .query(
//!         QueryRequest::new("SELECT message_id FROM `my-project.chat.messages` WHERE chat_id = @chat_id")
//!             .param(QueryParameter::string("chat_id", "c1"))
//!             .operation("example"),
//!     )
//!     .await?;
//! for row in &result.rows {
//!     println!("{:?}", row.get_str("message_id"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod executor;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{StaticToken, TokenProvider};
pub use client::WarehouseClient;
pub use config::{RetryConfig, WarehouseConfig};
pub use cooldown::LogThrottle;
pub use error::{NetworkErrorKind, WarehouseError};
pub use executor::RequestExecutor;
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use types::*;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
