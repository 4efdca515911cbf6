//! Chat persistence on a columnar warehouse.
//!
//! Chats, messages, provider sessions, documents and users share one wide
//! table keyed by `message_id`; file metadata lives in a second table. Writes
//! go through a [`SchemaNegotiator`] that adapts to the live table, and
//! reads degrade instead of failing when rows or columns are malformed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_store::{chat, message, ChatStore, StoreConfig};
//! use chat_store::models::{ChatMessage, MessagePart, Role, Visibility};
//! use warehouse_client::{StaticToken, WarehouseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ChatStore::connect(
//!         WarehouseConfig::from_env()?,
//!         Arc::new(StaticToken::from_env()?),
//!         StoreConfig::from_env()?,
//!     )?;
//!     store.ensure_tables().await?;
//!
//!     chat::save_chat(&store, "c1", "u1", "Hi", Visibility::Private).await?;
//!     let hello = ChatMessage::new("m1", "c1", Role::User, vec![MessagePart::text("hello")]);
//!     message::save_messages(&store, &[hello], "c1").await?;
//!
//!     for m in message::get_messages_by_chat_id(&store, "c1").await? {
//!         println!("{}: {}", m.role.as_str(), m.plain_text());
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod file;
pub mod message;
pub mod models;
pub mod provider_session;
pub mod row;
pub mod schema;
pub mod user;

pub use codec::{decode_stored, StoredRow};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use models::{
    Chat, ChatMessage, ChatPage, DeleteSummary, Document, DocumentKind, FileMetadata,
    PageCursor, ProviderSession, UserAccount, Visibility,
};
pub use row::{Column, RowKind};
pub use schema::{CastMode, SchemaNegotiator, SchemaSnapshot, WriteOutcome};

use std::sync::Arc;

use tracing::{info, warn};
use warehouse_client::{
    LogThrottle, QueryRequest, QueryResult, TokenProvider, WarehouseClient, WarehouseConfig,
};

use crate::row::PhysicalRow;

/// Handle to the store. Owns all adaptive state (schema negotiation,
/// read-failure log throttling); the underlying client owns the rate-limit
/// cooldown.
pub struct ChatStore {
    client: Arc<WarehouseClient>,
    config: StoreConfig,
    negotiator: SchemaNegotiator,
    read_log: LogThrottle,
}

impl ChatStore {
    /// Build a store over an HTTP client.
    pub fn connect(
        warehouse: WarehouseConfig,
        tokens: Arc<dyn TokenProvider>,
        config: StoreConfig,
    ) -> Result<Self> {
        let client = WarehouseClient::connect(warehouse, tokens)?;
        Self::new(Arc::new(client), config)
    }

    /// Build a store over an existing client.
    pub fn new(client: Arc<WarehouseClient>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Chat store on {} (files: {})",
            config.messages_ref(),
            config.files_ref()
        );
        Ok(Self {
            negotiator: SchemaNegotiator::new(client.clone(), config.clone()),
            read_log: LogThrottle::new(config.read_log_interval),
            client,
            config,
        })
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_tables(&self) -> Result<()> {
        self.negotiator.ensure_tables().await
    }

    pub fn client(&self) -> &WarehouseClient {
        &self.client
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &SchemaNegotiator {
        &self.negotiator
    }

    pub(crate) fn table(&self) -> String {
        self.config.messages_ref()
    }

    /// Comma-separated select list of `wanted` minus columns known missing.
    pub(crate) fn select_list(&self, wanted: &[Column]) -> String {
        let disabled = self.negotiator.snapshot().disabled;
        wanted
            .iter()
            .filter(|c| !disabled.contains(c))
            .map(Column::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Predicate excluding soft-deleted rows, empty when the table has no
    /// `is_deleted` column.
    pub(crate) fn live_filter(&self) -> &'static str {
        if self.negotiator.is_disabled(Column::IsDeleted) {
            ""
        } else {
            " AND COALESCE(is_deleted, FALSE) = FALSE"
        }
    }

    /// Expression for the owner of a row: the `user_id` column, else the
    /// `userId` of the JSON payload.
    pub(crate) fn owner_expr(&self) -> &'static str {
        let column = !self.negotiator.is_disabled(Column::UserId);
        let payload = !self.negotiator.is_disabled(Column::PartsJson);
        match (column, payload) {
            (true, true) => "COALESCE(user_id, JSON_VALUE(parts_json, '$.userId'))",
            (true, false) => "user_id",
            (false, true) => "JSON_VALUE(parts_json, '$.userId')",
            (false, false) => "CAST(NULL AS STRING)",
        }
    }

    pub(crate) async fn query(&self, request: QueryRequest) -> Result<QueryResult> {
        Ok(self.client.query(request).await?)
    }

    /// Run a statement on the messages table built from the current schema
    /// state. When the table lacks an optional column the statement names,
    /// the column is disabled and the statement rebuilt.
    pub(crate) async fn read<F>(&self, build: F) -> Result<QueryResult>
    where
        F: Fn(&Self) -> QueryRequest,
    {
        self.negotiator.prepare().await?;
        loop {
            match self.client.query(build(self)).await {
                Err(err) if self.negotiator.learn_from(&err).is_some() => continue,
                result => return Ok(result?),
            }
        }
    }

    pub(crate) async fn upsert(&self, row: &PhysicalRow, operation: &str) -> Result<WriteOutcome> {
        if row.message_id.is_empty() {
            return Err(StoreError::Validation("empty row key".to_string()));
        }
        self.negotiator.upsert(row, operation).await
    }

    /// Log a degraded read (at most once per `read_log_interval`) and
    /// return the empty value.
    pub(crate) fn degraded<T: Default>(&self, operation: &str, err: &StoreError) -> T {
        if self.read_log.should_log() {
            warn!("{} degraded to an empty result: {}", operation, err);
        }
        T::default()
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("config", &self.config)
            .field("negotiator", &self.negotiator)
            .finish()
    }
}

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
