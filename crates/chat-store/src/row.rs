//! Physical row layout shared by every entity kind.
//!
//! All entities live in one wide table keyed by `message_id`. Non-message
//! entities are meta-rows: `role = 'system'` plus a reserved key prefix, and
//! for documents and users a reserved `__meta__` session id.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::codec::format_timestamp;
use crate::models::{Role, Visibility};

/// Prefix of session ids that hold meta-rows only.
pub const META_SESSION_PREFIX: &str = "__meta__";
/// Session id of document rows.
pub const DOCUMENTS_SESSION: &str = "__meta__documents";
/// Session id of user rows.
pub const USERS_SESSION: &str = "__meta__users";

/// Columns of the messages table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    MessageId,
    SessionId,
    ChatId,
    UserId,
    Role,
    Content,
    CreatedAt,
    UpdatedAt,
    PartsJson,
    AttachmentsJson,
    ChartSpecJson,
    ChartError,
    AnsweredIn,
    Visibility,
    IsDeleted,
}

impl Column {
    pub const ALL: [Column; 15] = [
        Column::MessageId,
        Column::SessionId,
        Column::ChatId,
        Column::UserId,
        Column::Role,
        Column::Content,
        Column::CreatedAt,
        Column::UpdatedAt,
        Column::PartsJson,
        Column::AttachmentsJson,
        Column::ChartSpecJson,
        Column::ChartError,
        Column::AnsweredIn,
        Column::Visibility,
        Column::IsDeleted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::MessageId => "message_id",
            Column::SessionId => "session_id",
            Column::ChatId => "chat_id",
            Column::UserId => "user_id",
            Column::Role => "role",
            Column::Content => "content",
            Column::CreatedAt => "created_at",
            Column::UpdatedAt => "updated_at",
            Column::PartsJson => "parts_json",
            Column::AttachmentsJson => "attachments_json",
            Column::ChartSpecJson => "chart_spec_json",
            Column::ChartError => "chart_error",
            Column::AnsweredIn => "answered_in",
            Column::Visibility => "visibility",
            Column::IsDeleted => "is_deleted",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_matches('`').to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Optional columns a writer may drop when the live table lacks them.
    pub fn is_mergeable(&self) -> bool {
        !matches!(
            self,
            Column::MessageId
                | Column::SessionId
                | Column::Role
                | Column::Content
                | Column::CreatedAt
        )
    }

    /// Columns whose live type may be text or native timestamp.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Column::CreatedAt | Column::UpdatedAt)
    }

    /// Type used when the store creates the table itself.
    pub fn ddl_type(&self) -> &'static str {
        match self {
            Column::CreatedAt | Column::UpdatedAt => "TIMESTAMP",
            Column::IsDeleted => "BOOL",
            _ => "STRING",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Columns read for meta-rows.
pub const META_COLUMNS: [Column; 10] = [
    Column::MessageId,
    Column::SessionId,
    Column::ChatId,
    Column::UserId,
    Column::Role,
    Column::Content,
    Column::CreatedAt,
    Column::UpdatedAt,
    Column::PartsJson,
    Column::Visibility,
];

/// Columns read for conversation rows.
pub const MESSAGE_COLUMNS: [Column; 11] = [
    Column::MessageId,
    Column::SessionId,
    Column::ChatId,
    Column::Role,
    Column::Content,
    Column::CreatedAt,
    Column::PartsJson,
    Column::AttachmentsJson,
    Column::ChartSpecJson,
    Column::ChartError,
    Column::AnsweredIn,
];

/// Columns every table version has.
pub const NARROW_COLUMNS: [Column; 5] = [
    Column::MessageId,
    Column::SessionId,
    Column::Role,
    Column::Content,
    Column::CreatedAt,
];

/// Discriminator of the tagged-row sum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Chat,
    Message,
    ProviderSession,
    Document,
    UserAccount,
}

impl RowKind {
    /// Value of the payload's `kind` field.
    pub fn tag(&self) -> &'static str {
        match self {
            RowKind::Chat => "chat",
            RowKind::Message => "message",
            RowKind::ProviderSession => "provider_session",
            RowKind::Document => "document",
            RowKind::UserAccount => "user",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "chat" => Some(RowKind::Chat),
            "message" => Some(RowKind::Message),
            "provider_session" => Some(RowKind::ProviderSession),
            "document" => Some(RowKind::Document),
            "user" => Some(RowKind::UserAccount),
            _ => None,
        }
    }

    /// Classify a row written before payloads carried a `kind` tag.
    pub fn from_legacy_key(message_id: &str, session_id: &str) -> Self {
        if session_id == DOCUMENTS_SESSION || message_id.starts_with("doc:") {
            RowKind::Document
        } else if session_id == USERS_SESSION || message_id.starts_with("user:") {
            RowKind::UserAccount
        } else if message_id.starts_with("chat:") {
            RowKind::Chat
        } else if message_id.starts_with("provider:") {
            RowKind::ProviderSession
        } else {
            RowKind::Message
        }
    }
}

/// SQL expression reading a temporal column as TIMESTAMP whether it is
/// stored as text or natively.
pub fn timestamp_expr(column: Column) -> String {
    format!("TIMESTAMP(CAST({} AS STRING))", column)
}

pub fn chat_key(chat_id: &str) -> String {
    format!("chat:{}", chat_id)
}

pub fn provider_key(chat_id: &str, provider: &str) -> String {
    format!("provider:{}:{}", chat_id, provider)
}

pub fn provider_prefix(chat_id: &str) -> String {
    format!("provider:{}:", chat_id)
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Key of one document version: `doc:<id>:<millis>:<rand>`.
pub fn document_key(document_id: &str, created_at: DateTime<Utc>) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "doc:{}:{}:{}",
        document_id,
        created_at.timestamp_millis(),
        &nonce[..8]
    )
}

pub fn document_prefix(document_id: &str) -> String {
    format!("doc:{}:", document_id)
}

/// A bound column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Timestamp(DateTime<Utc>),
    Bool(bool),
}

impl ColumnValue {
    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Text(Some(s)) => Value::String(s.clone()),
            ColumnValue::Text(None) => Value::Null,
            ColumnValue::Timestamp(ts) => Value::String(format_timestamp(*ts)),
            ColumnValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// One row of the messages table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalRow {
    pub message_id: String,
    pub session_id: String,
    pub chat_id: Option<String>,
    pub user_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parts_json: Option<String>,
    pub attachments_json: Option<String>,
    pub chart_spec_json: Option<String>,
    pub chart_error: Option<String>,
    pub answered_in: Option<String>,
    pub visibility: Option<Visibility>,
    pub is_deleted: bool,
}

impl PhysicalRow {
    /// An empty system meta-row.
    pub fn meta(
        message_id: String,
        session_id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            session_id,
            chat_id: None,
            user_id: None,
            role: Role::System,
            content: String::new(),
            created_at,
            updated_at,
            parts_json: None,
            attachments_json: None,
            chart_spec_json: None,
            chart_error: None,
            answered_in: None,
            visibility: None,
            is_deleted: false,
        }
    }

    pub fn value(&self, column: Column) -> ColumnValue {
        let text = |v: &Option<String>| ColumnValue::Text(v.clone());
        match column {
            Column::MessageId => ColumnValue::Text(Some(self.message_id.clone())),
            Column::SessionId => ColumnValue::Text(Some(self.session_id.clone())),
            Column::ChatId => text(&self.chat_id),
            Column::UserId => text(&self.user_id),
            Column::Role => ColumnValue::Text(Some(self.role.as_str().to_string())),
            Column::Content => ColumnValue::Text(Some(self.content.clone())),
            Column::CreatedAt => ColumnValue::Timestamp(self.created_at),
            Column::UpdatedAt => ColumnValue::Timestamp(self.updated_at),
            Column::PartsJson => text(&self.parts_json),
            Column::AttachmentsJson => text(&self.attachments_json),
            Column::ChartSpecJson => text(&self.chart_spec_json),
            Column::ChartError => text(&self.chart_error),
            Column::AnsweredIn => text(&self.answered_in),
            Column::Visibility => {
                ColumnValue::Text(self.visibility.map(|v| v.as_str().to_string()))
            }
            Column::IsDeleted => ColumnValue::Bool(self.is_deleted),
        }
    }

    /// JSON object for the streaming insert endpoint, without `skip` columns.
    pub fn to_insert_json(&self, skip: &BTreeSet<Column>) -> Value {
        let map: Map<String, Value> = Column::ALL
            .into_iter()
            .filter(|c| !skip.contains(c))
            .map(|c| (c.name().to_string(), self.value(c).to_json()))
            .collect();
        Value::Object(map)
    }
}
