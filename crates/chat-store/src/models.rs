//! Domain models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who can see a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Reserved for meta-rows.
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One part of a message (text, reasoning, tool call, ...).
///
/// Only `type` and `text` are interpreted; every other field is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagePart {
    /// A plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    /// The text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chat metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_spec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_error: Option<String>,
    /// Provider/model that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_in: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A message created now with no attachments or chart.
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        role: Role,
        parts: Vec<MessagePart>,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            role,
            parts,
            attachments: Vec::new(),
            chart_spec: None,
            chart_error: None,
            answered_in: None,
            created_at: Utc::now(),
        }
    }

    /// Newline-joined text of all text parts.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An upstream LLM provider's session bound to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSession {
    pub chat_id: String,
    pub provider: String,
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of artifact a document holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Text,
    Code,
    Image,
    Sheet,
}

/// One version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: Option<String>,
    pub kind: DocumentKind,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// An application user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata for an uploaded file. The blob itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub message_id: Option<String>,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Cursor for chat listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Chats created after the anchor chat.
    StartingAfter(String),
    /// Chats created before the anchor chat (the next page when listing newest first).
    EndingBefore(String),
}

/// One page of chats, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    pub has_more: bool,
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub failed: usize,
}
