//! Conversion between domain entities and physical rows.
//!
//! Decoding never fails on malformed payloads. Structured columns that are
//! missing or unparsable fall back to a minimal reconstruction, and meta-rows
//! that cannot produce their entity decode to `None`.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use warehouse_client::Row;

use crate::models::{
    Attachment, Chat, ChatMessage, Document, DocumentKind, MessagePart, ProviderSession, Role,
    UserAccount, Visibility,
};
use crate::row::{
    chat_key, provider_key, user_key, PhysicalRow, RowKind, DOCUMENTS_SESSION, USERS_SESSION,
};

/// Title used when neither metadata nor messages provide one.
pub const DEFAULT_CHAT_TITLE: &str = "New chat";

/// RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp read from a text or native timestamp column.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f] UTC`, `YYYY-MM-DD HH:MM:SS[.f]+00`
/// and the REST API's float epoch seconds (`"1.7040672E9"`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f UTC", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }

    let secs: f64 = s.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// Text of a cell, whether the API returned it as a string or a number.
fn cell_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn cell_timestamp(row: &Row, column: &str) -> Option<DateTime<Utc>> {
    let raw = cell_text(row, column)?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        debug!("Unparsable {} value {:?}", column, raw);
    }
    parsed
}

fn lenient_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_timestamp)
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Serialize a payload struct and stamp it with its `kind` discriminator.
fn tagged_payload<T: Serialize>(kind: RowKind, payload: &T) -> String {
    let mut value = serde_json::to_value(payload).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("kind".to_string(), Value::String(kind.tag().to_string()));
    }
    value.to_string()
}

/// Parse `parts_json` of a meta-row into a JSON object.
fn payload_object(row: &Row) -> Option<Value> {
    let raw = row.get_str("parts_json")?;
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => {
            debug!(
                "Ignoring non-object payload on {}",
                row.get_str("message_id").unwrap_or("?")
            );
            None
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ChatPayload {
    chat_id: Option<String>,
    user_id: Option<String>,
    title: Option<String>,
    visibility: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProviderPayload {
    chat_id: Option<String>,
    provider: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DocumentPayload {
    id: Option<String>,
    title: Option<String>,
    content: Option<String>,
    document_kind: Option<DocumentKind>,
    user_id: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserPayload {
    id: Option<String>,
    email: Option<String>,
    password_hash: Option<String>,
    created_at: Option<String>,
}

fn payload<T: for<'de> Deserialize<'de> + Default>(row: &Row) -> T {
    payload_object(row)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Ownership data copied onto every conversation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOwner {
    pub user_id: String,
    pub visibility: Visibility,
}

impl From<&Chat> for ChatOwner {
    fn from(chat: &Chat) -> Self {
        Self {
            user_id: chat.user_id.clone(),
            visibility: chat.visibility,
        }
    }
}

/// Encode a conversation message.
pub fn encode_message(message: &ChatMessage, session_id: &str, owner: &ChatOwner) -> PhysicalRow {
    let chat_id = if message.chat_id.is_empty() {
        session_id.to_string()
    } else {
        message.chat_id.clone()
    };

    PhysicalRow {
        message_id: message.id.clone(),
        session_id: session_id.to_string(),
        chat_id: Some(chat_id),
        user_id: Some(owner.user_id.clone()),
        role: message.role,
        content: message.plain_text(),
        created_at: message.created_at,
        updated_at: Utc::now(),
        parts_json: serde_json::to_string(&message.parts).ok(),
        attachments_json: serde_json::to_string(&message.attachments).ok(),
        chart_spec_json: message.chart_spec.as_ref().map(Value::to_string),
        chart_error: message.chart_error.clone(),
        answered_in: message.answered_in.clone(),
        visibility: Some(owner.visibility),
        is_deleted: false,
    }
}

/// Decode a conversation row. Meta-rows and unknown roles yield `None`.
pub fn decode_message(row: &Row) -> Option<ChatMessage> {
    let id = row.get_string("message_id")?;
    let role = match row.get_str("role").and_then(Role::parse) {
        Some(role @ (Role::User | Role::Assistant)) => role,
        _ => return None,
    };

    let content = row.get_string("content").unwrap_or_default();
    let parts = row
        .get_str("parts_json")
        .and_then(|raw| serde_json::from_str::<Vec<MessagePart>>(raw).ok())
        .unwrap_or_else(|| vec![MessagePart::text(content.clone())]);

    let attachments = row
        .get_str("attachments_json")
        .and_then(|raw| serde_json::from_str::<Vec<Attachment>>(raw).ok())
        .unwrap_or_default();

    let chart_spec = row
        .get_str("chart_spec_json")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter(|v| !v.is_null());

    let chat_id = row
        .get_string("chat_id")
        .or_else(|| row.get_string("session_id"))
        .unwrap_or_default();

    Some(ChatMessage {
        id,
        chat_id,
        role,
        parts,
        attachments,
        chart_spec,
        chart_error: row.get_string("chart_error"),
        answered_in: row.get_string("answered_in"),
        created_at: cell_timestamp(row, "created_at").unwrap_or_else(epoch),
    })
}

/// Encode chat metadata as its meta-row.
pub fn encode_chat(chat: &Chat) -> PhysicalRow {
    let payload = ChatPayload {
        chat_id: Some(chat.id.clone()),
        user_id: Some(chat.user_id.clone()),
        title: Some(chat.title.clone()),
        visibility: Some(chat.visibility.as_str().to_string()),
        created_at: Some(format_timestamp(chat.created_at)),
        updated_at: Some(format_timestamp(chat.updated_at)),
    };

    let mut row = PhysicalRow::meta(
        chat_key(&chat.id),
        chat.id.clone(),
        chat.created_at,
        chat.updated_at,
    );
    row.chat_id = Some(chat.id.clone());
    row.user_id = Some(chat.user_id.clone());
    row.content = chat.title.clone();
    row.visibility = Some(chat.visibility);
    row.parts_json = Some(tagged_payload(RowKind::Chat, &payload));
    row
}

/// Decode a chat meta-row.
pub fn decode_chat(row: &Row) -> Option<Chat> {
    let message_id = row.get_str("message_id")?;
    let p: ChatPayload = payload(row);

    let id = p
        .chat_id
        .or_else(|| message_id.strip_prefix("chat:").map(str::to_string))
        .or_else(|| row.get_string("chat_id"))?;
    let user_id = p.user_id.or_else(|| row.get_string("user_id"))?;
    let title = p
        .title
        .or_else(|| row.get_string("content"))
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
    let visibility = p
        .visibility
        .or_else(|| row.get_string("visibility"))
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    let created_at = lenient_timestamp(p.created_at.as_deref())
        .or_else(|| cell_timestamp(row, "created_at"))
        .unwrap_or_else(epoch);
    let updated_at = lenient_timestamp(p.updated_at.as_deref())
        .or_else(|| cell_timestamp(row, "updated_at"))
        .unwrap_or(created_at);

    Some(Chat {
        id,
        user_id,
        title,
        visibility,
        created_at,
        updated_at,
    })
}

/// Decode an aggregate row (`chat_id`, `user_id`, `created_at`,
/// `updated_at`, `title`) describing a chat without a meta-row.
pub fn decode_derived_chat(row: &Row) -> Option<Chat> {
    let id = row.get_string("chat_id")?;
    let user_id = row.get_string("user_id")?;
    let created_at = cell_timestamp(row, "created_at").unwrap_or_else(epoch);
    let updated_at = cell_timestamp(row, "updated_at").unwrap_or(created_at);
    let title = row
        .get_string("title")
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());

    Some(Chat {
        id,
        user_id,
        title,
        visibility: row
            .get_str("visibility")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        created_at,
        updated_at,
    })
}

/// Encode a provider session meta-row.
pub fn encode_provider_session(session: &ProviderSession) -> PhysicalRow {
    let payload = ProviderPayload {
        chat_id: Some(session.chat_id.clone()),
        provider: Some(session.provider.clone()),
        session_id: Some(session.session_id.clone()),
        user_id: Some(session.user_id.clone()),
        created_at: Some(format_timestamp(session.created_at)),
        updated_at: Some(format_timestamp(session.updated_at)),
    };

    let mut row = PhysicalRow::meta(
        provider_key(&session.chat_id, &session.provider),
        session.chat_id.clone(),
        session.created_at,
        session.updated_at,
    );
    row.chat_id = Some(session.chat_id.clone());
    row.user_id = Some(session.user_id.clone());
    row.content = session.session_id.clone();
    row.parts_json = Some(tagged_payload(RowKind::ProviderSession, &payload));
    row
}

pub fn decode_provider_session(row: &Row) -> Option<ProviderSession> {
    let message_id = row.get_str("message_id")?;
    let p: ProviderPayload = payload(row);

    // provider:<chatId>:<provider>; chat ids never contain ':' in practice,
    // but split from the right to be safe.
    let from_key = message_id
        .strip_prefix("provider:")
        .and_then(|rest| rest.rsplit_once(':'));

    let chat_id = p
        .chat_id
        .or_else(|| from_key.map(|(c, _)| c.to_string()))
        .or_else(|| row.get_string("chat_id"))?;
    let provider = p.provider.or_else(|| from_key.map(|(_, p)| p.to_string()))?;
    let session_id = p
        .session_id
        .or_else(|| row.get_string("content"))
        .filter(|s| !s.is_empty())?;
    let created_at = lenient_timestamp(p.created_at.as_deref())
        .or_else(|| cell_timestamp(row, "created_at"))
        .unwrap_or_else(epoch);

    Some(ProviderSession {
        chat_id,
        provider,
        session_id,
        user_id: p
            .user_id
            .or_else(|| row.get_string("user_id"))
            .unwrap_or_default(),
        created_at,
        updated_at: lenient_timestamp(p.updated_at.as_deref())
            .or_else(|| cell_timestamp(row, "updated_at"))
            .unwrap_or(created_at),
    })
}

/// Encode one document version under `message_id`.
pub fn encode_document(document: &Document, message_id: String) -> PhysicalRow {
    let payload = DocumentPayload {
        id: Some(document.id.clone()),
        title: Some(document.title.clone()),
        content: document.content.clone(),
        document_kind: Some(document.kind),
        user_id: Some(document.user_id.clone()),
        created_at: Some(format_timestamp(document.created_at)),
    };

    let mut row = PhysicalRow::meta(
        message_id,
        DOCUMENTS_SESSION.to_string(),
        document.created_at,
        document.created_at,
    );
    row.user_id = Some(document.user_id.clone());
    row.content = document.title.clone();
    row.parts_json = Some(tagged_payload(RowKind::Document, &payload));
    row
}

pub fn decode_document(row: &Row) -> Option<Document> {
    let message_id = row.get_str("message_id")?;
    let p: DocumentPayload = payload(row);

    let id = p.id.or_else(|| {
        message_id
            .strip_prefix("doc:")
            .and_then(|rest| rest.split(':').next())
            .map(str::to_string)
    })?;

    Some(Document {
        id,
        title: p
            .title
            .or_else(|| row.get_string("content"))
            .unwrap_or_default(),
        content: p.content,
        kind: p.document_kind.unwrap_or_default(),
        user_id: p
            .user_id
            .or_else(|| row.get_string("user_id"))
            .unwrap_or_default(),
        created_at: lenient_timestamp(p.created_at.as_deref())
            .or_else(|| cell_timestamp(row, "created_at"))
            .unwrap_or_else(epoch),
    })
}

/// Encode a user meta-row.
pub fn encode_user(user: &UserAccount) -> PhysicalRow {
    let payload = UserPayload {
        id: Some(user.id.clone()),
        email: Some(user.email.clone()),
        password_hash: user.password_hash.clone(),
        created_at: Some(format_timestamp(user.created_at)),
    };

    let mut row = PhysicalRow::meta(
        user_key(&user.id),
        USERS_SESSION.to_string(),
        user.created_at,
        user.created_at,
    );
    row.user_id = Some(user.id.clone());
    row.content = user.email.clone();
    row.parts_json = Some(tagged_payload(RowKind::UserAccount, &payload));
    row
}

pub fn decode_user(row: &Row) -> Option<UserAccount> {
    let message_id = row.get_str("message_id")?;
    let p: UserPayload = payload(row);

    let id = p
        .id
        .or_else(|| message_id.strip_prefix("user:").map(str::to_string))
        .or_else(|| row.get_string("user_id"))?;
    let email = p
        .email
        .or_else(|| row.get_string("content"))
        .filter(|e| !e.is_empty())?;

    Some(UserAccount {
        id,
        email,
        password_hash: p.password_hash,
        created_at: lenient_timestamp(p.created_at.as_deref())
            .or_else(|| cell_timestamp(row, "created_at"))
            .unwrap_or_else(epoch),
    })
}

/// A decoded row of any entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRow {
    Chat(Chat),
    Message(ChatMessage),
    ProviderSession(ProviderSession),
    Document(Document),
    UserAccount(UserAccount),
}

impl StoredRow {
    pub fn kind(&self) -> RowKind {
        match self {
            StoredRow::Chat(_) => RowKind::Chat,
            StoredRow::Message(_) => RowKind::Message,
            StoredRow::ProviderSession(_) => RowKind::ProviderSession,
            StoredRow::Document(_) => RowKind::Document,
            StoredRow::UserAccount(_) => RowKind::UserAccount,
        }
    }
}

/// Discriminate a row: payload `kind` first, key conventions second.
pub fn row_kind(row: &Row) -> RowKind {
    let tagged = (row.get_str("role") == Some("system"))
        .then(|| payload_object(row))
        .flatten()
        .and_then(|p| p.get("kind").and_then(Value::as_str).and_then(RowKind::from_tag));

    tagged.unwrap_or_else(|| {
        RowKind::from_legacy_key(
            row.get_str("message_id").unwrap_or_default(),
            row.get_str("session_id").unwrap_or_default(),
        )
    })
}

/// Decode any row into the tagged sum type.
pub fn decode_stored(row: &Row) -> Option<StoredRow> {
    match row_kind(row) {
        RowKind::Chat => decode_chat(row).map(StoredRow::Chat),
        RowKind::Message => decode_message(row).map(StoredRow::Message),
        RowKind::ProviderSession => decode_provider_session(row).map(StoredRow::ProviderSession),
        RowKind::Document => decode_document(row).map(StoredRow::Document),
        RowKind::UserAccount => decode_user(row).map(StoredRow::UserAccount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Column;
    use serde_json::json;
    use std::collections::BTreeSet;

    /// Read a physical row back the way the query endpoint returns it.
    fn as_result_row(row: &PhysicalRow) -> Row {
        let json = row.to_insert_json(&BTreeSet::new());
        let mut out = Row::new();
        for column in Column::ALL {
            let value = match &json[column.name()] {
                Value::Bool(b) => Value::String(b.to_string()),
                other => other.clone(),
            };
            out.insert(column.name(), value);
        }
        out
    }

    fn owner() -> ChatOwner {
        ChatOwner {
            user_id: "u1".to_string(),
            visibility: Visibility::Private,
        }
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T00:00:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00 UTC"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00+00"), Some(expected));
        assert_eq!(parse_timestamp("1.7040672E9"), Some(expected));
        assert_eq!(parse_timestamp("1704067200"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(format_timestamp(expected), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_message_round_trip() {
        let mut message = ChatMessage::new(
            "m1",
            "c1",
            Role::Assistant,
            vec![
                MessagePart::text("Here is the chart"),
                serde_json::from_value(json!({
                    "type": "tool-invocation",
                    "toolInvocation": {"toolName": "chart", "args": {"x": [1, 2]}}
                }))
                .unwrap(),
            ],
        );
        message.attachments = vec![serde_json::from_value(json!({
            "url": "https://blob/x.png",
            "name": "x.png",
            "contentType": "image/png",
            "width": 640
        }))
        .unwrap()];
        message.chart_spec = Some(json!({"mark": "bar", "encoding": {"x": {"field": "a"}}}));
        message.answered_in = Some("openai".to_string());
        message.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let row = encode_message(&message, "c1", &owner());
        assert_eq!(row.content, "Here is the chart");
        assert_eq!(row.user_id.as_deref(), Some("u1"));

        let decoded = decode_message(&as_result_row(&row)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_malformed_parts_fall_back_to_content() {
        let row = Row::from_pairs([
            ("message_id", json!("m1")),
            ("session_id", json!("c1")),
            ("role", json!("user")),
            ("content", json!("hello")),
            ("parts_json", json!("{not json")),
            ("attachments_json", json!("{\"nope\":1}")),
            ("chart_spec_json", json!("???")),
            ("created_at", json!("garbage")),
        ]);
        let message = decode_message(&row).unwrap();
        assert_eq!(message.parts, vec![MessagePart::text("hello")]);
        assert!(message.attachments.is_empty());
        assert!(message.chart_spec.is_none());
        assert_eq!(message.chat_id, "c1");
        assert_eq!(message.created_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_attachment_without_url_is_kept() {
        let row = Row::from_pairs([
            ("message_id", json!("m1")),
            ("session_id", json!("c1")),
            ("role", json!("user")),
            ("content", json!("see files")),
            (
                "attachments_json",
                json!(r#"[{"url":"https://files/a.png","name":"a.png"},{"name":"pending.pdf"}]"#),
            ),
        ]);
        let message = decode_message(&row).unwrap();
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].url, "https://files/a.png");
        assert_eq!(message.attachments[1].url, "");
        assert_eq!(message.attachments[1].name, "pending.pdf");
    }

    #[test]
    fn test_missing_parts_column_synthesizes_text_part() {
        let row = Row::from_pairs([
            ("message_id", json!("m2")),
            ("session_id", json!("c1")),
            ("role", json!("assistant")),
            ("content", json!("reply")),
            ("created_at", json!("1.7040672E9")),
        ]);
        let message = decode_message(&row).unwrap();
        assert_eq!(message.parts, vec![MessagePart::text("reply")]);
        assert_eq!(message.role, Role::Assistant);
    }

    #[test]
    fn test_system_rows_are_not_messages() {
        let row = Row::from_pairs([
            ("message_id", json!("chat:c1")),
            ("role", json!("system")),
        ]);
        assert!(decode_message(&row).is_none());
    }

    #[test]
    fn test_chat_round_trip_and_tag() {
        let created = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let chat = Chat {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            title: "Hi".to_string(),
            visibility: Visibility::Public,
            created_at: created,
            updated_at: created,
        };
        let row = as_result_row(&encode_chat(&chat));
        assert_eq!(row.get_str("message_id"), Some("chat:c1"));
        assert_eq!(row_kind(&row), RowKind::Chat);
        assert_eq!(decode_chat(&row), Some(chat.clone()));
        assert_eq!(decode_stored(&row), Some(StoredRow::Chat(chat)));
    }

    #[test]
    fn test_legacy_chat_without_kind_tag() {
        let row = Row::from_pairs([
            ("message_id", json!("chat:old")),
            ("session_id", json!("old")),
            ("user_id", json!("u9")),
            ("role", json!("system")),
            ("content", json!("")),
            ("created_at", json!("2023-06-01 10:00:00 UTC")),
            ("parts_json", json!("{\"title\":\"Legacy\"}")),
        ]);
        assert_eq!(row_kind(&row), RowKind::Chat);
        let chat = decode_chat(&row).unwrap();
        assert_eq!(chat.id, "old");
        assert_eq!(chat.user_id, "u9");
        assert_eq!(chat.title, "Legacy");
        assert_eq!(chat.visibility, Visibility::Private);
    }

    #[test]
    fn test_chat_without_owner_is_dropped() {
        let row = Row::from_pairs([
            ("message_id", json!("chat:c1")),
            ("role", json!("system")),
            ("parts_json", json!("[]")),
        ]);
        assert!(decode_chat(&row).is_none());
    }

    #[test]
    fn test_provider_session_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let session = ProviderSession {
            chat_id: "c1".to_string(),
            provider: "openai".to_string(),
            session_id: "resp_123".to_string(),
            user_id: "u1".to_string(),
            created_at: now,
            updated_at: now,
        };
        let row = as_result_row(&encode_provider_session(&session));
        assert_eq!(row.get_str("message_id"), Some("provider:c1:openai"));
        assert_eq!(
            decode_stored(&row),
            Some(StoredRow::ProviderSession(session))
        );
    }

    #[test]
    fn test_document_and_user_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let document = Document {
            id: "d1".to_string(),
            title: "Plan".to_string(),
            content: Some("# Plan".to_string()),
            kind: DocumentKind::Code,
            user_id: "u1".to_string(),
            created_at: now,
        };
        let doc_row = as_result_row(&encode_document(&document, "doc:d1:1:abcd".to_string()));
        assert_eq!(doc_row.get_str("session_id"), Some(DOCUMENTS_SESSION));
        assert_eq!(decode_stored(&doc_row), Some(StoredRow::Document(document)));

        let user = UserAccount {
            id: "u1".to_string(),
            email: "a@b.c".to_string(),
            password_hash: Some("hash".to_string()),
            created_at: now,
        };
        let user_row = as_result_row(&encode_user(&user));
        assert_eq!(decode_stored(&user_row), Some(StoredRow::UserAccount(user)));
    }

    #[test]
    fn test_derived_chat_defaults() {
        let row = Row::from_pairs([
            ("chat_id", json!("c7")),
            ("user_id", json!("u1")),
            ("created_at", json!("2024-01-01T00:00:00.000Z")),
            ("title", Value::Null),
        ]);
        let chat = decode_derived_chat(&row).unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
        assert_eq!(chat.updated_at, chat.created_at);
    }
}
