//! Conversation message persistence.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use warehouse_client::{QueryParameter, QueryRequest, QueryResult};

use crate::chat::{get_chat_by_id, validate_chat_id};
use crate::codec::{decode_message, encode_message, format_timestamp, ChatOwner};
use crate::error::{Result, StoreError};
use crate::models::ChatMessage;
use crate::row::{timestamp_expr, Column, MESSAGE_COLUMNS, META_SESSION_PREFIX, NARROW_COLUMNS};
use crate::schema::unknown_column;
use crate::ChatStore;

fn owning_chat<'a>(message: &'a ChatMessage, session_id: &'a str) -> &'a str {
    if message.chat_id.is_empty() {
        session_id
    } else {
        &message.chat_id
    }
}

/// Keep the last occurrence of each id, in order of those occurrences.
fn dedup_last(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    let last: HashMap<&str, usize> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.as_str(), i))
        .collect();
    messages
        .iter()
        .enumerate()
        .filter(|(i, m)| last.get(m.id.as_str()) == Some(i))
        .map(|(_, m)| m)
        .collect()
}

/// Save a batch of messages to `session_id`.
///
/// Owners of every referenced chat are resolved before anything is written.
/// Rows are then written one at a time; the batch is not atomic, and a
/// failure reports how many rows were already persisted. Saving the same
/// message id again updates the row in place.
pub async fn save_messages(
    store: &ChatStore,
    messages: &[ChatMessage],
    session_id: &str,
) -> Result<usize> {
    if messages.is_empty() {
        return Ok(0);
    }
    validate_chat_id(session_id)?;

    let batch = dedup_last(messages);
    if batch.len() < messages.len() {
        debug!(
            "Dropped {} duplicate message id(s) from batch",
            messages.len() - batch.len()
        );
    }

    let mut owners: HashMap<&str, ChatOwner> = HashMap::new();
    for message in &batch {
        if message.id.trim().is_empty() {
            return Err(StoreError::Validation("message id is empty".to_string()));
        }
        let chat_id = owning_chat(message, session_id);
        if owners.contains_key(chat_id) {
            continue;
        }
        let chat = get_chat_by_id(store, chat_id)
            .await?
            .ok_or_else(|| StoreError::OwnershipResolution {
                chat_id: chat_id.to_string(),
            })?;
        owners.insert(chat_id, ChatOwner::from(&chat));
    }

    for (persisted, message) in batch.iter().enumerate() {
        let chat_id = owning_chat(message, session_id);
        let owner = owners
            .get(chat_id)
            .ok_or_else(|| StoreError::OwnershipResolution {
                chat_id: chat_id.to_string(),
            })?;
        let row = encode_message(message, session_id, owner);
        if let Err(source) = store.upsert(&row, "save_messages").await {
            return Err(StoreError::BatchWrite {
                persisted,
                message_id: message.id.clone(),
                source: Box::new(source),
            });
        }
    }

    debug!("Saved {} message(s) to {}", batch.len(), session_id);
    Ok(batch.len())
}

/// Run `primary`; on a non-transient failure it could not adapt to, run
/// `narrow` instead. Both keep the soft-delete filter while the table has
/// the column.
async fn with_narrow_fallback<P, N>(store: &ChatStore, primary: P, narrow: N) -> Result<QueryResult>
where
    P: Fn(&ChatStore) -> QueryRequest,
    N: Fn(&ChatStore) -> QueryRequest,
{
    match store.read(primary).await {
        Ok(result) => Ok(result),
        Err(err) if err.is_retryable() => Err(err),
        Err(err) => {
            warn!("Message read fell back to required columns: {}", err);
            store.read(narrow).await
        }
    }
}

/// Messages of a chat, oldest first, without soft-deleted rows.
pub async fn get_messages_by_chat_id(store: &ChatStore, chat_id: &str) -> Result<Vec<ChatMessage>> {
    let ts = timestamp_expr(Column::CreatedAt);
    let statement = |store: &ChatStore, columns: &[Column], operation: &str| {
        QueryRequest::new(format!(
            r#"SELECT {columns}
FROM {table}
WHERE session_id = @chat_id AND role IN ('user', 'assistant'){live}
ORDER BY {ts} ASC, message_id ASC"#,
            columns = store.select_list(columns),
            table = store.table(),
            live = store.live_filter(),
            ts = ts
        ))
        .param(QueryParameter::string("chat_id", chat_id))
        .operation(operation)
    };

    let result = with_narrow_fallback(
        store,
        |store| statement(store, &MESSAGE_COLUMNS, "get_messages_by_chat_id"),
        |store| statement(store, &NARROW_COLUMNS, "get_messages_by_chat_id_narrow"),
    )
    .await;
    match result {
        Ok(result) => Ok(result.rows.iter().filter_map(decode_message).collect()),
        Err(err) => Ok(store.degraded("get_messages_by_chat_id", &err)),
    }
}

/// A single conversation message.
pub async fn get_message_by_id(store: &ChatStore, id: &str) -> Result<Option<ChatMessage>> {
    let statement = |store: &ChatStore, columns: &[Column], operation: &str| {
        QueryRequest::new(format!(
            r#"SELECT {}
FROM {}
WHERE message_id = @message_id AND role IN ('user', 'assistant'){}
LIMIT 1"#,
            store.select_list(columns),
            store.table(),
            store.live_filter()
        ))
        .param(QueryParameter::string("message_id", id))
        .operation(operation)
    };

    let result = with_narrow_fallback(
        store,
        |store| statement(store, &MESSAGE_COLUMNS, "get_message_by_id"),
        |store| statement(store, &NARROW_COLUMNS, "get_message_by_id_narrow"),
    )
    .await?;
    Ok(result.rows.iter().find_map(decode_message))
}

/// Remove messages created at or after `after`.
///
/// Rows are soft-deleted. Only a table without an `is_deleted` column has
/// its rows physically deleted instead; any other failure is returned.
/// Returns the number of rows affected.
pub async fn delete_messages_by_chat_id_after_timestamp(
    store: &ChatStore,
    chat_id: &str,
    after: DateTime<Utc>,
) -> Result<u64> {
    validate_chat_id(chat_id)?;
    let filter = format!(
        "session_id = @chat_id AND role IN ('user', 'assistant') AND {} >= @after",
        timestamp_expr(Column::CreatedAt)
    );
    let params = [
        QueryParameter::string("chat_id", chat_id),
        QueryParameter::timestamp("after", format_timestamp(after)),
    ];

    store.negotiator().prepare().await?;
    if !store.negotiator().is_disabled(Column::IsDeleted) {
        let soft = QueryRequest::new(format!(
            r#"UPDATE {}
SET is_deleted = TRUE
WHERE {} AND COALESCE(is_deleted, FALSE) = FALSE"#,
            store.table(),
            filter
        ))
        .params(params.clone())
        .operation("soft_delete_messages");

        match store.client().query(soft).await {
            Ok(result) => return Ok(result.affected_rows.unwrap_or(0)),
            Err(err) if unknown_column(&err) == Some(Column::IsDeleted) => {
                store.negotiator().disable(Column::IsDeleted);
                warn!(
                    "{} has no is_deleted column, deleting rows of chat {}",
                    store.table(),
                    chat_id
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    let hard = QueryRequest::new(format!("DELETE FROM {}\nWHERE {}", store.table(), filter))
        .params(params)
        .operation("hard_delete_messages");
    let deleted = store.query(hard).await?.affected_rows.unwrap_or(0);
    info!("Deleted {} message(s) from chat {}", deleted, chat_id);
    Ok(deleted)
}

/// User-authored messages in the trailing `window`, for rate limiting.
/// Degrades to 0.
pub async fn get_message_count_by_user_id(
    store: &ChatStore,
    user_id: &str,
    window: Duration,
) -> Result<u64> {
    let now = Utc::now();
    let since = chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let count = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"SELECT COUNT(1) AS n
FROM {}
WHERE {} = @user_id AND role = 'user'
  AND NOT STARTS_WITH(session_id, '{}'){}
  AND {} >= @since"#,
                store.table(),
                store.owner_expr(),
                META_SESSION_PREFIX,
                store.live_filter(),
                timestamp_expr(Column::CreatedAt)
            ))
            .param(QueryParameter::string("user_id", user_id))
            .param(QueryParameter::timestamp("since", format_timestamp(since)))
            .operation("count_messages")
        })
        .await;

    match count {
        Ok(result) => Ok(result
            .first()
            .and_then(|row| row.get_i64("n"))
            .map(|n| n.max(0) as u64)
            .unwrap_or(0)),
        Err(err) => Ok(store.degraded("get_message_count_by_user_id", &err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessagePart, Role};

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage::new(id, "c1", Role::User, vec![MessagePart::text(text)])
    }

    #[test]
    fn test_dedup_keeps_last_occurrence() {
        let batch = vec![message("a", "1"), message("b", "2"), message("a", "3")];
        let kept = dedup_last(&batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "b");
        assert_eq!(kept[1].plain_text(), "3");
    }

    #[test]
    fn test_owning_chat_defaults_to_session() {
        let mut m = message("a", "x");
        assert_eq!(owning_chat(&m, "s1"), "c1");
        m.chat_id.clear();
        assert_eq!(owning_chat(&m, "s1"), "s1");
    }
}
