//! Chat metadata persistence.
//!
//! A chat is a `chat:<id>` meta-row. Conversations written before meta-rows
//! existed have none; for those a chat is derived from the message rows.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use warehouse_client::{QueryParameter, QueryRequest};

use crate::codec::{decode_chat, decode_derived_chat, encode_chat, format_timestamp};
use crate::error::{Result, StoreError};
use crate::file;
use crate::models::{Chat, ChatPage, DeleteSummary, PageCursor, Visibility};
use crate::row::{
    chat_key, provider_prefix, timestamp_expr, Column, META_COLUMNS, META_SESSION_PREFIX,
};
use crate::ChatStore;

/// Reject ids that would collide with reserved meta sessions.
pub(crate) fn validate_chat_id(chat_id: &str) -> Result<()> {
    if chat_id.trim().is_empty() {
        return Err(StoreError::Validation("chat id is empty".to_string()));
    }
    if chat_id.starts_with(META_SESSION_PREFIX) {
        return Err(StoreError::Validation(format!(
            "chat id {} uses a reserved prefix",
            chat_id
        )));
    }
    Ok(())
}

/// Aggregate select deriving chats from conversation rows.
fn derived_select(store: &ChatStore) -> String {
    let ts = timestamp_expr(Column::CreatedAt);
    format!(
        r#"SELECT session_id AS chat_id,
  ANY_VALUE({owner}) AS user_id,
  MIN({ts}) AS created_at,
  MAX({ts}) AS updated_at,
  ARRAY_AGG(IF(role = 'user', content, NULL) IGNORE NULLS ORDER BY {ts}, message_id LIMIT 1)[SAFE_OFFSET(0)] AS title
FROM {table}"#,
        owner = store.owner_expr(),
        ts = ts,
        table = store.table()
    )
}

/// Keyset position for paging.
struct Anchor {
    forward: bool,
    created_at: DateTime<Utc>,
    chat_id: String,
}

impl Anchor {
    /// Condition placing a row strictly past the anchor in `(created_at, id)` order.
    fn condition(&self, ts: &str, key: &str) -> (String, Vec<QueryParameter>) {
        let (op, prefix) = if self.forward {
            (">", "after")
        } else {
            ("<", "before")
        };
        let condition = format!(
            "({ts} {op} @{prefix}_ts OR ({ts} = @{prefix}_ts AND {key} {op} @{prefix}_key))"
        );
        let params = vec![
            QueryParameter::timestamp(format!("{prefix}_ts"), format_timestamp(self.created_at)),
            QueryParameter::string(format!("{prefix}_key"), self.chat_id.clone()),
        ];
        (condition, params)
    }
}

async fn find_chat_meta(store: &ChatStore, chat_id: &str) -> Result<Option<Chat>> {
    let result = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"SELECT {}
FROM {}
WHERE message_id = @message_id AND role = 'system'
LIMIT 1"#,
                store.select_list(&META_COLUMNS),
                store.table()
            ))
            .param(QueryParameter::string("message_id", chat_key(chat_id)))
            .operation("get_chat_by_id")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_chat))
}

async fn derive_chat(store: &ChatStore, chat_id: &str) -> Result<Option<Chat>> {
    let result = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"{}
WHERE session_id = @chat_id AND role IN ('user', 'assistant'){}
GROUP BY session_id"#,
                derived_select(store),
                store.live_filter()
            ))
            .param(QueryParameter::string("chat_id", chat_id))
            .operation("derive_chat")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_derived_chat))
}

async fn write_chat(store: &ChatStore, chat: &Chat, operation: &str) -> Result<()> {
    store.upsert(&encode_chat(chat), operation).await?;
    Ok(())
}

/// Create or replace chat metadata, keeping the original creation time.
pub async fn save_chat(
    store: &ChatStore,
    id: &str,
    user_id: &str,
    title: &str,
    visibility: Visibility,
) -> Result<Chat> {
    validate_chat_id(id)?;
    if user_id.trim().is_empty() {
        return Err(StoreError::Validation("user id is empty".to_string()));
    }

    let now = Utc::now();
    let created_at = get_chat_by_id(store, id)
        .await?
        .map(|existing| existing.created_at)
        .unwrap_or(now);

    let chat = Chat {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: title.to_string(),
        visibility,
        created_at,
        updated_at: now,
    };
    write_chat(store, &chat, "save_chat").await?;
    debug!("Saved chat {} for user {}", id, user_id);
    Ok(chat)
}

/// Get a chat from its meta-row, or derive it from its messages.
pub async fn get_chat_by_id(store: &ChatStore, id: &str) -> Result<Option<Chat>> {
    if id.trim().is_empty() {
        return Ok(None);
    }
    if let Some(chat) = find_chat_meta(store, id).await? {
        return Ok(Some(chat));
    }
    let derived = derive_chat(store, id).await?;
    if derived.is_some() {
        debug!("Chat {} has no meta-row, derived from messages", id);
    }
    Ok(derived)
}

async fn list_meta_chats(
    store: &ChatStore,
    user_id: &str,
    fetch: usize,
    anchor: Option<&Anchor>,
) -> Result<Vec<Chat>> {
    let ts = timestamp_expr(Column::CreatedAt);
    let (paging, paging_params) = match anchor {
        Some(a) => {
            let (condition, params) = a.condition(&ts, "session_id");
            (format!(" AND {}", condition), params)
        }
        None => (String::new(), Vec::new()),
    };

    let result = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"SELECT {cols}
FROM {table}
WHERE role = 'system' AND STARTS_WITH(message_id, 'chat:')
  AND {owner} = @user_id{paging}
ORDER BY {ts} DESC, session_id DESC
LIMIT @limit"#,
                cols = store.select_list(&META_COLUMNS),
                table = store.table(),
                owner = store.owner_expr(),
                paging = paging,
                ts = ts
            ))
            .param(QueryParameter::string("user_id", user_id))
            .param(QueryParameter::int64("limit", fetch as i64))
            .params(paging_params.clone())
            .operation("get_chats_by_user_id")
        })
        .await?;
    Ok(result.rows.iter().filter_map(decode_chat).collect())
}

async fn list_derived_chats(
    store: &ChatStore,
    user_id: &str,
    fetch: usize,
    anchor: Option<&Anchor>,
) -> Result<Vec<Chat>> {
    let min_ts = format!("MIN({})", timestamp_expr(Column::CreatedAt));
    let (having, having_params) = match anchor {
        Some(a) => {
            let (condition, params) = a.condition(&min_ts, "session_id");
            (format!("\nHAVING {}", condition), params)
        }
        None => (String::new(), Vec::new()),
    };

    let result = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"{select}
WHERE {owner} = @user_id AND role IN ('user', 'assistant'){live}
  AND NOT STARTS_WITH(session_id, '{meta}')
  AND session_id NOT IN (
    SELECT session_id FROM {table}
    WHERE role = 'system' AND STARTS_WITH(message_id, 'chat:') AND session_id IS NOT NULL)
GROUP BY session_id{having}
ORDER BY created_at DESC, chat_id DESC
LIMIT @limit"#,
                select = derived_select(store),
                owner = store.owner_expr(),
                live = store.live_filter(),
                meta = META_SESSION_PREFIX,
                table = store.table(),
                having = having
            ))
            .param(QueryParameter::string("user_id", user_id))
            .param(QueryParameter::int64("limit", fetch as i64))
            .params(having_params.clone())
            .operation("derive_chats_by_user_id")
        })
        .await?;
    Ok(result.rows.iter().filter_map(decode_derived_chat).collect())
}

/// One page of a user's chats, newest first.
///
/// `StartingAfter` returns chats newer than the anchor, `EndingBefore`
/// chats older than it. An unknown anchor is `NotFound`; storage failures
/// degrade to an empty page.
pub async fn get_chats_by_user_id(
    store: &ChatStore,
    user_id: &str,
    limit: usize,
    cursor: Option<&PageCursor>,
) -> Result<ChatPage> {
    if limit == 0 {
        return Ok(ChatPage::default());
    }

    let anchor = match cursor {
        Some(cursor) => {
            let (forward, id) = match cursor {
                PageCursor::StartingAfter(id) => (true, id),
                PageCursor::EndingBefore(id) => (false, id),
            };
            let chat = get_chat_by_id(store, id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "chat",
                    id: id.clone(),
                })?;
            Some(Anchor {
                forward,
                created_at: chat.created_at,
                chat_id: chat.id,
            })
        }
        None => None,
    };

    let fetch = limit + 1;
    let mut chats = match list_meta_chats(store, user_id, fetch, anchor.as_ref()).await {
        Ok(chats) if !chats.is_empty() => chats,
        Ok(_) => match list_derived_chats(store, user_id, fetch, anchor.as_ref()).await {
            Ok(chats) => chats,
            Err(err) => return Ok(store.degraded("get_chats_by_user_id", &err)),
        },
        Err(err) => return Ok(store.degraded("get_chats_by_user_id", &err)),
    };

    let has_more = chats.len() > limit;
    chats.truncate(limit);
    Ok(ChatPage { chats, has_more })
}

/// Physically delete a chat: its messages, provider sessions, meta-row and
/// (best-effort) file metadata. Returns the chat if it existed.
pub async fn delete_chat_by_id(store: &ChatStore, id: &str) -> Result<Option<Chat>> {
    validate_chat_id(id)?;
    let chat = get_chat_by_id(store, id).await?;

    let request = QueryRequest::new(format!(
        r#"DELETE FROM {}
WHERE session_id = @chat_id
   OR message_id = @chat_key
   OR STARTS_WITH(message_id, @provider_prefix)"#,
        store.table()
    ))
    .param(QueryParameter::string("chat_id", id))
    .param(QueryParameter::string("chat_key", chat_key(id)))
    .param(QueryParameter::string("provider_prefix", provider_prefix(id)))
    .operation("delete_chat_by_id");

    let result = store.query(request).await?;

    if let Err(err) = file::delete_files_by_chat_id(store, id).await {
        warn!("Failed to delete file metadata for chat {}: {}", id, err);
    }

    info!(
        "Deleted chat {} ({} row(s))",
        id,
        result.affected_rows.unwrap_or(0)
    );
    Ok(chat)
}

async fn chat_ids_for_user(store: &ChatStore, user_id: &str) -> Result<Vec<String>> {
    let result = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"SELECT DISTINCT session_id AS chat_id
FROM {}
WHERE {} = @user_id
  AND NOT STARTS_WITH(session_id, '{}')"#,
                store.table(),
                store.owner_expr(),
                META_SESSION_PREFIX
            ))
            .param(QueryParameter::string("user_id", user_id))
            .operation("list_chat_ids")
        })
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.get_string("chat_id"))
        .collect())
}

/// Delete every chat of a user. Individual failures are counted, not fatal.
pub async fn delete_all_chats_by_user_id(
    store: &ChatStore,
    user_id: &str,
) -> Result<DeleteSummary> {
    let ids = chat_ids_for_user(store, user_id).await?;

    let results: Vec<(String, Result<Option<Chat>>)> = stream::iter(ids)
        .map(|id| async move {
            let outcome = delete_chat_by_id(store, &id).await;
            (id, outcome)
        })
        .buffer_unordered(store.config().delete_concurrency)
        .collect()
        .await;

    let mut summary = DeleteSummary::default();
    for (id, outcome) in results {
        match outcome {
            Ok(_) => summary.deleted += 1,
            Err(err) => {
                warn!("Failed to delete chat {}: {}", id, err);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Deleted {} chat(s) for user {} ({} failed)",
        summary.deleted, user_id, summary.failed
    );
    Ok(summary)
}

async fn update_chat<F>(store: &ChatStore, chat_id: &str, operation: &str, apply: F) -> Result<Chat>
where
    F: FnOnce(&mut Chat),
{
    let mut chat = get_chat_by_id(store, chat_id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "chat",
            id: chat_id.to_string(),
        })?;
    apply(&mut chat);
    chat.updated_at = Utc::now();
    write_chat(store, &chat, operation).await?;
    Ok(chat)
}

/// Change a chat's visibility and copy it onto the chat's messages.
pub async fn update_chat_visibility_by_id(
    store: &ChatStore,
    chat_id: &str,
    visibility: Visibility,
) -> Result<Chat> {
    let chat = update_chat(store, chat_id, "update_chat_visibility", |chat| {
        chat.visibility = visibility
    })
    .await?;

    if store.negotiator().is_disabled(Column::Visibility) {
        return Ok(chat);
    }

    let request = QueryRequest::new(format!(
        r#"UPDATE {}
SET visibility = @visibility
WHERE session_id = @chat_id AND role IN ('user', 'assistant')"#,
        store.table()
    ))
    .param(QueryParameter::string("visibility", visibility.as_str()))
    .param(QueryParameter::string("chat_id", chat_id))
    .operation("propagate_visibility");

    if let Err(err) = store.client().query(request).await {
        store.negotiator().learn_from(&err);
        warn!(
            "Visibility of chat {} saved but not copied to its messages: {}",
            chat_id, err
        );
    }
    Ok(chat)
}

/// Rename a chat.
pub async fn update_chat_title_by_id(store: &ChatStore, chat_id: &str, title: &str) -> Result<Chat> {
    update_chat(store, chat_id, "update_chat_title", |chat| {
        chat.title = title.to_string()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_chat_ids() {
        assert!(validate_chat_id("c1").is_ok());
        assert!(validate_chat_id("").is_err());
        assert!(validate_chat_id("__meta__users").is_err());
    }

    #[test]
    fn test_anchor_condition() {
        let anchor = Anchor {
            forward: false,
            created_at: Utc::now(),
            chat_id: "c9".to_string(),
        };
        let (condition, params) = anchor.condition("ts", "session_id");
        assert_eq!(
            condition,
            "(ts < @before_ts OR (ts = @before_ts AND session_id < @before_key))"
        );
        assert_eq!(params[1].value(), Some("c9"));
    }
}
