//! File metadata. Blobs live elsewhere; only their descriptions are stored.

use serde_json::{json, Value};
use tracing::debug;
use warehouse_client::{InsertRow, QueryParameter, QueryRequest, Row};

use crate::chat::validate_chat_id;
use crate::codec::{format_timestamp, parse_timestamp};
use crate::error::{Result, StoreError};
use crate::models::FileMetadata;
use crate::schema::FILE_COLUMNS;
use crate::ChatStore;

fn encode_file(file: &FileMetadata) -> Value {
    json!({
        "file_id": file.file_id,
        "chat_id": file.chat_id,
        "user_id": file.user_id,
        "message_id": file.message_id,
        "name": file.name,
        "content_type": file.content_type,
        "size_bytes": file.size_bytes.to_string(),
        "url": file.url,
        "created_at": format_timestamp(file.created_at),
        "is_deleted": false,
    })
}

fn decode_file(row: &Row) -> Option<FileMetadata> {
    Some(FileMetadata {
        file_id: row.get_string("file_id")?,
        chat_id: row.get_string("chat_id")?,
        user_id: row.get_string("user_id").unwrap_or_default(),
        message_id: row.get_string("message_id"),
        name: row.get_string("name").unwrap_or_default(),
        content_type: row.get_string("content_type"),
        size_bytes: row.get_i64("size_bytes").unwrap_or(0),
        url: row.get_string("url")?,
        created_at: row
            .get_str("created_at")
            .and_then(parse_timestamp)
            .unwrap_or_default(),
    })
}

/// Record an uploaded file. Re-sending the same `file_id` is de-duplicated
/// by the streaming insert.
pub async fn save_file_metadata(store: &ChatStore, file: &FileMetadata) -> Result<()> {
    validate_chat_id(&file.chat_id)?;
    if file.file_id.trim().is_empty() {
        return Err(StoreError::Validation("file id is empty".to_string()));
    }
    if file.size_bytes < 0 {
        return Err(StoreError::Validation(format!(
            "negative file size: {}",
            file.size_bytes
        )));
    }
    if store.config().auto_create_tables {
        store.ensure_tables().await?;
    }

    store
        .client()
        .insert_all(
            &store.config().dataset,
            &store.config().files_table,
            vec![InsertRow::new(file.file_id.clone(), encode_file(file))],
        )
        .await?;

    debug!("Saved file {} for chat {}", file.file_id, file.chat_id);
    Ok(())
}

/// Files attached to a chat, oldest first.
pub async fn get_files_by_chat_id(store: &ChatStore, chat_id: &str) -> Result<Vec<FileMetadata>> {
    let columns = FILE_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| *name != "is_deleted")
        .collect::<Vec<_>>()
        .join(", ");

    let request = QueryRequest::new(format!(
        r#"SELECT {}
FROM {}
WHERE chat_id = @chat_id AND COALESCE(is_deleted, FALSE) = FALSE
ORDER BY created_at ASC, file_id ASC"#,
        columns,
        store.config().files_ref()
    ))
    .param(QueryParameter::string("chat_id", chat_id))
    .operation("get_files_by_chat_id");

    match store.query(request).await {
        Ok(result) => Ok(result.rows.iter().filter_map(decode_file).collect()),
        Err(err) => Ok(store.degraded("get_files_by_chat_id", &err)),
    }
}

/// Delete the file metadata of a chat.
pub async fn delete_files_by_chat_id(store: &ChatStore, chat_id: &str) -> Result<u64> {
    let request = QueryRequest::new(format!(
        "DELETE FROM {}\nWHERE chat_id = @chat_id",
        store.config().files_ref()
    ))
    .param(QueryParameter::string("chat_id", chat_id))
    .operation("delete_files_by_chat_id");

    Ok(store.query(request).await?.affected_rows.unwrap_or(0))
}
