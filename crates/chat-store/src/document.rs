//! Versioned documents. Every save adds a version row.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use warehouse_client::{QueryParameter, QueryRequest};

use crate::codec::{decode_document, encode_document, format_timestamp};
use crate::error::{Result, StoreError};
use crate::models::{Document, DocumentKind};
use crate::row::{
    document_key, document_prefix, timestamp_expr, Column, DOCUMENTS_SESSION, META_COLUMNS,
};
use crate::ChatStore;

fn versions_query(store: &ChatStore, order: &str, limit: Option<usize>) -> String {
    format!(
        r#"SELECT {}
FROM {}
WHERE session_id = '{}' AND role = 'system' AND STARTS_WITH(message_id, @prefix)
ORDER BY {} {}, message_id {}{}"#,
        store.select_list(&META_COLUMNS),
        store.table(),
        DOCUMENTS_SESSION,
        timestamp_expr(Column::CreatedAt),
        order,
        order,
        limit.map(|n| format!("\nLIMIT {}", n)).unwrap_or_default()
    )
}

/// Save a new version of a document.
pub async fn save_document(
    store: &ChatStore,
    id: &str,
    title: &str,
    content: Option<&str>,
    kind: DocumentKind,
    user_id: &str,
) -> Result<Document> {
    if id.trim().is_empty() || id.contains(':') {
        return Err(StoreError::Validation(format!("invalid document id: {:?}", id)));
    }

    let document = Document {
        id: id.to_string(),
        title: title.to_string(),
        content: content.map(str::to_string),
        kind,
        user_id: user_id.to_string(),
        created_at: Utc::now(),
    };
    let key = document_key(id, document.created_at);
    store
        .upsert(&encode_document(&document, key), "save_document")
        .await?;

    debug!("Saved document {} version {}", id, document.created_at);
    Ok(document)
}

/// All versions of a document, oldest first.
pub async fn get_documents_by_id(store: &ChatStore, id: &str) -> Result<Vec<Document>> {
    let versions = store
        .read(|store| {
            QueryRequest::new(versions_query(store, "ASC", None))
                .param(QueryParameter::string("prefix", document_prefix(id)))
                .operation("get_documents_by_id")
        })
        .await;

    match versions {
        Ok(result) => Ok(result.rows.iter().filter_map(decode_document).collect()),
        Err(err) => Ok(store.degraded("get_documents_by_id", &err)),
    }
}

/// Latest version of a document.
pub async fn get_document_by_id(store: &ChatStore, id: &str) -> Result<Option<Document>> {
    let result = store
        .read(|store| {
            QueryRequest::new(versions_query(store, "DESC", Some(1)))
                .param(QueryParameter::string("prefix", document_prefix(id)))
                .operation("get_document_by_id")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_document))
}

/// Delete versions created strictly after `after`. Returns rows deleted.
pub async fn delete_documents_by_id_after_timestamp(
    store: &ChatStore,
    id: &str,
    after: DateTime<Utc>,
) -> Result<u64> {
    let request = QueryRequest::new(format!(
        r#"DELETE FROM {}
WHERE session_id = '{}' AND STARTS_WITH(message_id, @prefix)
  AND {} > @after"#,
        store.table(),
        DOCUMENTS_SESSION,
        timestamp_expr(Column::CreatedAt)
    ))
    .param(QueryParameter::string("prefix", document_prefix(id)))
    .param(QueryParameter::timestamp("after", format_timestamp(after)))
    .operation("delete_documents_after");

    let deleted = store.query(request).await?.affected_rows.unwrap_or(0);
    info!("Deleted {} version(s) of document {}", deleted, id);
    Ok(deleted)
}
