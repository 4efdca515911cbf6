//! Upstream provider sessions bound to a chat, one per `(chat, provider)`.

use chrono::Utc;
use tracing::debug;
use warehouse_client::{QueryParameter, QueryRequest};

use crate::chat::validate_chat_id;
use crate::codec::{decode_provider_session, encode_provider_session};
use crate::error::{Result, StoreError};
use crate::models::ProviderSession;
use crate::row::{provider_key, provider_prefix, META_COLUMNS};
use crate::ChatStore;

/// Get the session a provider holds for a chat.
pub async fn get_provider_session(
    store: &ChatStore,
    chat_id: &str,
    provider: &str,
) -> Result<Option<ProviderSession>> {
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
            .param(QueryParameter::string(
                "message_id",
                provider_key(chat_id, provider),
            ))
            .operation("get_provider_session")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_provider_session))
}

/// All provider sessions of a chat, ordered by provider.
pub async fn get_provider_sessions_by_chat_id(
    store: &ChatStore,
    chat_id: &str,
) -> Result<Vec<ProviderSession>> {
    let sessions = store
        .read(|store| {
            QueryRequest::new(format!(
                r#"SELECT {}
FROM {}
WHERE role = 'system' AND STARTS_WITH(message_id, @prefix)
ORDER BY message_id"#,
                store.select_list(&META_COLUMNS),
                store.table()
            ))
            .param(QueryParameter::string("prefix", provider_prefix(chat_id)))
            .operation("get_provider_sessions_by_chat_id")
        })
        .await;

    match sessions {
        Ok(result) => Ok(result
            .rows
            .iter()
            .filter_map(decode_provider_session)
            .collect()),
        Err(err) => Ok(store.degraded("get_provider_sessions_by_chat_id", &err)),
    }
}

/// Record the provider's session id for a chat, keeping the original
/// creation time.
pub async fn upsert_provider_session(
    store: &ChatStore,
    chat_id: &str,
    provider: &str,
    session_id: &str,
    user_id: &str,
) -> Result<ProviderSession> {
    validate_chat_id(chat_id)?;
    if provider.is_empty() || provider.contains(':') {
        return Err(StoreError::Validation(format!(
            "invalid provider name: {:?}",
            provider
        )));
    }
    if session_id.is_empty() {
        return Err(StoreError::Validation("provider session id is empty".to_string()));
    }

    let now = Utc::now();
    let created_at = get_provider_session(store, chat_id, provider)
        .await?
        .map(|existing| existing.created_at)
        .unwrap_or(now);

    let session = ProviderSession {
        chat_id: chat_id.to_string(),
        provider: provider.to_string(),
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        created_at,
        updated_at: now,
    };
    store
        .upsert(&encode_provider_session(&session), "upsert_provider_session")
        .await?;

    debug!("Provider {} session for chat {} is {}", provider, chat_id, session_id);
    Ok(session)
}
