//! User accounts.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use warehouse_client::{QueryParameter, QueryRequest};

use crate::codec::{decode_user, encode_user};
use crate::error::{Result, StoreError};
use crate::models::UserAccount;
use crate::row::{timestamp_expr, user_key, Column, META_COLUMNS, USERS_SESSION};
use crate::ChatStore;

/// Create a user with a fresh id. Emails are unique, compared
/// case-insensitively.
pub async fn create_user(
    store: &ChatStore,
    email: &str,
    password_hash: Option<&str>,
) -> Result<UserAccount> {
    let email = email.trim();
    if !email.contains('@') {
        return Err(StoreError::Validation(format!("invalid email: {:?}", email)));
    }
    if get_user_by_email(store, email).await?.is_some() {
        return Err(StoreError::Validation(format!(
            "email already registered: {}",
            email
        )));
    }

    let user = UserAccount {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        password_hash: password_hash.map(str::to_string),
        created_at: Utc::now(),
    };
    store.upsert(&encode_user(&user), "create_user").await?;

    info!("Created user {}", user.id);
    Ok(user)
}

/// Find a user by email.
pub async fn get_user_by_email(store: &ChatStore, email: &str) -> Result<Option<UserAccount>> {
    let result = store
        .read(|store| {
            let stored = if store.negotiator().is_disabled(Column::PartsJson) {
                "content"
            } else {
                "COALESCE(NULLIF(content, ''), JSON_VALUE(parts_json, '$.email'))"
            };
            QueryRequest::new(format!(
                r#"SELECT {}
FROM {}
WHERE session_id = '{}' AND role = 'system'
  AND LOWER({}) = LOWER(@email)
ORDER BY {} ASC
LIMIT 1"#,
                store.select_list(&META_COLUMNS),
                store.table(),
                USERS_SESSION,
                stored,
                timestamp_expr(Column::CreatedAt)
            ))
            .param(QueryParameter::string("email", email.trim()))
            .operation("get_user_by_email")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_user))
}

/// Get a user by id.
pub async fn get_user_by_id(store: &ChatStore, id: &str) -> Result<Option<UserAccount>> {
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
            .param(QueryParameter::string("message_id", user_key(id)))
            .operation("get_user_by_id")
        })
        .await?;
    Ok(result.rows.iter().find_map(decode_user))
}
