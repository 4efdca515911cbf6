//! Access-token seam.
//!
//! Token acquisition (service accounts, metadata server, OAuth refresh) is
//! owned by the embedding application; this crate only asks for a bearer
//! token before each request.

use async_trait::async_trait;

use crate::error::WarehouseError;

/// Supplies bearer tokens for warehouse requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid access token.
    async fn access_token(&self) -> Result<String, WarehouseError>;
}

/// A fixed token, typically read from the environment.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read the token from `WAREHOUSE_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, WarehouseError> {
        std::env::var("WAREHOUSE_ACCESS_TOKEN")
            .map(Self::new)
            .map_err(|_| WarehouseError::Auth("WAREHOUSE_ACCESS_TOKEN not set".to_string()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        if self.token.is_empty() {
            return Err(WarehouseError::Auth("empty access token".to_string()));
        }
        Ok(self.token.clone())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}
