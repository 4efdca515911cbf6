//! Types for the streaming insert endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row for `insertAll`. `insert_id` enables best-effort de-duplication.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    pub insert_id: String,
    pub json: Value,
}

impl InsertRow {
    pub fn new(insert_id: impl Into<String>, json: Value) -> Self {
        Self {
            insert_id: insert_id.into(),
            json,
        }
    }
}

/// Request body for `insertAll`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllRequest {
    pub ignore_unknown_values: bool,
    pub skip_invalid_rows: bool,
    pub rows: Vec<InsertRow>,
}

impl InsertAllRequest {
    pub fn new(rows: Vec<InsertRow>) -> Self {
        Self {
            ignore_unknown_values: true,
            skip_invalid_rows: false,
            rows,
        }
    }
}

/// Response body for `insertAll`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllResponse {
    #[serde(default)]
    pub insert_errors: Vec<InsertErrorEntry>,
}

/// Errors for a single rejected row.
#[derive(Debug, Clone, Deserialize)]
pub struct InsertErrorEntry {
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl InsertAllResponse {
    /// Summary of the first rejection, if any.
    pub fn first_error_message(&self) -> Option<String> {
        let entry = self.insert_errors.first()?;
        let detail = entry.errors.first();
        Some(format!(
            "row {}: {}",
            entry.index,
            detail
                .and_then(|d| d.message.clone().or_else(|| d.reason.clone()))
                .unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
