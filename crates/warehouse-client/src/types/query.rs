//! Types for the synchronous query endpoint.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WarehouseError;

/// Default server-side wait for a query job to finish.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Request body for `POST /projects/{proj}/queries`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<QueryParameter>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, String>,
    pub timeout_ms: u64,
}

impl QueryRequest {
    /// A standard-SQL query with no parameters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_legacy_sql: false,
            parameter_mode: None,
            query_parameters: Vec::new(),
            labels: IndexMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Add a named parameter (switches the request to NAMED mode).
    pub fn param(mut self, param: QueryParameter) -> Self {
        self.parameter_mode = Some("NAMED".to_string());
        self.query_parameters.retain(|p| p.name != param.name);
        self.query_parameters.push(param);
        self
    }

    pub fn params(self, params: impl IntoIterator<Item = QueryParameter>) -> Self {
        params.into_iter().fold(self, |req, p| req.param(p))
    }

    /// Attach a job label. Values are lowercased to satisfy label rules.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels
            .insert(key.into(), value.into().to_lowercase());
        self
    }

    /// Label the job with the operation that issued it.
    pub fn operation(self, name: &str) -> Self {
        self.label("operation", name)
    }
}

/// A named query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub parameter_value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterType {
    #[serde(rename = "type")]
    pub kind: String,
}

/// A missing `value` encodes SQL NULL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl QueryParameter {
    fn typed(name: impl Into<String>, kind: &str, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            parameter_type: ParameterType {
                kind: kind.to_string(),
            },
            parameter_value: ParameterValue { value },
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::typed(name, "STRING", Some(value.into()))
    }

    pub fn nullable_string(name: impl Into<String>, value: Option<&str>) -> Self {
        Self::typed(name, "STRING", value.map(str::to_string))
    }

    pub fn int64(name: impl Into<String>, value: i64) -> Self {
        Self::typed(name, "INT64", Some(value.to_string()))
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::typed(name, "BOOL", Some(value.to_string()))
    }

    pub fn timestamp(name: impl Into<String>, rfc3339: impl Into<String>) -> Self {
        Self::typed(name, "TIMESTAMP", Some(rfc3339.into()))
    }

    pub fn value(&self) -> Option<&str> {
        self.parameter_value.value.as_deref()
    }
}

/// Raw response body of the query endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryResponse {
    #[serde(default)]
    schema: Option<RawSchema>,
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    f: Vec<RawCell>,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(default)]
    v: Value,
}

/// A result row keyed by column name, in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from name/value pairs.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// A non-null string cell.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get_str(name).map(str::to_string)
    }

    /// Integer cell; the REST API returns INT64 as a string.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Boolean cell; the REST API returns BOOL as "true"/"false".
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The row as a JSON object (used for the streaming insert endpoint).
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Decoded query result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Rows touched by a DML statement.
    pub affected_rows: Option<u64>,
}

impl QueryResult {
    /// Zip `rows[].f[].v` with `schema.fields[].name`.
    pub fn from_response(value: Value) -> Result<Self, WarehouseError> {
        let raw: RawQueryResponse = serde_json::from_value(value)?;

        if raw.job_complete == Some(false) {
            return Err(WarehouseError::Service {
                status: 504,
                reason: Some("timeout".to_string()),
                message: "query job did not complete within the request timeout".to_string(),
            });
        }

        let names: Vec<String> = raw
            .schema
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(raw.rows.len());
        for raw_row in raw.rows {
            if raw_row.f.len() != names.len() {
                return Err(WarehouseError::MalformedResponse(format!(
                    "row has {} cells but schema has {} fields",
                    raw_row.f.len(),
                    names.len()
                )));
            }
            let values = names
                .iter()
                .cloned()
                .zip(raw_row.f.into_iter().map(|c| c.v))
                .collect();
            rows.push(Row { values });
        }

        let affected_rows = raw
            .num_dml_affected_rows
            .as_deref()
            .and_then(|n| n.parse().ok());

        Ok(Self {
            rows,
            affected_rows,
        })
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
