//! In-memory stand-in for the warehouse.
//!
//! Statements are interpreted by their `statement`/`operation` job labels and
//! named parameters rather than by parsing SQL. Columns can be removed from
//! the fake table to simulate schema drift, and operations can be made to
//! fail.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_store::codec::{format_timestamp, parse_timestamp};
use chat_store::{ChatStore, StoreConfig};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use warehouse_client::testing::{ScriptedReply, ScriptedTransport};
use warehouse_client::{RetryConfig, WarehouseClient, WarehouseConfig};

pub type Record = BTreeMap<String, Value>;

const ALL_COLUMNS: [&str; 15] = [
    "message_id",
    "session_id",
    "chat_id",
    "user_id",
    "role",
    "content",
    "created_at",
    "updated_at",
    "parts_json",
    "attachments_json",
    "chart_spec_json",
    "chart_error",
    "answered_in",
    "visibility",
    "is_deleted",
];

const NARROW: [&str; 5] = ["message_id", "session_id", "role", "content", "created_at"];

struct FailRule {
    operation: String,
    param: Option<(String, String)>,
    reply: ScriptedReply,
}

#[derive(Default)]
struct FakeState {
    messages: BTreeMap<String, Record>,
    files: BTreeMap<String, Record>,
    missing: BTreeSet<String>,
    rules: Vec<FailRule>,
}

#[derive(Default)]
pub struct FakeWarehouse {
    state: Mutex<FakeState>,
}

fn text(record: &Record, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

fn timestamp(record: &Record, key: &str) -> DateTime<Utc> {
    record
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_default()
}

fn is_deleted(record: &Record) -> bool {
    record.get("is_deleted").and_then(Value::as_str) == Some("true")
}

fn is_conversation(record: &Record) -> bool {
    matches!(
        record.get("role").and_then(Value::as_str),
        Some("user") | Some("assistant")
    )
}

fn is_chat_meta(record: &Record) -> bool {
    record.get("role").and_then(Value::as_str) == Some("system")
        && text(record, "message_id").is_some_and(|id| id.starts_with("chat:"))
}

fn owner(record: &Record) -> Option<String> {
    text(record, "user_id").or_else(|| {
        let payload: Value = serde_json::from_str(&text(record, "parts_json")?).ok()?;
        payload.get("userId")?.as_str().map(str::to_string)
    })
}

/// Epoch seconds as the REST API renders native TIMESTAMP aggregates.
fn epoch_seconds(ts: DateTime<Utc>) -> String {
    format!("{}", ts.timestamp_micros() as f64 / 1_000_000.0)
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        other => other.clone(),
    }
}

fn result(rows: Vec<Record>) -> ScriptedReply {
    let mut fields: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !fields.contains(key) {
                fields.push(key.clone());
            }
        }
    }
    let rows: Vec<Value> = rows
        .iter()
        .map(|row| {
            let cells: Vec<Value> = fields
                .iter()
                .map(|f| json!({"v": row.get(f).cloned().unwrap_or(Value::Null)}))
                .collect();
            json!({"f": cells})
        })
        .collect();
    let schema: Vec<Value> = fields.iter().map(|f| json!({"name": f})).collect();
    ScriptedReply::ok(json!({
        "schema": {"fields": schema},
        "rows": rows,
        "jobComplete": true
    }))
}

fn dml(affected: usize) -> ScriptedReply {
    ScriptedReply::ok(json!({
        "jobComplete": true,
        "numDmlAffectedRows": affected.to_string()
    }))
}

fn project(record: &Record, columns: &[&str]) -> Record {
    columns
        .iter()
        .map(|c| (c.to_string(), record.get(*c).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Which side of the paging anchor a `(created_at, key)` pair is on.
fn past_anchor(params: &BTreeMap<String, Option<String>>, ts: DateTime<Utc>, key: &str) -> bool {
    let anchor = |prefix: &str| {
        let at = params
            .get(&format!("{prefix}_ts"))
            .cloned()
            .flatten()
            .and_then(|v| parse_timestamp(&v))?;
        let id = params.get(&format!("{prefix}_key")).cloned().flatten()?;
        Some((at, id))
    };
    if let Some((at, id)) = anchor("after") {
        return (ts, key.to_string()) > (at, id);
    }
    if let Some((at, id)) = anchor("before") {
        return (ts, key.to_string()) < (at, id);
    }
    true
}

pub fn access_denied() -> ScriptedReply {
    ScriptedReply::status(
        403,
        r#"{"error":{"code":403,"message":"Access Denied","errors":[{"reason":"accessDenied","message":"Access Denied"}]}}"#,
    )
}

impl FakeWarehouse {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Drop a column from the fake table.
    pub fn remove_column(&self, column: &str) {
        self.lock().missing.insert(column.to_string());
    }

    /// Make every `operation` statement fail.
    pub fn fail_operation(&self, operation: &str, reply: ScriptedReply) {
        self.lock().rules.push(FailRule {
            operation: operation.to_string(),
            param: None,
            reply,
        });
    }

    /// Make `operation` statements whose parameter `name` equals `value` fail.
    pub fn fail_when(&self, operation: &str, name: &str, value: &str, reply: ScriptedReply) {
        self.lock().rules.push(FailRule {
            operation: operation.to_string(),
            param: Some((name.to_string(), value.to_string())),
            reply,
        });
    }

    /// Write a row as another writer would have.
    pub fn insert_raw(&self, pairs: &[(&str, &str)]) {
        let record: Record = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        let id = text(&record, "message_id").unwrap_or_default();
        self.lock().messages.insert(id, record);
    }

    pub fn row(&self, message_id: &str) -> Option<Record> {
        self.lock().messages.get(message_id).cloned()
    }

    pub fn rows(&self) -> Vec<Record> {
        self.lock().messages.values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    pub fn handle(&self, path: &str, body: &Value) -> ScriptedReply {
        if path.ends_with("/insertAll") {
            return self.insert_all(path, body);
        }

        let query = body.get("query").and_then(Value::as_str).unwrap_or_default();
        let label = |key: &str| {
            body.get("labels")
                .and_then(|l| l.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let operation = label("operation");
        let statement = label("statement");
        let params: BTreeMap<String, Option<String>> = body
            .get("queryParameters")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|p| {
                        let name = p.get("name")?.as_str()?.to_string();
                        let value = p
                            .get("parameterValue")
                            .and_then(|v| v.get("value"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        Some((name, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut state = self.lock();

        for rule in &state.rules {
            if rule.operation != operation {
                continue;
            }
            let matches = match &rule.param {
                None => true,
                Some((name, value)) => {
                    params.get(name).cloned().flatten().as_deref() == Some(value.as_str())
                }
            };
            if matches {
                return rule.reply.clone();
            }
        }

        if statement == "probe" {
            let rows = ALL_COLUMNS
                .iter()
                .filter(|c| !state.missing.contains(**c))
                .map(|c| {
                    let ty = match *c {
                        "is_deleted" => "BOOL",
                        _ => "STRING",
                    };
                    Record::from([
                        ("column_name".to_string(), json!(c)),
                        ("data_type".to_string(), json!(ty)),
                    ])
                })
                .collect();
            return result(rows);
        }

        // Output aliases may use any name.
        let query = Regex::new(r"(?i)\bAS\s+\w+")
            .map(|re| re.replace_all(query, "").into_owned())
            .unwrap_or_else(|_| query.to_string());
        for column in &state.missing {
            let referenced = Regex::new(&format!(r"(^|[^@\w]){}\b", regex::escape(column)))
                .map(|re| re.is_match(&query))
                .unwrap_or(false);
            if referenced {
                return ScriptedReply::invalid_query(&format!(
                    "Unrecognized name: {} at [1:1]",
                    column
                ));
            }
        }

        match statement.as_str() {
            "ddl" => return dml(0),
            "merge" => return state.merge(&params),
            "exists" => {
                let id = params.get("message_id").cloned().flatten().unwrap_or_default();
                let n = usize::from(state.messages.contains_key(&id));
                return result(vec![Record::from([("n".to_string(), json!(n.to_string()))])]);
            }
            _ => {}
        }

        let live_only = query.contains("is_deleted");
        state.dispatch(&operation, &params, live_only)
    }

    fn insert_all(&self, path: &str, body: &Value) -> ScriptedReply {
        let mut state = self.lock();
        let missing = state.missing.clone();
        let to_files = path.contains("/tables/files/");
        let rows = body.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
        for row in rows {
            let id = row
                .get("insertId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let record: Record = row
                .get("json")
                .and_then(Value::as_object)
                .map(|object| {
                    object
                        .iter()
                        .filter(|(k, _)| to_files || !missing.contains(*k))
                        .map(|(k, v)| (k.clone(), normalize(v)))
                        .collect()
                })
                .unwrap_or_default();
            let table = if to_files {
                &mut state.files
            } else {
                &mut state.messages
            };
            table.entry(id).or_insert(record);
        }
        ScriptedReply::ok(json!({}))
    }
}

impl FakeState {
    fn merge(&mut self, params: &BTreeMap<String, Option<String>>) -> ScriptedReply {
        let Some(id) = params.get("message_id").cloned().flatten() else {
            return ScriptedReply::invalid_query("MERGE without message_id");
        };
        let value = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match self.messages.get_mut(&id) {
            Some(existing) => {
                for (name, v) in params {
                    if name != "message_id" && name != "created_at" {
                        existing.insert(name.clone(), value(v));
                    }
                }
            }
            None => {
                let record = params
                    .iter()
                    .map(|(name, v)| (name.clone(), value(v)))
                    .collect();
                self.messages.insert(id, record);
            }
        }
        dml(1)
    }

    fn param(params: &BTreeMap<String, Option<String>>, name: &str) -> String {
        params.get(name).cloned().flatten().unwrap_or_default()
    }

    fn param_ts(params: &BTreeMap<String, Option<String>>, name: &str) -> DateTime<Utc> {
        parse_timestamp(&Self::param(params, name)).unwrap_or_default()
    }

    fn limit(params: &BTreeMap<String, Option<String>>) -> usize {
        Self::param(params, "limit").parse().unwrap_or(usize::MAX)
    }

    fn by_key(&self, params: &BTreeMap<String, Option<String>>) -> ScriptedReply {
        let id = Self::param(params, "message_id");
        let rows = self
            .messages
            .get(&id)
            .filter(|r| r.get("role").and_then(Value::as_str) == Some("system"))
            .cloned()
            .into_iter()
            .collect();
        result(rows)
    }

    /// Aggregate conversation rows into derived chat rows.
    fn derive<'a>(rows: impl Iterator<Item = &'a Record>) -> Vec<(String, Record)> {
        let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for row in rows {
            if let Some(session) = text(row, "session_id") {
                groups.entry(session).or_default().push(row);
            }
        }
        groups
            .into_iter()
            .map(|(session, mut members)| {
                members.sort_by_key(|r| (timestamp(r, "created_at"), text(r, "message_id")));
                let created = timestamp(members[0], "created_at");
                let updated = timestamp(members[members.len() - 1], "created_at");
                let title = members
                    .iter()
                    .find(|r| r.get("role").and_then(Value::as_str) == Some("user"))
                    .and_then(|r| r.get("content").cloned())
                    .unwrap_or(Value::Null);
                let user = members
                    .iter()
                    .find_map(|r| owner(r))
                    .map(Value::String)
                    .unwrap_or(Value::Null);
                let record = Record::from([
                    ("chat_id".to_string(), json!(session)),
                    ("user_id".to_string(), user),
                    ("created_at".to_string(), json!(epoch_seconds(created))),
                    ("updated_at".to_string(), json!(epoch_seconds(updated))),
                    ("title".to_string(), title),
                ]);
                (session, record)
            })
            .collect()
    }

    fn messages_of<'a>(&'a self, chat_id: &'a str, live_only: bool) -> Vec<&'a Record> {
        let mut rows: Vec<&Record> = self
            .messages
            .values()
            .filter(|r| text(r, "session_id").as_deref() == Some(chat_id))
            .filter(|r| is_conversation(r))
            .filter(|r| !live_only || !is_deleted(r))
            .collect();
        rows.sort_by_key(|r| (timestamp(r, "created_at"), text(r, "message_id")));
        rows
    }

    fn retain_counting<F: Fn(&Record) -> bool>(&mut self, remove: F) -> usize {
        let before = self.messages.len();
        self.messages.retain(|_, r| !remove(r));
        before - self.messages.len()
    }

    /// Run a labelled statement. `live_only` is whether the statement
    /// filters out soft-deleted rows; only the narrow reads consult it.
    fn dispatch(
        &mut self,
        operation: &str,
        params: &BTreeMap<String, Option<String>>,
        live_only: bool,
    ) -> ScriptedReply {
        match operation {
            "get_chat_by_id" | "get_provider_session" | "get_user_by_id" => self.by_key(params),

            "derive_chat" => {
                let chat_id = Self::param(params, "chat_id");
                let rows = Self::derive(self.messages_of(&chat_id, true).into_iter())
                    .into_iter()
                    .map(|(_, r)| r)
                    .collect();
                result(rows)
            }

            "get_chats_by_user_id" => {
                let user = Self::param(params, "user_id");
                let mut rows: Vec<&Record> = self
                    .messages
                    .values()
                    .filter(|r| is_chat_meta(r) && owner(r).as_deref() == Some(user.as_str()))
                    .filter(|r| {
                        past_anchor(
                            params,
                            timestamp(r, "created_at"),
                            &text(r, "session_id").unwrap_or_default(),
                        )
                    })
                    .collect();
                rows.sort_by_key(|r| (timestamp(r, "created_at"), text(r, "session_id")));
                rows.reverse();
                result(rows.into_iter().take(Self::limit(params)).cloned().collect())
            }

            "derive_chats_by_user_id" => {
                let user = Self::param(params, "user_id");
                let with_meta: BTreeSet<String> = self
                    .messages
                    .values()
                    .filter(|r| is_chat_meta(r))
                    .filter_map(|r| text(r, "session_id"))
                    .collect();
                let candidates = self.messages.values().filter(|r| {
                    is_conversation(r)
                        && !is_deleted(r)
                        && text(r, "user_id").as_deref() == Some(user.as_str())
                        && text(r, "session_id").is_some_and(|s| !with_meta.contains(&s))
                });
                let mut derived: Vec<(DateTime<Utc>, String, Record)> = Self::derive(candidates)
                    .into_iter()
                    .map(|(session, record)| {
                        let created = record
                            .get("created_at")
                            .and_then(Value::as_str)
                            .and_then(parse_timestamp)
                            .unwrap_or_default();
                        (created, session, record)
                    })
                    .filter(|(created, session, _)| past_anchor(params, *created, session))
                    .collect();
                derived.sort_by(|a, b| (b.0, &b.1).cmp(&(a.0, &a.1)));
                result(
                    derived
                        .into_iter()
                        .take(Self::limit(params))
                        .map(|(_, _, r)| r)
                        .collect(),
                )
            }

            "delete_chat_by_id" => {
                let chat_id = Self::param(params, "chat_id");
                let chat_key = Self::param(params, "chat_key");
                let prefix = Self::param(params, "provider_prefix");
                let deleted = self.retain_counting(|r| {
                    let id = text(r, "message_id").unwrap_or_default();
                    text(r, "session_id").as_deref() == Some(chat_id.as_str())
                        || id == chat_key
                        || id.starts_with(&prefix)
                });
                dml(deleted)
            }

            "list_chat_ids" => {
                let user = Self::param(params, "user_id");
                let ids: BTreeSet<String> = self
                    .messages
                    .values()
                    .filter(|r| owner(r).as_deref() == Some(user.as_str()))
                    .filter_map(|r| text(r, "session_id"))
                    .filter(|s| !s.starts_with("__meta__"))
                    .collect();
                result(
                    ids.into_iter()
                        .map(|id| Record::from([("chat_id".to_string(), json!(id))]))
                        .collect(),
                )
            }

            "propagate_visibility" => {
                let chat_id = Self::param(params, "chat_id");
                let visibility = Self::param(params, "visibility");
                let mut touched = 0;
                for record in self.messages.values_mut() {
                    if text(record, "session_id").as_deref() == Some(chat_id.as_str())
                        && is_conversation(record)
                    {
                        record.insert("visibility".to_string(), json!(visibility));
                        touched += 1;
                    }
                }
                dml(touched)
            }

            "get_messages_by_chat_id" => {
                let chat_id = Self::param(params, "chat_id");
                result(self.messages_of(&chat_id, true).into_iter().cloned().collect())
            }

            "get_messages_by_chat_id_narrow" => {
                let chat_id = Self::param(params, "chat_id");
                result(
                    self.messages_of(&chat_id, live_only)
                        .into_iter()
                        .map(|r| project(r, &NARROW))
                        .collect(),
                )
            }

            "get_message_by_id" | "get_message_by_id_narrow" => {
                let id = Self::param(params, "message_id");
                let narrow = operation.ends_with("_narrow");
                let rows = self
                    .messages
                    .get(&id)
                    .filter(|r| is_conversation(r) && (!live_only || !is_deleted(r)))
                    .map(|r| if narrow { project(r, &NARROW) } else { r.clone() })
                    .into_iter()
                    .collect();
                result(rows)
            }

            "soft_delete_messages" | "hard_delete_messages" => {
                let chat_id = Self::param(params, "chat_id");
                let after = Self::param_ts(params, "after");
                let hit = |r: &Record| {
                    text(r, "session_id").as_deref() == Some(chat_id.as_str())
                        && is_conversation(r)
                        && timestamp(r, "created_at") >= after
                };
                if operation == "hard_delete_messages" {
                    return dml(self.retain_counting(hit));
                }
                let mut touched = 0;
                for record in self.messages.values_mut() {
                    if hit(&*record) && !is_deleted(record) {
                        record.insert("is_deleted".to_string(), json!("true"));
                        touched += 1;
                    }
                }
                dml(touched)
            }

            "count_messages" => {
                let user = Self::param(params, "user_id");
                let since = Self::param_ts(params, "since");
                let n = self
                    .messages
                    .values()
                    .filter(|r| {
                        r.get("role").and_then(Value::as_str) == Some("user")
                            && text(r, "user_id").as_deref() == Some(user.as_str())
                            && !text(r, "session_id").unwrap_or_default().starts_with("__meta__")
                            && !is_deleted(r)
                            && timestamp(r, "created_at") >= since
                    })
                    .count();
                result(vec![Record::from([("n".to_string(), json!(n.to_string()))])])
            }

            "get_provider_sessions_by_chat_id" => {
                let prefix = Self::param(params, "prefix");
                let rows = self
                    .messages
                    .values()
                    .filter(|r| text(r, "message_id").is_some_and(|id| id.starts_with(&prefix)))
                    .cloned()
                    .collect();
                result(rows)
            }

            "get_documents_by_id" | "get_document_by_id" => {
                let prefix = Self::param(params, "prefix");
                let mut rows: Vec<&Record> = self
                    .messages
                    .values()
                    .filter(|r| text(r, "session_id").as_deref() == Some("__meta__documents"))
                    .filter(|r| text(r, "message_id").is_some_and(|id| id.starts_with(&prefix)))
                    .collect();
                rows.sort_by_key(|r| (timestamp(r, "created_at"), text(r, "message_id")));
                if operation == "get_document_by_id" {
                    rows.reverse();
                    rows.truncate(1);
                }
                result(rows.into_iter().cloned().collect())
            }

            "delete_documents_after" => {
                let prefix = Self::param(params, "prefix");
                let after = Self::param_ts(params, "after");
                let deleted = self.retain_counting(|r| {
                    text(r, "message_id").is_some_and(|id| id.starts_with(&prefix))
                        && timestamp(r, "created_at") > after
                });
                dml(deleted)
            }

            "get_user_by_email" => {
                let email = Self::param(params, "email").to_lowercase();
                let mut rows: Vec<&Record> = self
                    .messages
                    .values()
                    .filter(|r| text(r, "session_id").as_deref() == Some("__meta__users"))
                    .filter(|r| text(r, "content").map(|c| c.to_lowercase()) == Some(email.clone()))
                    .collect();
                rows.sort_by_key(|r| timestamp(r, "created_at"));
                result(rows.into_iter().take(1).cloned().collect())
            }

            "get_files_by_chat_id" => {
                let chat_id = Self::param(params, "chat_id");
                let mut rows: Vec<&Record> = self
                    .files
                    .values()
                    .filter(|r| text(r, "chat_id").as_deref() == Some(chat_id.as_str()))
                    .filter(|r| !is_deleted(r))
                    .collect();
                rows.sort_by_key(|r| (timestamp(r, "created_at"), text(r, "file_id")));
                result(
                    rows.into_iter()
                        .map(|r| {
                            let mut r = r.clone();
                            r.remove("is_deleted");
                            r
                        })
                        .collect(),
                )
            }

            "delete_files_by_chat_id" => {
                let chat_id = Self::param(params, "chat_id");
                let before = self.files.len();
                self.files
                    .retain(|_, r| text(r, "chat_id").as_deref() != Some(chat_id.as_str()));
                dml(before - self.files.len())
            }

            other => ScriptedReply::invalid_query(&format!("fake cannot run operation {:?}", other)),
        }
    }
}

/// A store wired to a fake warehouse.
pub struct Harness {
    pub store: ChatStore,
    pub fake: Arc<FakeWarehouse>,
    pub transport: Arc<ScriptedTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeWarehouse::new(), StoreConfig::default())
    }

    pub fn with(fake: Arc<FakeWarehouse>, config: StoreConfig) -> Self {
        let handler_fake = fake.clone();
        let transport = Arc::new(ScriptedTransport::with_handler(move |path, body| {
            handler_fake.handle(path, body)
        }));
        let warehouse = WarehouseConfig::new("proj").with_retry(RetryConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
        });
        let client = WarehouseClient::with_transport(warehouse, transport.clone());
        let store = ChatStore::new(Arc::new(client), config).expect("valid store config");
        Self {
            store,
            fake,
            transport,
        }
    }

    /// Queries sent with the given `statement` label.
    pub fn statements(&self, statement: &str) -> Vec<String> {
        self.transport
            .requests()
            .iter()
            .filter(|r| {
                r.body
                    .get("labels")
                    .and_then(|l| l.get("statement"))
                    .and_then(Value::as_str)
                    == Some(statement)
            })
            .filter_map(|r| r.query().map(str::to_string))
            .collect()
    }

    /// Operations sent, in order.
    pub fn operations(&self) -> Vec<String> {
        self.transport
            .requests()
            .iter()
            .filter_map(|r| r.operation().map(str::to_string))
            .collect()
    }
}

/// RFC 3339 timestamp `secs` seconds after 2024-01-01T00:00:00Z.
pub fn at(secs: i64) -> String {
    let base = DateTime::<Utc>::from_timestamp(1_704_067_200 + secs, 0).unwrap_or_default();
    format_timestamp(base)
}
