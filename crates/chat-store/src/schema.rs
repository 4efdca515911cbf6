//! Upserts against a live table whose optional columns and temporal column
//! types are not known ahead of time.
//!
//! A capability probe of `INFORMATION_SCHEMA.COLUMNS` seeds the state before
//! the first write and is refreshed after `schema_probe_ttl`. Between probes
//! the negotiator reacts to error text: unknown optional columns are dropped
//! from the statement, and temporal type mismatches switch the cast mode.
//! When no cast mode is accepted the row is written with an existence check
//! followed by a streaming insert.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use regex::Regex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warehouse_client::{InsertRow, QueryParameter, QueryRequest, WarehouseClient, WarehouseError};

use crate::codec::format_timestamp;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::row::{Column, ColumnValue, PhysicalRow};

/// Upper bound on statements issued for one upsert before falling back.
const MAX_NEGOTIATION_STEPS: usize = Column::ALL.len() + CastMode::ALL.len() + 1;

/// Columns of the file metadata table.
pub(crate) const FILE_COLUMNS: [(&str, &str); 10] = [
    ("file_id", "STRING NOT NULL"),
    ("chat_id", "STRING"),
    ("user_id", "STRING"),
    ("message_id", "STRING"),
    ("name", "STRING"),
    ("content_type", "STRING"),
    ("size_bytes", "INT64"),
    ("url", "STRING"),
    ("created_at", "TIMESTAMP"),
    ("is_deleted", "BOOL"),
];

static UNKNOWN_COLUMN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)unrecognized name:\s*`?(\w+)`?",
        r"(?i)\bname\s+`?(\w+)`?\s+not found",
        r"(?i)\bcolumn\s+`?(\w+)`?\s+is not present",
        r"(?i)no such field:\s*`?(\w+)`?",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static COLUMN_TYPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:column|to)\s+`?(?:\w+\.)?(\w+)`?,?\s+which has type\s+(\w+)").ok()
});

static TYPE_MISMATCH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)no matching signature|cannot be (?:assigned|inserted)|could not cast|invalid timestamp|which has type",
    )
    .ok()
});

/// Which temporal parameters are wrapped in `TIMESTAMP(...)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CastMode {
    #[default]
    None,
    CreatedAt,
    UpdatedAt,
    Both,
}

impl CastMode {
    pub const ALL: [CastMode; 4] = [
        CastMode::None,
        CastMode::CreatedAt,
        CastMode::UpdatedAt,
        CastMode::Both,
    ];

    pub fn from_flags(created_at: bool, updated_at: bool) -> Self {
        match (created_at, updated_at) {
            (false, false) => CastMode::None,
            (true, false) => CastMode::CreatedAt,
            (false, true) => CastMode::UpdatedAt,
            (true, true) => CastMode::Both,
        }
    }

    pub fn casts(&self, column: Column) -> bool {
        match column {
            Column::CreatedAt => matches!(self, CastMode::CreatedAt | CastMode::Both),
            Column::UpdatedAt => matches!(self, CastMode::UpdatedAt | CastMode::Both),
            _ => false,
        }
    }

    /// Number of temporal columns cast differently from `other`.
    fn distance(&self, other: CastMode) -> usize {
        [Column::CreatedAt, Column::UpdatedAt]
            .into_iter()
            .filter(|c| self.casts(*c) != other.casts(*c))
            .count()
    }
}

impl fmt::Display for CastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastMode::None => "none",
            CastMode::CreatedAt => "created_at",
            CastMode::UpdatedAt => "updated_at",
            CastMode::Both => "both",
        };
        f.write_str(name)
    }
}

/// A write failure that negotiation can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    /// The table has no column with this name.
    UnknownColumn(String),
    /// A temporal column has the other type. Maps each column named in the
    /// error to whether it needs a `TIMESTAMP` value.
    TemporalMismatch(BTreeMap<Column, bool>),
}

/// Extract a schema issue from a query failure.
pub fn classify_schema_error(err: &WarehouseError) -> Option<SchemaIssue> {
    if err.is_retryable() {
        return None;
    }
    let message = err.service_message()?;

    for pattern in UNKNOWN_COLUMN.iter() {
        if let Some(name) = pattern.captures(message).and_then(|c| c.get(1)) {
            return Some(SchemaIssue::UnknownColumn(name.as_str().to_string()));
        }
    }

    let hints = temporal_hints(message);
    let mentions_timestamp = message.to_ascii_uppercase().contains("TIMESTAMP");
    let mismatch = TYPE_MISMATCH
        .as_ref()
        .is_some_and(|re| re.is_match(message));
    if !hints.is_empty() || (mismatch && mentions_timestamp) {
        return Some(SchemaIssue::TemporalMismatch(hints));
    }
    None
}

/// The messages-table column an error reports as missing.
pub fn unknown_column(err: &WarehouseError) -> Option<Column> {
    match classify_schema_error(err)? {
        SchemaIssue::UnknownColumn(name) => Column::from_name(&name),
        SchemaIssue::TemporalMismatch(_) => None,
    }
}

fn temporal_hints(message: &str) -> BTreeMap<Column, bool> {
    let Some(re) = COLUMN_TYPE.as_ref() else {
        return BTreeMap::new();
    };
    re.captures_iter(message)
        .filter_map(|caps| {
            let column = Column::from_name(caps.get(1)?.as_str())?;
            let needs_timestamp = caps.get(2)?.as_str().eq_ignore_ascii_case("TIMESTAMP");
            column.is_temporal().then_some((column, needs_timestamp))
        })
        .collect()
}

/// Untried modes, best fit first. Fit counts agreeing hints minus
/// disagreeing ones; ties go to the mode closest to `current`.
pub fn rank_modes(
    current: CastMode,
    hints: &BTreeMap<Column, bool>,
    tried: &[CastMode],
) -> Vec<CastMode> {
    let fit = |mode: CastMode| -> i32 {
        hints
            .iter()
            .map(|(column, needs)| if mode.casts(*column) == *needs { 1 } else { -1 })
            .sum()
    };

    let mut modes: Vec<CastMode> = CastMode::ALL
        .into_iter()
        .filter(|m| !tried.contains(m))
        .collect();
    modes.sort_by_key(|m| (-fit(*m), m.distance(current)));
    modes
}

fn param_expr(column: Column, mode: CastMode) -> String {
    if mode.casts(column) {
        format!("TIMESTAMP(@{})", column)
    } else {
        format!("@{}", column)
    }
}

fn bind(column: Column, value: ColumnValue) -> QueryParameter {
    match value {
        ColumnValue::Text(text) => QueryParameter::nullable_string(column.name(), text.as_deref()),
        ColumnValue::Timestamp(ts) => QueryParameter::string(column.name(), format_timestamp(ts)),
        ColumnValue::Bool(flag) => QueryParameter::bool(column.name(), flag),
    }
}

/// MERGE on `message_id` writing every column not in `disabled`.
///
/// A matched row keeps its `created_at`.
pub fn build_merge(
    table: &str,
    row: &PhysicalRow,
    mode: CastMode,
    disabled: &BTreeSet<Column>,
) -> QueryRequest {
    let columns: Vec<Column> = Column::ALL
        .into_iter()
        .filter(|c| !disabled.contains(c))
        .collect();

    let select = columns
        .iter()
        .map(|c| format!("{} AS {}", param_expr(*c, mode), c))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| !matches!(c, Column::MessageId | Column::CreatedAt))
        .map(|c| format!("{0} = S.{0}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let names = columns
        .iter()
        .map(Column::name)
        .collect::<Vec<_>>()
        .join(", ");
    let values = columns
        .iter()
        .map(|c| format!("S.{}", c))
        .collect::<Vec<_>>()
        .join(", ");

    let query = format!(
        r#"MERGE {table} T
USING (SELECT {select}) S
ON T.message_id = S.message_id
WHEN MATCHED THEN UPDATE SET {updates}
WHEN NOT MATCHED THEN INSERT ({names}) VALUES ({values})"#
    );

    QueryRequest::new(query)
        .params(columns.iter().map(|c| bind(*c, row.value(*c))))
        .label("statement", "merge")
}

/// How an upsert reached the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Merged,
    Inserted,
    /// Fallback path found the row already written and left it alone.
    AlreadyPresent,
}

/// Current negotiation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub cast_mode: CastMode,
    pub disabled: BTreeSet<Column>,
}

#[derive(Debug, Default)]
struct NegotiationState {
    cast_mode: CastMode,
    disabled: BTreeSet<Column>,
    probed_at: Option<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Adaptive writer for the messages table. One per store instance.
pub struct SchemaNegotiator {
    client: Arc<WarehouseClient>,
    config: StoreConfig,
    state: Mutex<NegotiationState>,
    tables_ready: OnceCell<()>,
}

impl SchemaNegotiator {
    pub fn new(client: Arc<WarehouseClient>, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::new(NegotiationState::default()),
            tables_ready: OnceCell::new(),
        }
    }

    pub fn snapshot(&self) -> SchemaSnapshot {
        let state = lock(&self.state);
        SchemaSnapshot {
            cast_mode: state.cast_mode,
            disabled: state.disabled.clone(),
        }
    }

    pub fn is_disabled(&self, column: Column) -> bool {
        lock(&self.state).disabled.contains(&column)
    }

    /// Create both tables if missing. Runs once per negotiator; concurrent
    /// callers share one attempt and a failed attempt is retried by the next
    /// caller.
    pub async fn ensure_tables(&self) -> Result<()> {
        self.tables_ready
            .get_or_try_init(|| async {
                let messages = Column::ALL
                    .iter()
                    .map(|c| {
                        let not_null = if *c == Column::MessageId { " NOT NULL" } else { "" };
                        format!("  {} {}{}", c, c.ddl_type(), not_null)
                    })
                    .collect::<Vec<_>>()
                    .join(",\n");
                let files = FILE_COLUMNS
                    .iter()
                    .map(|(name, ty)| format!("  {} {}", name, ty))
                    .collect::<Vec<_>>()
                    .join(",\n");

                for (table, columns) in [
                    (self.config.messages_ref(), messages),
                    (self.config.files_ref(), files),
                ] {
                    let ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", table, columns);
                    self.client
                        .query(
                            QueryRequest::new(ddl)
                                .operation("ensure_tables")
                                .label("statement", "ddl"),
                        )
                        .await?;
                }

                info!("Tables ensured in dataset {}", self.config.dataset);
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Read the live column list and reset the state from it.
    ///
    /// Returns `None` when the table is not visible (missing, or no access
    /// to its metadata); the state is left unchanged in that case.
    pub async fn probe(&self) -> Result<Option<SchemaSnapshot>> {
        let request = QueryRequest::new(format!(
            r#"SELECT column_name, data_type
FROM `{}`.INFORMATION_SCHEMA.COLUMNS
WHERE table_name = @table_name"#,
            self.config.dataset
        ))
        .param(QueryParameter::string("table_name", &self.config.messages_table))
        .operation("schema_probe")
        .label("statement", "probe");

        let result = self.client.query(request).await?;

        let live: BTreeMap<Column, String> = result
            .rows
            .iter()
            .filter_map(|row| {
                let column = Column::from_name(row.get_str("column_name")?)?;
                let ty = row.get_str("data_type").unwrap_or_default().to_ascii_uppercase();
                Some((column, ty))
            })
            .collect();

        let mut state = lock(&self.state);
        state.probed_at = Some(Instant::now());

        if live.is_empty() {
            debug!("Schema probe saw no columns for {}", self.config.messages_ref());
            return Ok(None);
        }

        for column in Column::ALL.iter().filter(|c| !c.is_mergeable()) {
            if !live.contains_key(column) {
                warn!(
                    "Required column {} missing from {}",
                    column,
                    self.config.messages_ref()
                );
            }
        }

        let is_timestamp = |c: Column| live.get(&c).is_some_and(|ty| ty == "TIMESTAMP");
        state.cast_mode =
            CastMode::from_flags(is_timestamp(Column::CreatedAt), is_timestamp(Column::UpdatedAt));
        state.disabled = Column::ALL
            .into_iter()
            .filter(|c| c.is_mergeable() && !live.contains_key(c))
            .collect();

        info!(
            "Schema probe: cast mode {}, {} optional column(s) disabled",
            state.cast_mode,
            state.disabled.len()
        );

        Ok(Some(SchemaSnapshot {
            cast_mode: state.cast_mode,
            disabled: state.disabled.clone(),
        }))
    }

    /// Returns true if this caller should run the probe now.
    fn claim_probe(&self) -> bool {
        if !self.config.probe_schema {
            return false;
        }
        let now = Instant::now();
        let mut state = lock(&self.state);
        match state.probed_at {
            Some(at) if now.duration_since(at) < self.config.schema_probe_ttl => false,
            _ => {
                state.probed_at = Some(now);
                true
            }
        }
    }

    /// Mark an optional column as missing. Returns false if it already was.
    pub fn disable(&self, column: Column) -> bool {
        column.is_mergeable() && lock(&self.state).disabled.insert(column)
    }

    /// Disable the optional column `err` reports as missing. Returns the
    /// column when this is news.
    pub fn learn_from(&self, err: &WarehouseError) -> Option<Column> {
        let column = unknown_column(err)?;
        if !self.disable(column) {
            return None;
        }
        warn!(
            "Column {} is not in {}, leaving it out",
            column,
            self.config.messages_ref()
        );
        Some(column)
    }

    /// Create tables when configured, and refresh the capability probe when
    /// it is stale. Called before the first statement on the table.
    pub(crate) async fn prepare(&self) -> Result<()> {
        if self.config.auto_create_tables {
            self.ensure_tables().await?;
        }
        if self.claim_probe() {
            if let Err(err) = self.probe().await {
                warn!("Schema probe failed, negotiating reactively: {}", err);
            }
        }
        Ok(())
    }

    fn commit(&self, mode: Option<CastMode>, disabled: &BTreeSet<Column>) {
        let mut state = lock(&self.state);
        if let Some(mode) = mode {
            if state.cast_mode != mode {
                info!("Temporal cast mode is now {}", mode);
                state.cast_mode = mode;
            }
        }
        state.disabled.extend(disabled.iter().copied());
    }

    /// Insert or update `row` by `message_id`.
    pub async fn upsert(&self, row: &PhysicalRow, operation: &str) -> Result<WriteOutcome> {
        self.prepare().await?;

        let SchemaSnapshot {
            cast_mode: mut mode,
            mut disabled,
        } = self.snapshot();
        let mut tried: Vec<CastMode> = Vec::new();
        let mut hints: BTreeMap<Column, bool> = BTreeMap::new();
        let table = self.config.messages_ref();

        for _ in 0..MAX_NEGOTIATION_STEPS {
            let request = build_merge(&table, row, mode, &disabled).operation(operation);
            let err = match self.client.query(request).await {
                Ok(_) => {
                    self.commit(Some(mode), &disabled);
                    return Ok(WriteOutcome::Merged);
                }
                Err(err) => err,
            };

            match classify_schema_error(&err) {
                Some(SchemaIssue::UnknownColumn(name)) => match Column::from_name(&name) {
                    Some(column) if column.is_mergeable() && disabled.insert(column) => {
                        warn!("Column {} is not in {}, writing without it", column, table);
                    }
                    _ => {
                        return Err(StoreError::SchemaMismatch(format!(
                            "column {} is required but not present in {}",
                            name, table
                        )));
                    }
                },
                Some(SchemaIssue::TemporalMismatch(found)) => {
                    hints.extend(found);
                    tried.push(mode);
                    match rank_modes(mode, &hints, &tried).first() {
                        Some(next) => {
                            debug!("Cast mode {} rejected, trying {}", mode, next);
                            mode = *next;
                        }
                        None => break,
                    }
                }
                None => return Err(err.into()),
            }
        }

        warn!(
            "No cast mode accepted by {}, inserting {} if absent",
            table, row.message_id
        );
        self.insert_if_absent(row, &disabled, operation).await
    }

    /// Existence check, then a streaming insert keyed by `message_id`.
    async fn insert_if_absent(
        &self,
        row: &PhysicalRow,
        disabled: &BTreeSet<Column>,
        operation: &str,
    ) -> Result<WriteOutcome> {
        let exists = QueryRequest::new(format!(
            "SELECT COUNT(1) AS n FROM {} WHERE message_id = @message_id",
            self.config.messages_ref()
        ))
        .param(QueryParameter::string("message_id", &row.message_id))
        .operation(operation)
        .label("statement", "exists");

        let found = self
            .client
            .query(exists)
            .await
            .map_err(fallback_error)?
            .first()
            .and_then(|r| r.get_i64("n"))
            .unwrap_or(0);

        if found > 0 {
            warn!(
                "Row {} already exists, update skipped on fallback path",
                row.message_id
            );
            return Ok(WriteOutcome::AlreadyPresent);
        }

        self.client
            .insert_all(
                &self.config.dataset,
                &self.config.messages_table,
                vec![InsertRow::new(
                    row.message_id.clone(),
                    row.to_insert_json(disabled),
                )],
            )
            .await
            .map_err(fallback_error)?;

        self.commit(None, disabled);
        Ok(WriteOutcome::Inserted)
    }
}

fn fallback_error(err: WarehouseError) -> StoreError {
    if err.is_retryable() {
        StoreError::Warehouse(err)
    } else {
        StoreError::SchemaMismatch(format!("insert-if-absent fallback failed: {}", err))
    }
}

impl fmt::Debug for SchemaNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaNegotiator")
            .field("table", &self.config.messages_ref())
            .field("state", &*lock(&self.state))
            .finish()
    }
}
