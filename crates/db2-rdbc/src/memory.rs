//! In-memory DB2-flavored engine
//!
//! Implements [`Connection`] and [`ConnectionFactory`] over an in-process
//! table store for tests and local development, the same role the memory
//! checkpoint store plays for offset tracking.
//!
//! The engine understands the statement shapes a DB2 connector emits:
//! catalog lookups against `SYSCAT.TABLES` / `SYSCAT.COLUMNS`,
//! `CREATE TABLE` with identity and default columns,
//! `CREATE OR REPLACE TRIGGER ... AFTER {INSERT|UPDATE|DELETE}`,
//! keyset `SELECT ... FETCH FIRST n ROWS ONLY`, and parameterized DML.
//! Row-level triggers fire on DML exactly like the real database, which is
//! what makes trigger-based change capture testable without a server.
//!
//! Transactions are not isolated: statements apply immediately and
//! `commit`/`rollback` are acknowledgements only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::{Connection, ConnectionFactory, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Column definition inside the engine's catalog.
#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    type_name: String,
    length: Option<u32>,
    key_seq: Option<u32>,
    identity: bool,
    default_now: bool,
}

/// Table storage: catalog entry plus row data.
#[derive(Debug, Clone)]
struct TableData {
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
    next_identity: i64,
}

impl TableData {
    fn col_idx(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
enum TriggerExpr {
    /// Transition-variable column reference (`NEWROW.ID` / `OLDROW.ID`)
    Ref(String),
    /// Quoted string literal (`'INSERT'`)
    Lit(String),
}

/// A registered row-level trigger.
#[derive(Debug, Clone)]
struct TriggerDef {
    name: String,
    event: TriggerEvent,
    table: String,
    target: String,
    columns: Vec<String>,
    exprs: Vec<TriggerExpr>,
}

#[derive(Default)]
struct EngineInner {
    tables: HashMap<String, TableData>,
    triggers: Vec<TriggerDef>,
    fail_next_execute: Option<String>,
}

/// Shared in-memory engine.
///
/// Cloning is cheap; all clones and every connection opened from the
/// engine's factory observe the same tables and triggers.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<RwLock<EngineInner>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection onto this engine.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// A [`ConnectionFactory`] that ignores the connection string and opens
    /// handles onto this engine.
    pub fn factory(&self) -> MemoryConnectionFactory {
        MemoryConnectionFactory {
            engine: self.clone(),
        }
    }

    /// Make the next `execute` fail with the given message (test hook).
    pub async fn fail_next_execute(&self, msg: impl Into<String>) {
        self.inner.write().await.fail_next_execute = Some(msg.into());
    }

    /// Number of rows currently stored in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        self.inner
            .read()
            .await
            .tables
            .get(&table.to_uppercase())
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Names of tables known to the engine.
    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of triggers registered on `table`.
    pub async fn trigger_names(&self, table: &str) -> Vec<String> {
        let table = table.to_uppercase();
        self.inner
            .read()
            .await
            .triggers
            .iter()
            .filter(|t| t.table == table)
            .map(|t| t.name.clone())
            .collect()
    }
}

/// Connection handle onto a [`MemoryEngine`].
pub struct MemoryConnection {
    inner: Arc<RwLock<EngineInner>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_open()?;
        let mut inner = self.inner.write().await;
        Ok(run_statement(&mut inner, sql, params)?.rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_open()?;
        let mut inner = self.inner.write().await;
        if let Some(msg) = inner.fail_next_execute.take() {
            return Err(Error::query(msg));
        }
        Ok(run_statement(&mut inner, sql, params)?.affected)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.check_open()?;
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transaction over a [`MemoryConnection`]; statements apply immediately.
pub struct MemoryTransaction {
    inner: Arc<RwLock<EngineInner>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut inner = self.inner.write().await;
        Ok(run_statement(&mut inner, sql, params)?.rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut inner = self.inner.write().await;
        if let Some(msg) = inner.fail_next_execute.take() {
            return Err(Error::query(msg));
        }
        Ok(run_statement(&mut inner, sql, params)?.affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Factory opening connections onto one shared engine.
pub struct MemoryConnectionFactory {
    engine: MemoryEngine,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self, _conn_str: &str) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.engine.connect()))
    }
}

// ============================================================================
// Statement execution
// ============================================================================

struct StatementOutcome {
    rows: Vec<Row>,
    affected: u64,
}

impl StatementOutcome {
    fn rows(rows: Vec<Row>) -> Self {
        Self { rows, affected: 0 }
    }

    fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

fn run_statement(
    inner: &mut EngineInner,
    sql: &str,
    params: &[Value],
) -> Result<StatementOutcome> {
    let sql = sql.trim();
    let upper = sql.to_uppercase();

    if upper.starts_with("SELECT") {
        run_select(inner, sql, params)
    } else if upper.starts_with("INSERT INTO") {
        run_insert(inner, sql, params)
    } else if upper.starts_with("UPDATE") {
        run_update(inner, sql, params)
    } else if upper.starts_with("DELETE FROM") {
        run_delete(inner, sql, params)
    } else if upper.starts_with("CREATE OR REPLACE TRIGGER") || upper.starts_with("CREATE TRIGGER")
    {
        run_create_trigger(inner, sql)
    } else if upper.starts_with("CREATE TABLE") {
        run_create_table(inner, sql)
    } else {
        Err(Error::query(format!(
            "SQL0104N unsupported statement. SQLSTATE=42601: {}",
            sql
        )))
    }
}

fn undefined_table(name: &str) -> Error {
    Error::query(format!(
        "SQL0204N \"{}\" is an undefined name. SQLSTATE=42704",
        name
    ))
}

fn undefined_column(name: &str) -> Error {
    Error::query(format!(
        "SQL0206N \"{}\" is not valid in the context where it is used. SQLSTATE=42703",
        name
    ))
}

// ----------------------------------------------------------------------------
// SELECT
// ----------------------------------------------------------------------------

fn run_select(inner: &mut EngineInner, sql: &str, params: &[Value]) -> Result<StatementOutcome> {
    let upper = sql.to_uppercase();

    // Catalog queries are synthesized from the engine's table definitions.
    if upper.contains("SYSCAT.COLUMNS") {
        return run_syscat_columns(inner, params);
    }
    if upper.contains("SYSCAT.TABLES") {
        return run_syscat_tables(inner, params);
    }

    let body = &sql[6..]; // after SELECT
    let from_pos = find_keyword(body, "FROM").ok_or_else(|| {
        Error::query("SQL0104N SELECT without FROM. SQLSTATE=42601".to_string())
    })?;
    let projection = body[..from_pos].trim().to_string();
    let mut rest = body[from_pos + 4..].trim();

    // table name runs until the next clause
    let table_end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let table_name = rest[..table_end].to_uppercase();
    rest = rest[table_end..].trim();

    let mut filter_col: Option<String> = None;
    let mut filter_val: Option<Value> = None;
    let mut order_col: Option<String> = None;
    let mut fetch_n: Option<usize> = None;
    let mut param_iter = params.iter();

    if let Some(pos) = find_keyword(rest, "WHERE") {
        let after = &rest[pos + 5..];
        let end = find_keyword(after, "ORDER BY")
            .or_else(|| find_keyword(after, "FETCH FIRST"))
            .unwrap_or(after.len());
        let cond = after[..end].trim();
        let (col, _op) = parse_gt_condition(cond)?;
        filter_col = Some(col);
        filter_val = Some(
            param_iter
                .next()
                .cloned()
                .ok_or_else(|| Error::query("missing parameter for WHERE clause"))?,
        );
        rest = &after[end..];
    }

    if let Some(pos) = find_keyword(rest, "ORDER BY") {
        let after = &rest[pos + 8..];
        let end = find_keyword(after, "FETCH FIRST").unwrap_or(after.len());
        order_col = Some(after[..end].trim().to_uppercase());
        rest = &after[end..];
    }

    if let Some(pos) = find_keyword(rest, "FETCH FIRST") {
        let after = &rest[pos + 11..];
        let digits: String = after.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        fetch_n = Some(
            digits
                .parse()
                .map_err(|_| Error::query("SQL0104N invalid FETCH FIRST count. SQLSTATE=42601"))?,
        );
    }

    // COUNT(*) projection
    if projection.to_uppercase().starts_with("COUNT(") {
        let count = inner
            .tables
            .get(&table_name)
            .map(|t| t.rows.len())
            .ok_or_else(|| undefined_table(&table_name))?;
        let row = Row::new(vec!["COUNT".into()], vec![Value::Int32(count as i32)]);
        return Ok(StatementOutcome::rows(vec![row]));
    }

    let table = inner
        .tables
        .get(&table_name)
        .ok_or_else(|| undefined_table(&table_name))?;

    let proj_cols: Vec<String> = if projection.trim() == "*" {
        table.column_names()
    } else {
        projection
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .collect()
    };

    let proj_idx: Vec<usize> = proj_cols
        .iter()
        .map(|c| table.col_idx(c).ok_or_else(|| undefined_column(c)))
        .collect::<Result<_>>()?;

    let mut selected: Vec<&Vec<Value>> = table
        .rows
        .iter()
        .filter(|row| match (&filter_col, &filter_val) {
            (Some(col), Some(val)) => {
                let idx = match table.col_idx(col) {
                    Some(i) => i,
                    None => return false,
                };
                matches!(
                    compare_values(&row[idx], val),
                    Some(std::cmp::Ordering::Greater)
                )
            }
            _ => true,
        })
        .collect();

    if let Some(col) = &order_col {
        let idx = table.col_idx(col).ok_or_else(|| undefined_column(col))?;
        selected.sort_by(|a, b| {
            compare_values(&a[idx], &b[idx]).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    if let Some(n) = fetch_n {
        selected.truncate(n);
    }

    let rows = selected
        .into_iter()
        .map(|row| {
            Row::new(
                proj_cols.clone(),
                proj_idx.iter().map(|&i| row[i].clone()).collect(),
            )
        })
        .collect();

    Ok(StatementOutcome::rows(rows))
}

fn run_syscat_columns(inner: &EngineInner, params: &[Value]) -> Result<StatementOutcome> {
    let table_name = params
        .first()
        .and_then(|v| v.as_string())
        .ok_or_else(|| Error::query("missing TABNAME parameter"))?
        .to_uppercase();

    let table = match inner.tables.get(&table_name) {
        Some(t) => t,
        None => return Ok(StatementOutcome::rows(Vec::new())),
    };

    let columns = vec![
        "COLNAME".to_string(),
        "TYPENAME".to_string(),
        "LENGTH".to_string(),
        "KEYSEQ".to_string(),
    ];

    let rows = table
        .columns
        .iter()
        .map(|c| {
            Row::new(
                columns.clone(),
                vec![
                    Value::String(c.name.clone()),
                    Value::String(c.type_name.clone()),
                    Value::Int32(c.length.unwrap_or(0) as i32),
                    c.key_seq.map(|k| Value::Int16(k as i16)).unwrap_or(Value::Null),
                ],
            )
        })
        .collect();

    Ok(StatementOutcome::rows(rows))
}

fn run_syscat_tables(inner: &EngineInner, params: &[Value]) -> Result<StatementOutcome> {
    let table_name = params
        .first()
        .and_then(|v| v.as_string())
        .ok_or_else(|| Error::query("missing TABNAME parameter"))?
        .to_uppercase();

    let count = i32::from(inner.tables.contains_key(&table_name));
    let row = Row::new(vec!["COUNT".into()], vec![Value::Int32(count)]);
    Ok(StatementOutcome::rows(vec![row]))
}

// ----------------------------------------------------------------------------
// INSERT / UPDATE / DELETE
// ----------------------------------------------------------------------------

fn run_insert(inner: &mut EngineInner, sql: &str, params: &[Value]) -> Result<StatementOutcome> {
    let body = sql["INSERT INTO".len()..].trim();
    let paren = body
        .find('(')
        .ok_or_else(|| Error::query("SQL0104N INSERT without column list. SQLSTATE=42601"))?;
    let table_name = body[..paren].trim().to_uppercase();

    let cols_end = matching_paren(body, paren)?;
    let columns: Vec<String> = split_top_level(&body[paren + 1..cols_end], ',')
        .into_iter()
        .map(|c| c.trim().to_uppercase())
        .collect();

    let after = body[cols_end + 1..].trim();
    let upper_after = after.to_uppercase();
    if !upper_after.starts_with("VALUES") {
        return Err(Error::query(
            "SQL0104N INSERT without VALUES. SQLSTATE=42601".to_string(),
        ));
    }
    let vals_part = after["VALUES".len()..].trim();
    let vparen = vals_part
        .find('(')
        .ok_or_else(|| Error::query("SQL0104N INSERT without VALUES list. SQLSTATE=42601"))?;
    let vend = matching_paren(vals_part, vparen)?;
    let exprs = split_top_level(&vals_part[vparen + 1..vend], ',');

    let mut param_iter = params.iter();
    let mut values = Vec::with_capacity(exprs.len());
    for expr in &exprs {
        let expr = expr.trim();
        if expr == "?" {
            values.push(
                param_iter
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::query("missing INSERT parameter"))?,
            );
        } else if expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2 {
            values.push(Value::String(expr[1..expr.len() - 1].to_string()));
        } else {
            return Err(Error::query(format!(
                "SQL0104N unsupported INSERT expression. SQLSTATE=42601: {}",
                expr
            )));
        }
    }

    apply_insert(inner, &table_name, &columns, values)?;
    Ok(StatementOutcome::affected(1))
}

/// Insert a row, filling identity/default columns, then fire insert triggers.
fn apply_insert(
    inner: &mut EngineInner,
    table_name: &str,
    columns: &[String],
    values: Vec<Value>,
) -> Result<()> {
    let table = inner
        .tables
        .get_mut(table_name)
        .ok_or_else(|| undefined_table(table_name))?;

    if columns.len() != values.len() {
        return Err(Error::query(
            "SQL0117N the number of values does not match the number of columns. SQLSTATE=42802"
                .to_string(),
        ));
    }

    let mut row: Vec<Value> = vec![Value::Null; table.columns.len()];
    for (col, value) in columns.iter().zip(values) {
        let idx = table.col_idx(col).ok_or_else(|| undefined_column(col))?;
        row[idx] = value;
    }

    for (idx, def) in table.columns.iter().enumerate() {
        if def.identity {
            let id = table.next_identity;
            table.next_identity += 1;
            row[idx] = if def.type_name == "BIGINT" {
                Value::Int64(id)
            } else {
                Value::Int32(id as i32)
            };
        } else if def.default_now && row[idx].is_null() {
            row[idx] = Value::DateTime(Utc::now().naive_utc());
        }
    }

    table.rows.push(row.clone());
    let row_map: HashMap<String, Value> = table
        .columns
        .iter()
        .map(|c| c.name.clone())
        .zip(row)
        .collect();

    fire_triggers(inner, TriggerEvent::Insert, table_name, &row_map)
}

fn run_update(inner: &mut EngineInner, sql: &str, params: &[Value]) -> Result<StatementOutcome> {
    let body = sql["UPDATE".len()..].trim();
    let set_pos = find_keyword(body, "SET")
        .ok_or_else(|| Error::query("SQL0104N UPDATE without SET. SQLSTATE=42601"))?;
    let table_name = body[..set_pos].trim().to_uppercase();
    let after_set = &body[set_pos + 3..];
    let where_pos = find_keyword(after_set, "WHERE");
    let set_clause = match where_pos {
        Some(p) => &after_set[..p],
        None => after_set,
    };

    let assignments: Vec<String> = split_top_level(set_clause, ',')
        .into_iter()
        .map(|a| a.trim().to_string())
        .collect();

    let mut param_iter = params.iter();
    let mut set_values: Vec<(String, Value)> = Vec::with_capacity(assignments.len());
    for assignment in &assignments {
        let (col, _) = parse_eq_lhs(assignment)?;
        set_values.push((
            col,
            param_iter
                .next()
                .cloned()
                .ok_or_else(|| Error::query("missing UPDATE parameter"))?,
        ));
    }

    let conditions = match where_pos {
        Some(p) => parse_eq_conditions(&after_set[p + 5..], &mut param_iter)?,
        None => Vec::new(),
    };

    let table = inner
        .tables
        .get_mut(&table_name)
        .ok_or_else(|| undefined_table(&table_name))?;

    let cond_idx: Vec<(usize, Value)> = conditions
        .iter()
        .map(|(col, val)| {
            table
                .col_idx(col)
                .map(|i| (i, val.clone()))
                .ok_or_else(|| undefined_column(col))
        })
        .collect::<Result<_>>()?;

    let set_idx: Vec<(usize, Value)> = set_values
        .iter()
        .map(|(col, val)| {
            table
                .col_idx(col)
                .map(|i| (i, val.clone()))
                .ok_or_else(|| undefined_column(col))
        })
        .collect::<Result<_>>()?;

    let mut updated_rows = Vec::new();
    for row in table.rows.iter_mut() {
        let matches = cond_idx
            .iter()
            .all(|(idx, val)| values_equal(&row[*idx], val));
        if matches {
            for (idx, val) in &set_idx {
                row[*idx] = val.clone();
            }
            updated_rows.push(row.clone());
        }
    }

    let affected = updated_rows.len() as u64;
    let col_names: Vec<String> = table.column_names();
    for row in updated_rows {
        let row_map: HashMap<String, Value> =
            col_names.iter().cloned().zip(row).collect();
        fire_triggers(inner, TriggerEvent::Update, &table_name, &row_map)?;
    }

    Ok(StatementOutcome::affected(affected))
}

fn run_delete(inner: &mut EngineInner, sql: &str, params: &[Value]) -> Result<StatementOutcome> {
    let body = sql["DELETE FROM".len()..].trim();
    let where_pos = find_keyword(body, "WHERE");
    let table_name = match where_pos {
        Some(p) => body[..p].trim().to_uppercase(),
        None => body.trim().to_uppercase(),
    };

    let mut param_iter = params.iter();
    enum DeleteFilter {
        All,
        Eq(Vec<(String, Value)>),
        In(String, Vec<Value>),
    }

    let filter = match where_pos {
        None => DeleteFilter::All,
        Some(p) => {
            let cond = body[p + 5..].trim();
            if let Some(in_pos) = find_keyword(cond, "IN") {
                let col = cond[..in_pos].trim().to_uppercase();
                let list = cond[in_pos + 2..].trim();
                let n_params = list.matches('?').count();
                let mut values = Vec::with_capacity(n_params);
                for _ in 0..n_params {
                    values.push(
                        param_iter
                            .next()
                            .cloned()
                            .ok_or_else(|| Error::query("missing DELETE parameter"))?,
                    );
                }
                DeleteFilter::In(col, values)
            } else {
                DeleteFilter::Eq(parse_eq_conditions(cond, &mut param_iter)?)
            }
        }
    };

    let table = inner
        .tables
        .get_mut(&table_name)
        .ok_or_else(|| undefined_table(&table_name))?;

    let col_names = table.column_names();
    let matches_row = |table: &TableData, row: &[Value]| -> Result<bool> {
        match &filter {
            DeleteFilter::All => Ok(true),
            DeleteFilter::Eq(conds) => {
                for (col, val) in conds {
                    let idx = table.col_idx(col).ok_or_else(|| undefined_column(col))?;
                    if !values_equal(&row[idx], val) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            DeleteFilter::In(col, vals) => {
                let idx = table.col_idx(col).ok_or_else(|| undefined_column(col))?;
                Ok(vals.iter().any(|v| values_equal(&row[idx], v)))
            }
        }
    };

    let mut kept = Vec::with_capacity(table.rows.len());
    let mut deleted = Vec::new();
    let rows = std::mem::take(&mut table.rows);
    for row in rows {
        if matches_row(table, &row)? {
            deleted.push(row);
        } else {
            kept.push(row);
        }
    }
    table.rows = kept;

    let affected = deleted.len() as u64;
    for row in deleted {
        let row_map: HashMap<String, Value> =
            col_names.iter().cloned().zip(row).collect();
        fire_triggers(inner, TriggerEvent::Delete, &table_name, &row_map)?;
    }

    Ok(StatementOutcome::affected(affected))
}

// ----------------------------------------------------------------------------
// CREATE TABLE / CREATE TRIGGER
// ----------------------------------------------------------------------------

fn run_create_table(inner: &mut EngineInner, sql: &str) -> Result<StatementOutcome> {
    let body = sql["CREATE TABLE".len()..].trim();
    let paren = body
        .find('(')
        .ok_or_else(|| Error::query("SQL0104N CREATE TABLE without columns. SQLSTATE=42601"))?;
    let table_name = body[..paren].trim().to_uppercase();
    let end = matching_paren(body, paren)?;
    let defs = split_top_level(&body[paren + 1..end], ',');

    if inner.tables.contains_key(&table_name) {
        return Err(Error::query(format!(
            "SQL0601N the name of the object to be created is identical to the existing name \"{}\". SQLSTATE=42710",
            table_name
        )));
    }

    let mut columns: Vec<ColumnDef> = Vec::new();
    let mut pk_constraint: Vec<String> = Vec::new();

    for def in defs {
        let def = def.trim();
        let upper = def.to_uppercase();
        if upper.starts_with("PRIMARY KEY") {
            let p = def.find('(').ok_or_else(|| {
                Error::query("SQL0104N malformed PRIMARY KEY constraint. SQLSTATE=42601")
            })?;
            let e = matching_paren(def, p)?;
            pk_constraint = split_top_level(&def[p + 1..e], ',')
                .into_iter()
                .map(|c| c.trim().to_uppercase())
                .collect();
            continue;
        }

        columns.push(parse_column_def(def)?);
    }

    for (seq, pk) in pk_constraint.iter().enumerate() {
        let col = columns
            .iter_mut()
            .find(|c| c.name == *pk)
            .ok_or_else(|| undefined_column(pk))?;
        col.key_seq = Some(seq as u32 + 1);
    }

    debug!("created table {}", table_name);
    inner.tables.insert(
        table_name,
        TableData {
            columns,
            rows: Vec::new(),
            next_identity: 1,
        },
    );

    Ok(StatementOutcome::affected(0))
}

fn parse_column_def(def: &str) -> Result<ColumnDef> {
    let mut parts = def.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| Error::query("SQL0104N empty column definition. SQLSTATE=42601"))?
        .to_uppercase();
    let type_token = parts
        .next()
        .ok_or_else(|| Error::query(format!("SQL0104N column {} without a type. SQLSTATE=42601", name)))?
        .to_uppercase();

    let upper = def.to_uppercase();

    // `VARCHAR(100)` / `DECIMAL(10,2)` — type name before the paren, first
    // number as the length
    let (type_name, length) = match type_token.find('(') {
        Some(p) => {
            let base = type_token[..p].to_string();
            let inside: String = type_token[p + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            (base, inside.parse::<u32>().ok())
        }
        None => {
            // `LONG VARCHAR` style two-word types
            let rest: Vec<&str> = upper.split_whitespace().collect();
            if type_token == "LONG" && rest.len() > 2 {
                (format!("LONG {}", rest[2]), None)
            } else {
                (type_token.clone(), None)
            }
        }
    };

    Ok(ColumnDef {
        key_seq: if upper.contains("PRIMARY KEY") {
            Some(1)
        } else {
            None
        },
        identity: upper.contains("GENERATED"),
        default_now: upper.contains("DEFAULT CURRENT TIMESTAMP"),
        name,
        type_name,
        length,
    })
}

fn run_create_trigger(inner: &mut EngineInner, sql: &str) -> Result<StatementOutcome> {
    let upper = sql.to_uppercase();
    let replace = upper.starts_with("CREATE OR REPLACE");

    let trig_pos = find_keyword(sql, "TRIGGER")
        .ok_or_else(|| Error::query("SQL0104N malformed trigger. SQLSTATE=42601"))?;
    let after_trig = sql[trig_pos + 7..].trim();
    let name_end = after_trig
        .find(|c: char| c.is_whitespace())
        .ok_or_else(|| Error::query("SQL0104N malformed trigger. SQLSTATE=42601"))?;
    let name = after_trig[..name_end].to_uppercase();
    let rest = after_trig[name_end..].trim();

    let after_pos = find_keyword(rest, "AFTER")
        .ok_or_else(|| Error::query("SQL0104N trigger without AFTER. SQLSTATE=42601"))?;
    let event_part = rest[after_pos + 5..].trim();
    let event = if event_part.to_uppercase().starts_with("INSERT") {
        TriggerEvent::Insert
    } else if event_part.to_uppercase().starts_with("UPDATE") {
        TriggerEvent::Update
    } else if event_part.to_uppercase().starts_with("DELETE") {
        TriggerEvent::Delete
    } else {
        return Err(Error::query(
            "SQL0104N unsupported trigger event. SQLSTATE=42601".to_string(),
        ));
    };

    let on_pos = find_keyword(rest, "ON")
        .ok_or_else(|| Error::query("SQL0104N trigger without ON. SQLSTATE=42601"))?;
    let after_on = rest[on_pos + 2..].trim();
    let table_end = after_on
        .find(|c: char| c.is_whitespace())
        .unwrap_or(after_on.len());
    let table = after_on[..table_end].to_uppercase();

    if !inner.tables.contains_key(&table) {
        return Err(undefined_table(&table));
    }

    let insert_pos = find_keyword(rest, "INSERT INTO")
        .ok_or_else(|| Error::query("SQL0104N trigger without an action. SQLSTATE=42601"))?;
    let action = rest[insert_pos + 11..].trim();
    let paren = action
        .find('(')
        .ok_or_else(|| Error::query("SQL0104N malformed trigger action. SQLSTATE=42601"))?;
    let target = action[..paren].trim().to_uppercase();
    let cols_end = matching_paren(action, paren)?;
    let columns: Vec<String> = split_top_level(&action[paren + 1..cols_end], ',')
        .into_iter()
        .map(|c| c.trim().to_uppercase())
        .collect();

    let after_cols = action[cols_end + 1..].trim();
    let values_pos = find_keyword(after_cols, "VALUES")
        .ok_or_else(|| Error::query("SQL0104N trigger action without VALUES. SQLSTATE=42601"))?;
    let vals = after_cols[values_pos + 6..].trim();
    let vparen = vals
        .find('(')
        .ok_or_else(|| Error::query("SQL0104N malformed trigger VALUES. SQLSTATE=42601"))?;
    let vend = matching_paren(vals, vparen)?;

    let exprs: Vec<TriggerExpr> = split_top_level(&vals[vparen + 1..vend], ',')
        .into_iter()
        .map(|e| {
            let e = e.trim();
            if e.starts_with('\'') && e.ends_with('\'') && e.len() >= 2 {
                Ok(TriggerExpr::Lit(e[1..e.len() - 1].to_string()))
            } else if let Some(dot) = e.find('.') {
                Ok(TriggerExpr::Ref(e[dot + 1..].to_uppercase()))
            } else {
                Err(Error::query(format!(
                    "SQL0104N unsupported trigger expression. SQLSTATE=42601: {}",
                    e
                )))
            }
        })
        .collect::<Result<_>>()?;

    if columns.len() != exprs.len() {
        return Err(Error::query(
            "SQL0117N trigger column/value count mismatch. SQLSTATE=42802".to_string(),
        ));
    }

    let existing = inner.triggers.iter().position(|t| t.name == name);
    if let Some(idx) = existing {
        if !replace {
            return Err(Error::query(format!(
                "SQL0601N the name of the object to be created is identical to the existing name \"{}\". SQLSTATE=42710",
                name
            )));
        }
        inner.triggers.remove(idx);
    }

    debug!("registered trigger {} on {}", name, table);
    inner.triggers.push(TriggerDef {
        name,
        event,
        table,
        target,
        columns,
        exprs,
    });

    Ok(StatementOutcome::affected(0))
}

/// Fire all triggers registered for `event` on `table` with the given
/// transition row (post-image for insert/update, pre-image for delete).
fn fire_triggers(
    inner: &mut EngineInner,
    event: TriggerEvent,
    table: &str,
    row_map: &HashMap<String, Value>,
) -> Result<()> {
    let to_fire: Vec<TriggerDef> = inner
        .triggers
        .iter()
        .filter(|t| t.event == event && t.table == table)
        .cloned()
        .collect();

    for trigger in to_fire {
        let mut values = Vec::with_capacity(trigger.exprs.len());
        for expr in &trigger.exprs {
            match expr {
                TriggerExpr::Ref(col) => values.push(
                    row_map
                        .get(col)
                        .cloned()
                        .ok_or_else(|| undefined_column(col))?,
                ),
                TriggerExpr::Lit(s) => values.push(Value::String(s.clone())),
            }
        }
        apply_insert(inner, &trigger.target, &trigger.columns, values)?;
    }

    Ok(())
}

// ----------------------------------------------------------------------------
// Small parsing helpers
// ----------------------------------------------------------------------------

/// Find a keyword at a word boundary, case-insensitive, outside quotes.
fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    let upper = haystack.to_uppercase();
    let keyword = keyword.to_uppercase();
    let bytes = upper.as_bytes();
    let mut search_from = 0;

    let is_word_byte = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    while let Some(rel) = upper[search_from..].find(&keyword) {
        let pos = search_from + rel;
        let quotes_before = bytes[..pos].iter().filter(|&&b| b == b'\'').count();
        let in_quotes = quotes_before % 2 == 1;
        let before_ok = pos == 0 || !is_word_byte(bytes[pos - 1]);
        let end = pos + keyword.len();
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok && !in_quotes {
            return Some(pos);
        }
        search_from = pos + 1;
    }
    None
}

/// Split on `sep` at paren depth zero, ignoring quoted sections.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut current = String::new();

    for c in s.chars() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == sep && depth == 0 && !in_quotes => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(s: &str, open: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        if i < open {
            continue;
        }
        match c {
            '\'' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(Error::query(
        "SQL0104N unbalanced parentheses. SQLSTATE=42601".to_string(),
    ))
}

/// Parse `<col> > ?`.
fn parse_gt_condition(cond: &str) -> Result<(String, char)> {
    let gt = cond
        .find('>')
        .ok_or_else(|| Error::query(format!("SQL0104N unsupported condition. SQLSTATE=42601: {}", cond)))?;
    let col = cond[..gt].trim().to_uppercase();
    let rhs = cond[gt + 1..].trim();
    if rhs != "?" {
        return Err(Error::query(format!(
            "SQL0104N unsupported condition operand. SQLSTATE=42601: {}",
            rhs
        )));
    }
    Ok((col, '>'))
}

/// Parse the column of `<col> = ?`.
fn parse_eq_lhs(assignment: &str) -> Result<(String, ())> {
    let eq = assignment.find('=').ok_or_else(|| {
        Error::query(format!(
            "SQL0104N unsupported assignment. SQLSTATE=42601: {}",
            assignment
        ))
    })?;
    Ok((assignment[..eq].trim().to_uppercase(), ()))
}

/// Parse `<col> = ? [AND <col> = ?]...`, consuming parameters in order.
fn parse_eq_conditions<'a>(
    clause: &str,
    params: &mut impl Iterator<Item = &'a Value>,
) -> Result<Vec<(String, Value)>> {
    let mut conditions = Vec::new();
    let mut rest = clause.trim();
    loop {
        let end = find_keyword(rest, "AND").unwrap_or(rest.len());
        let cond = rest[..end].trim();
        if !cond.is_empty() {
            let (col, _) = parse_eq_lhs(cond)?;
            conditions.push((
                col,
                params
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::query("missing WHERE parameter"))?,
            ));
        }
        if end == rest.len() {
            break;
        }
        rest = rest[end + 3..].trim();
    }
    Ok(conditions)
}

/// Cross-type ordering for filter evaluation.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        // ISO-formatted text compares correctly against temporal values
        _ => a.as_string().zip(b.as_string()).map(|(x, y)| x.cmp(&y)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    matches!(compare_values(a, b), Some(std::cmp::Ordering::Equal)) || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with_table() -> MemoryEngine {
        let engine = MemoryEngine::new();
        let conn = engine.connect();
        conn.execute(
            "CREATE TABLE EMPLOYEES (ID INTEGER NOT NULL PRIMARY KEY, NAME VARCHAR(100))",
            &[],
        )
        .await
        .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_create_insert_select() {
        let engine = engine_with_table().await;
        let conn = engine.connect();

        conn.execute(
            "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
            &[Value::Int32(1), Value::String("a".into())],
        )
        .await
        .unwrap();
        conn.execute(
            "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
            &[Value::Int32(2), Value::String("b".into())],
        )
        .await
        .unwrap();

        let rows = conn
            .query(
                "SELECT * FROM EMPLOYEES ORDER BY ID FETCH FIRST 10 ROWS ONLY",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("ID"), Some(&Value::Int32(1)));
        assert_eq!(rows[1].get_by_name("NAME"), Some(&Value::String("b".into())));
    }

    #[tokio::test]
    async fn test_keyset_select() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        for i in 1..=5 {
            conn.execute(
                "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
                &[Value::Int32(i), Value::String(format!("n{}", i))],
            )
            .await
            .unwrap();
        }

        let rows = conn
            .query(
                "SELECT ID, NAME FROM EMPLOYEES WHERE ID > ? ORDER BY ID FETCH FIRST 2 ROWS ONLY",
                &[Value::Int32(2)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("ID"), Some(&Value::Int32(3)));
        assert_eq!(rows[1].get_by_name("ID"), Some(&Value::Int32(4)));
    }

    #[tokio::test]
    async fn test_syscat_columns() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        let rows = conn
            .query(
                "SELECT COLNAME, TYPENAME, LENGTH, KEYSEQ FROM SYSCAT.COLUMNS WHERE TABNAME = ? ORDER BY COLNO",
                &[Value::String("EMPLOYEES".into())],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("COLNAME"), Some(&Value::String("ID".into())));
        assert_eq!(rows[0].get_by_name("KEYSEQ"), Some(&Value::Int16(1)));
        assert_eq!(rows[1].get_by_name("TYPENAME"), Some(&Value::String("VARCHAR".into())));
        assert_eq!(rows[1].get_by_name("LENGTH"), Some(&Value::Int32(100)));
        assert_eq!(rows[1].get_by_name("KEYSEQ"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_syscat_tables_existence() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        let rows = conn
            .query(
                "SELECT COUNT(*) FROM SYSCAT.TABLES WHERE TABNAME = ?",
                &[Value::String("EMPLOYEES".into())],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get(0).and_then(|v| v.as_i64()), Some(1));

        let rows = conn
            .query(
                "SELECT COUNT(*) FROM SYSCAT.TABLES WHERE TABNAME = ?",
                &[Value::String("MISSING".into())],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get(0).and_then(|v| v.as_i64()), Some(0));
    }

    #[tokio::test]
    async fn test_triggers_fire_on_dml() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        conn.execute(
            "CREATE TABLE AUDIT (ID INTEGER, NAME VARCHAR(100), OP VARCHAR(6), SEQ INTEGER NOT NULL GENERATED ALWAYS AS IDENTITY (START WITH 1, INCREMENT BY 1), PRIMARY KEY (SEQ))",
            &[],
        )
        .await
        .unwrap();

        conn.execute(
            "CREATE OR REPLACE TRIGGER TRG_INS AFTER INSERT ON EMPLOYEES REFERENCING NEW AS NEWROW FOR EACH ROW INSERT INTO AUDIT (ID, NAME, OP) VALUES (NEWROW.ID, NEWROW.NAME, 'INSERT')",
            &[],
        )
        .await
        .unwrap();
        conn.execute(
            "CREATE OR REPLACE TRIGGER TRG_DEL AFTER DELETE ON EMPLOYEES REFERENCING OLD AS OLDROW FOR EACH ROW INSERT INTO AUDIT (ID, NAME, OP) VALUES (OLDROW.ID, OLDROW.NAME, 'DELETE')",
            &[],
        )
        .await
        .unwrap();

        conn.execute(
            "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
            &[Value::Int32(7), Value::String("g".into())],
        )
        .await
        .unwrap();
        conn.execute("DELETE FROM EMPLOYEES WHERE ID = ?", &[Value::Int32(7)])
            .await
            .unwrap();

        let rows = conn
            .query("SELECT ID, OP, SEQ FROM AUDIT ORDER BY SEQ", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("OP"), Some(&Value::String("INSERT".into())));
        assert_eq!(rows[0].get_by_name("SEQ"), Some(&Value::Int32(1)));
        assert_eq!(rows[1].get_by_name("OP"), Some(&Value::String("DELETE".into())));
        assert_eq!(rows[1].get_by_name("SEQ"), Some(&Value::Int32(2)));
    }

    #[tokio::test]
    async fn test_trigger_create_or_replace_is_idempotent() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        conn.execute("CREATE TABLE SINK (ID INTEGER)", &[]).await.unwrap();

        let ddl = "CREATE OR REPLACE TRIGGER TRG AFTER INSERT ON EMPLOYEES REFERENCING NEW AS NEWROW FOR EACH ROW INSERT INTO SINK (ID) VALUES (NEWROW.ID)";
        conn.execute(ddl, &[]).await.unwrap();
        conn.execute(ddl, &[]).await.unwrap();

        assert_eq!(engine.trigger_names("EMPLOYEES").await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_in_list() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        for i in 1..=4 {
            conn.execute(
                "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
                &[Value::Int32(i), Value::String("x".into())],
            )
            .await
            .unwrap();
        }

        let affected = conn
            .execute(
                "DELETE FROM EMPLOYEES WHERE ID IN (?, ?)",
                &[Value::Int32(1), Value::Int32(3)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(engine.row_count("EMPLOYEES").await, 2);
    }

    #[tokio::test]
    async fn test_update_fires_update_trigger() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        conn.execute("CREATE TABLE SINK (ID INTEGER, NAME VARCHAR(100))", &[])
            .await
            .unwrap();
        conn.execute(
            "CREATE OR REPLACE TRIGGER TRG_UPD AFTER UPDATE ON EMPLOYEES REFERENCING NEW AS NEWROW FOR EACH ROW INSERT INTO SINK (ID, NAME) VALUES (NEWROW.ID, NEWROW.NAME)",
            &[],
        )
        .await
        .unwrap();

        conn.execute(
            "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
            &[Value::Int32(1), Value::String("before".into())],
        )
        .await
        .unwrap();
        conn.execute(
            "UPDATE EMPLOYEES SET NAME = ? WHERE ID = ?",
            &[Value::String("after".into()), Value::Int32(1)],
        )
        .await
        .unwrap();

        let rows = conn.query("SELECT NAME FROM SINK", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&Value::String("after".into())));
    }

    #[tokio::test]
    async fn test_unknown_table_errors() {
        let engine = MemoryEngine::new();
        let conn = engine.connect();
        let err = conn.query("SELECT * FROM NOPE", &[]).await.unwrap_err();
        assert!(err.to_string().contains("SQL0204N"));
    }

    #[tokio::test]
    async fn test_fail_next_execute() {
        let engine = engine_with_table().await;
        engine.fail_next_execute("SQL0911N deadlock. SQLSTATE=40001").await;
        let conn = engine.connect();
        let err = conn
            .execute(
                "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
                &[Value::Int32(1), Value::String("x".into())],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SQL0911N"));

        // next statement succeeds again
        conn.execute(
            "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
            &[Value::Int32(1), Value::String("x".into())],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_rejected() {
        let engine = engine_with_table().await;
        let conn = engine.connect();
        conn.close().await.unwrap();
        assert!(!conn.is_valid().await);
        assert!(conn.query("SELECT * FROM EMPLOYEES", &[]).await.is_err());
    }
}
