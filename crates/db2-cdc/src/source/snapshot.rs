//! Snapshot reader
//!
//! Ordered, batched, resumable read of the captured table. Uses keyset
//! pagination on the ordering column (no OFFSET), so resuming costs one
//! indexed comparison regardless of table size.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use db2_rdbc::{Connection, Row, Value};
use tracing::debug;

use crate::coltypes::decode_row;
use crate::error::{Error, Result};
use crate::position::Position;
use crate::record::Record;

pub(crate) struct SnapshotParams {
    pub conn: Arc<dyn Connection>,
    pub table: String,
    pub ordering_column: String,
    pub keys: Vec<String>,
    pub columns: Vec<String>,
    pub batch_size: usize,
    pub position: Option<Position>,
    pub column_types: HashMap<String, String>,
    pub suffix_name: String,
}

/// Snapshot iterator over the captured table.
pub(crate) struct SnapshotIterator {
    conn: Arc<dyn Connection>,
    table: String,
    ordering_column: String,
    keys: Vec<String>,
    columns: Vec<String>,
    batch_size: usize,
    position: Option<Position>,
    column_types: HashMap<String, String>,
    suffix_name: String,
    batch: VecDeque<Row>,
}

impl SnapshotIterator {
    pub(crate) async fn new(params: SnapshotParams) -> Result<Self> {
        let mut iterator = Self {
            conn: params.conn,
            table: params.table,
            ordering_column: params.ordering_column,
            keys: params.keys,
            columns: params.columns,
            batch_size: params.batch_size,
            position: params.position,
            column_types: params.column_types,
            suffix_name: params.suffix_name,
            batch: VecDeque::new(),
        };

        iterator.load_rows().await?;
        Ok(iterator)
    }

    /// Whether another record is available. On batch exhaustion the query
    /// is re-issued from the last emitted ordering value; only an empty
    /// re-issued batch reports `false`.
    pub(crate) async fn has_next(&mut self) -> Result<bool> {
        if !self.batch.is_empty() {
            return Ok(true);
        }

        self.load_rows().await?;
        Ok(!self.batch.is_empty())
    }

    /// Read the next record and advance the position.
    pub(crate) async fn next(&mut self) -> Result<Record> {
        let row = self
            .batch
            .pop_front()
            .ok_or_else(|| db2_rdbc::Error::scan("no current row in snapshot batch"))?;

        let decoded = decode_row(row.into_map(), &self.column_types)?;

        let ordering_value = decoded
            .get(&self.ordering_column)
            .cloned()
            .ok_or_else(|| Error::OrderingColumnNotPresent(self.ordering_column.clone()))?;

        let mut key = BTreeMap::new();
        for key_column in &self.keys {
            let value = decoded
                .get(key_column)
                .cloned()
                .ok_or_else(|| Error::NoKey(key_column.clone()))?;
            key.insert(key_column.clone(), value.into_json());
        }

        let position = Position::snapshot(ordering_value.into_json(), self.suffix_name.clone());

        let payload: serde_json::Map<String, serde_json::Value> = decoded
            .into_iter()
            .map(|(name, value)| (name, value.into_json()))
            .collect();
        let payload = serde_json::to_vec(&serde_json::Value::Object(payload))?;

        let record = Record::create(position.encode()?, self.table.clone(), key, payload);
        self.position = Some(position);

        Ok(record)
    }

    /// Drop the current batch. The combined iterator owns the connection;
    /// it is not closed here.
    pub(crate) fn stop(&mut self) {
        self.batch.clear();
    }

    /// Select the next batch after the last emitted ordering value.
    async fn load_rows(&mut self) -> Result<()> {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, self.table);
        let mut params: Vec<Value> = Vec::new();

        if let Some(resume_from) = self.position.as_ref().and_then(ordering_param) {
            sql.push_str(&format!(" WHERE {} > ?", self.ordering_column));
            params.push(resume_from);
        }

        sql.push_str(&format!(
            " ORDER BY {} FETCH FIRST {} ROWS ONLY",
            self.ordering_column, self.batch_size
        ));

        let rows = self.conn.query(&sql, &params).await?;
        debug!("snapshot batch loaded: {} rows from {}", rows.len(), self.table);
        self.batch = rows.into();

        Ok(())
    }
}

/// Driver parameter for the keyset predicate, from the stored JSON value.
fn ordering_param(position: &Position) -> Option<Value> {
    match position.snapshot_last_processed_val.as_ref()? {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int64(i))
            } else {
                n.as_f64().map(Value::Float64)
            }
        }
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}
