//! CDC reader and tracking-table garbage collection
//!
//! Reads captured changes from the tracking table in `CONDUIT_TRACKING_ID`
//! order. A background task deletes tracking rows the downstream has
//! acknowledged, so the table stays bounded while at-least-once delivery
//! holds: a row is only deleted after an ack covering its tracking id.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use db2_rdbc::{Connection, Row, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::coltypes::decode_row;
use crate::error::{Error, Result};
use crate::position::Position;
use crate::record::Record;
use crate::source::setup::{COLUMN_OPERATION_TYPE, COLUMN_TIME_CREATED, COLUMN_TRACKING_ID};

/// How often the GC task deletes acknowledged tracking rows.
const CLEAR_TRACKING_INTERVAL: Duration = Duration::from_secs(5);

/// How long `stop` waits for GC quiescence before force-closing the handle.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared state between the CDC reader and its GC task.
struct TrackingTableService {
    /// Acknowledged tracking ids awaiting deletion.
    pending: Arc<Mutex<Vec<i64>>>,
    /// Stop signal for the GC task.
    stop_tx: mpsc::Sender<()>,
    /// GC failure, latched for the next `ack`.
    err_rx: mpsc::Receiver<String>,
    /// Signaled after the GC's final delete pass.
    can_close_rx: Option<oneshot::Receiver<()>>,
    /// The GC task itself.
    task: Option<JoinHandle<()>>,
}

pub(crate) struct CdcParams {
    pub conn: Arc<dyn Connection>,
    pub table: String,
    pub tracking_table: String,
    pub keys: Vec<String>,
    pub columns: Vec<String>,
    pub batch_size: usize,
    pub column_types: HashMap<String, String>,
    pub position: Option<Position>,
    pub suffix_name: String,
}

/// CDC iterator over the tracking table.
pub(crate) struct CdcIterator {
    conn: Arc<dyn Connection>,
    service: TrackingTableService,
    table: String,
    tracking_table: String,
    keys: Vec<String>,
    columns: Vec<String>,
    batch_size: usize,
    position: Option<Position>,
    column_types: HashMap<String, String>,
    suffix_name: String,
    batch: VecDeque<Row>,
}

impl CdcIterator {
    pub(crate) async fn new(params: CdcParams) -> Result<Self> {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        let (can_close_tx, can_close_rx) = oneshot::channel();

        let task = tokio::spawn(clear_tracking_table(
            params.conn.clone(),
            params.tracking_table.clone(),
            pending.clone(),
            stop_rx,
            err_tx,
            can_close_tx,
        ));

        let mut iterator = Self {
            conn: params.conn,
            service: TrackingTableService {
                pending,
                stop_tx,
                err_rx,
                can_close_rx: Some(can_close_rx),
                task: Some(task),
            },
            table: params.table,
            tracking_table: params.tracking_table,
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

    /// Whether another change record is available; reloads from the last
    /// emitted tracking id on batch exhaustion.
    pub(crate) async fn has_next(&mut self) -> Result<bool> {
        if !self.batch.is_empty() {
            return Ok(true);
        }

        self.load_rows().await?;
        Ok(!self.batch.is_empty())
    }

    /// Read the next change record and advance the position.
    pub(crate) async fn next(&mut self) -> Result<Record> {
        let row = self
            .batch
            .pop_front()
            .ok_or_else(|| db2_rdbc::Error::scan("no current row in cdc batch"))?;

        let mut decoded = decode_row(row.into_map(), &self.column_types)?;

        let tracking_id = match decoded.get(COLUMN_TRACKING_ID) {
            Some(Value::Int32(id)) => i64::from(*id),
            Some(Value::Int64(id)) => *id,
            _ => return Err(Error::WrongTrackingIdType),
        };

        let operation_type = match decoded.get(COLUMN_OPERATION_TYPE) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|_| Error::WrongTrackingOperatorType)?,
            _ => return Err(Error::WrongTrackingOperatorType),
        };

        decoded.remove(COLUMN_OPERATION_TYPE);
        decoded.remove(COLUMN_TIME_CREATED);
        decoded.remove(COLUMN_TRACKING_ID);

        let mut key = BTreeMap::new();
        for key_column in &self.keys {
            let value = decoded
                .get(key_column)
                .cloned()
                .ok_or_else(|| Error::NoKey(key_column.clone()))?;
            key.insert(key_column.clone(), value.into_json());
        }

        let position = Position::cdc(tracking_id, self.suffix_name.clone());
        let encoded_position = position.encode()?;

        let record = match operation_type.as_str() {
            "INSERT" | "UPDATE" => {
                let payload: serde_json::Map<String, serde_json::Value> = decoded
                    .into_iter()
                    .map(|(name, value)| (name, value.into_json()))
                    .collect();
                let payload = serde_json::to_vec(&serde_json::Value::Object(payload))?;

                if operation_type == "INSERT" {
                    Record::create(encoded_position, self.table.clone(), key, payload)
                } else {
                    Record::update(encoded_position, self.table.clone(), key, payload)
                }
            }
            "DELETE" => Record::delete(encoded_position, self.table.clone(), key),
            _ => return Err(Error::UnknownOperatorType(operation_type)),
        };

        self.position = Some(position);
        Ok(record)
    }

    /// Register an acknowledged position for tracking-row deletion.
    ///
    /// A GC failure since the previous ack surfaces here, once, as a
    /// non-retryable error.
    pub(crate) async fn ack(&mut self, position: &Position) -> Result<()> {
        if let Ok(msg) = self.service.err_rx.try_recv() {
            return Err(Error::gc(msg));
        }

        let mut pending = self.service.pending.lock().await;
        pending.push(position.cdc_last_id);
        Ok(())
    }

    /// Stop the reader: signal the GC, drop the cursor, wait for the GC's
    /// final delete pass (bounded), then close the handle.
    pub(crate) async fn stop(&mut self) -> Result<()> {
        // a full stop channel means the signal is already queued
        let _ = self.service.stop_tx.try_send(());

        self.batch.clear();

        if let Some(can_close) = self.service.can_close_rx.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, can_close).await {
                Ok(_) => debug!("tracking table GC finished"),
                Err(_) => warn!(
                    "tracking table GC did not quiesce within {:?}, closing anyway",
                    SHUTDOWN_TIMEOUT
                ),
            }
        }

        if let Some(task) = self.service.task.take() {
            task.abort();
        }

        self.conn.close().await?;
        Ok(())
    }

    /// Select the next batch after the last emitted tracking id.
    async fn load_rows(&mut self) -> Result<()> {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            let mut columns = self.columns.clone();
            columns.push(COLUMN_TRACKING_ID.to_string());
            columns.push(COLUMN_OPERATION_TYPE.to_string());
            columns.push(COLUMN_TIME_CREATED.to_string());
            columns.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, self.tracking_table);
        let mut params: Vec<Value> = Vec::new();

        if let Some(position) = &self.position {
            sql.push_str(&format!(" WHERE {} > ?", COLUMN_TRACKING_ID));
            params.push(Value::Int64(position.cdc_last_id));
        }

        sql.push_str(&format!(
            " ORDER BY {} FETCH FIRST {} ROWS ONLY",
            COLUMN_TRACKING_ID, self.batch_size
        ));

        let rows = self.conn.query(&sql, &params).await?;
        debug!(
            "cdc batch loaded: {} rows from {}",
            rows.len(),
            self.tracking_table
        );
        self.batch = rows.into();

        Ok(())
    }
}

/// GC loop: on every tick (or on stop, one final time) delete the pending
/// acknowledged tracking rows in a single transaction.
async fn clear_tracking_table(
    conn: Arc<dyn Connection>,
    tracking_table: String,
    pending: Arc<Mutex<Vec<i64>>>,
    mut stop_rx: mpsc::Receiver<()>,
    err_tx: mpsc::Sender<String>,
    can_close_tx: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                if let Err(e) = delete_rows(&conn, &tracking_table, &pending).await {
                    error!("final tracking table cleanup failed: {}", e);
                    let _ = err_tx.try_send(e.to_string());
                }
                let _ = can_close_tx.send(());
                return;
            }
            _ = tokio::time::sleep(CLEAR_TRACKING_INTERVAL) => {
                if let Err(e) = delete_rows(&conn, &tracking_table, &pending).await {
                    error!("tracking table cleanup failed: {}", e);
                    let _ = err_tx.try_send(e.to_string());
                    return;
                }
            }
        }
    }
}

/// Delete the pending ids in one transaction; clear them only on commit.
async fn delete_rows(
    conn: &Arc<dyn Connection>,
    tracking_table: &str,
    pending: &Arc<Mutex<Vec<i64>>>,
) -> Result<()> {
    let mut pending = pending.lock().await;
    if pending.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; pending.len()].join(", ");
    let sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        tracking_table, COLUMN_TRACKING_ID, placeholders
    );
    let params: Vec<Value> = pending.iter().map(|id| Value::Int64(*id)).collect();

    let tx = conn.begin().await?;
    match tx.execute(&sql, &params).await {
        Ok(deleted) => {
            tx.commit().await?;
            debug!("cleared {} tracking rows from {}", deleted, tracking_table);
            pending.clear();
            Ok(())
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e.into())
        }
    }
}
