//! Tracking-table and trigger installation
//!
//! Creates the per-run tracking table and the three row-level triggers on
//! the captured table, inside one transaction. Safe to call on every open:
//! an existing tracking table is kept, and trigger creation always re-runs
//! (`CREATE OR REPLACE`), so a partially set-up state recovers.

use db2_rdbc::{Connection, Transaction, Value};
use tracing::{debug, info};

use crate::coltypes::TableInfo;
use crate::error::{Error, Result};

/// Tracking table naming: `CONDUIT_<table>_<suffix>`.
pub fn tracking_table_name(table: &str, suffix: &str) -> String {
    format!("CONDUIT_{}_{}", table, suffix)
}

/// Operation tag column of the tracking table.
pub const COLUMN_OPERATION_TYPE: &str = "CONDUIT_OPERATION_TYPE";
/// Capture timestamp column of the tracking table.
pub const COLUMN_TIME_CREATED: &str = "CONDUIT_TRACKING_CREATED_DATE";
/// Monotonic identity column of the tracking table; the CDC ordering key.
pub const COLUMN_TRACKING_ID: &str = "CONDUIT_TRACKING_ID";

const QUERY_TABLE_EXISTS: &str = "SELECT COUNT(*) FROM SYSCAT.TABLES WHERE TABNAME = ?";

/// Build the tracking-table DDL: every column of the captured table with
/// its original type and length, plus the three tracking columns.
pub fn build_tracking_table_ddl(tracking_table: &str, table_info: &TableInfo) -> String {
    format!(
        "CREATE TABLE {} ({}, {} VARCHAR(6) NOT NULL, {} TIMESTAMP DEFAULT CURRENT TIMESTAMP, \
         {} INTEGER NOT NULL GENERATED ALWAYS AS IDENTITY (START WITH 1, INCREMENT BY 1), \
         PRIMARY KEY ({}))",
        tracking_table,
        table_info.column_definitions(),
        COLUMN_OPERATION_TYPE,
        COLUMN_TIME_CREATED,
        COLUMN_TRACKING_ID,
        COLUMN_TRACKING_ID,
    )
}

/// The three trigger statements for a `(table, suffix)` pair.
pub struct TriggerDdl {
    /// `AFTER INSERT` trigger (post-image + `INSERT` tag)
    pub catch_insert: String,
    /// `AFTER UPDATE` trigger (post-image + `UPDATE` tag)
    pub catch_update: String,
    /// `AFTER DELETE` trigger (pre-image + `DELETE` tag)
    pub catch_delete: String,
}

/// Build the trigger DDL. Trigger names embed the table and suffix so
/// concurrent captures of the same table never collide.
pub fn build_triggers(
    table: &str,
    tracking_table: &str,
    suffix: &str,
    table_info: &TableInfo,
) -> TriggerDdl {
    let columns = table_info.column_order.join(", ");
    let new_values = transition_values(&table_info.column_order, "NEWROW");
    let old_values = transition_values(&table_info.column_order, "OLDROW");

    let catch_insert = format!(
        "CREATE OR REPLACE TRIGGER CONDUIT_TRIGGER_INSERT_{}_{} AFTER INSERT ON {} \
         REFERENCING NEW AS NEWROW FOR EACH ROW \
         INSERT INTO {} ({}, {}) VALUES ({}, 'INSERT')",
        table, suffix, table, tracking_table, columns, COLUMN_OPERATION_TYPE, new_values,
    );

    let catch_update = format!(
        "CREATE OR REPLACE TRIGGER CONDUIT_TRIGGER_UPDATE_{}_{} AFTER UPDATE ON {} \
         REFERENCING NEW AS NEWROW FOR EACH ROW \
         INSERT INTO {} ({}, {}) VALUES ({}, 'UPDATE')",
        table, suffix, table, tracking_table, columns, COLUMN_OPERATION_TYPE, new_values,
    );

    let catch_delete = format!(
        "CREATE OR REPLACE TRIGGER CONDUIT_TRIGGER_DELETE_{}_{} AFTER DELETE ON {} \
         REFERENCING OLD AS OLDROW FOR EACH ROW \
         INSERT INTO {} ({}, {}) VALUES ({}, 'DELETE')",
        table, suffix, table, tracking_table, columns, COLUMN_OPERATION_TYPE, old_values,
    );

    TriggerDdl {
        catch_insert,
        catch_update,
        catch_delete,
    }
}

fn transition_values(columns: &[String], transition: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", transition, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Create the tracking table and triggers, idempotently, in one transaction.
pub async fn setup_cdc(
    conn: &dyn Connection,
    table: &str,
    tracking_table: &str,
    suffix: &str,
    table_info: &TableInfo,
) -> Result<()> {
    let tx = conn
        .begin()
        .await
        .map_err(|e| Error::trigger_install(format!("begin transaction: {}", e)))?;

    match setup_steps(&*tx, table, tracking_table, suffix, table_info).await {
        Ok(()) => {
            tx.commit()
                .await
                .map_err(|e| Error::trigger_install(format!("commit transaction: {}", e)))?;
            info!(table, tracking_table, "tracking objects ready");
            Ok(())
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

async fn setup_steps(
    tx: &dyn Transaction,
    table: &str,
    tracking_table: &str,
    suffix: &str,
    table_info: &TableInfo,
) -> Result<()> {
    let rows = tx
        .query(QUERY_TABLE_EXISTS, &[Value::String(tracking_table.to_string())])
        .await
        .map_err(|e| Error::trigger_install(format!("query exist table: {}", e)))?;

    let exists = rows
        .first()
        .and_then(|r| r.get(0))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        > 0;

    if exists {
        debug!(tracking_table, "tracking table already exists");
    } else {
        tx.execute(&build_tracking_table_ddl(tracking_table, table_info), &[])
            .await
            .map_err(|e| Error::trigger_install(format!("create tracking table: {}", e)))?;
    }

    let triggers = build_triggers(table, tracking_table, suffix, table_info);

    tx.execute(&triggers.catch_insert, &[])
        .await
        .map_err(|e| Error::trigger_install(format!("add trigger catch insert: {}", e)))?;
    tx.execute(&triggers.catch_update, &[])
        .await
        .map_err(|e| Error::trigger_install(format!("add trigger catch update: {}", e)))?;
    tx.execute(&triggers.catch_delete, &[])
        .await
        .map_err(|e| Error::trigger_install(format!("add trigger catch delete: {}", e)))?;

    Ok(())
}
