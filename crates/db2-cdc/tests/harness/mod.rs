//! Shared test harness: an in-memory DB2 engine seeded with the scenario
//! table, plus helpers for driving the source.

// not every test binary uses every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use db2_cdc::{Db2Source, Error, Record};
use db2_rdbc::memory::MemoryEngine;
use db2_rdbc::{Connection, Value};

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// `EMPLOYEES (ID INT PRIMARY KEY, NAME VARCHAR(100))`
pub async fn create_employee_table(engine: &MemoryEngine) {
    let conn = engine.connect();
    conn.execute(
        "CREATE TABLE EMPLOYEES (ID INTEGER NOT NULL PRIMARY KEY, NAME VARCHAR(100))",
        &[],
    )
    .await
    .unwrap();
}

pub async fn insert_employee(engine: &MemoryEngine, id: i32, name: &str) {
    let conn = engine.connect();
    conn.execute(
        "INSERT INTO EMPLOYEES (ID, NAME) VALUES (?, ?)",
        &[Value::Int32(id), Value::String(name.to_string())],
    )
    .await
    .unwrap();
}

pub async fn update_employee(engine: &MemoryEngine, id: i32, name: &str) {
    let conn = engine.connect();
    conn.execute(
        "UPDATE EMPLOYEES SET NAME = ? WHERE ID = ?",
        &[Value::String(name.to_string()), Value::Int32(id)],
    )
    .await
    .unwrap();
}

pub async fn delete_employees(engine: &MemoryEngine) {
    let conn = engine.connect();
    conn.execute("DELETE FROM EMPLOYEES", &[]).await.unwrap();
}

pub fn source_options() -> HashMap<String, String> {
    let mut options = HashMap::new();
    options.insert("connection".to_string(), "DATABASE=testdb".to_string());
    options.insert("table".to_string(), "employees".to_string());
    options.insert("orderingColumn".to_string(), "id".to_string());
    options
}

pub async fn open_source(
    engine: &MemoryEngine,
    options: &HashMap<String, String>,
    position: Option<&[u8]>,
) -> Db2Source {
    let mut source = Db2Source::new(Arc::new(engine.factory()));
    source.configure(options).unwrap();
    source.open(position).await.unwrap();
    source
}

/// Read records until the source reports backoff.
pub async fn drain(source: &mut Db2Source) -> Vec<Record> {
    let mut records = Vec::new();
    loop {
        match source.read().await {
            Ok(record) => records.push(record),
            Err(Error::BackoffRetry) => return records,
            Err(e) => panic!("unexpected read error: {:?}", e),
        }
    }
}

pub fn key_id(record: &Record) -> i64 {
    record
        .key
        .get("ID")
        .and_then(|v| v.as_i64())
        .expect("record key ID")
}
