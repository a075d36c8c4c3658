//! Destination end-to-end scenarios, including a full source-to-destination
//! pipe between two engines.

mod harness;

use std::collections::HashMap;
use std::sync::Arc;

use db2_cdc::{Db2Destination, Error};
use db2_rdbc::memory::MemoryEngine;
use db2_rdbc::{Connection, Value};
use harness::*;

fn destination_options() -> HashMap<String, String> {
    let mut options = HashMap::new();
    options.insert("connection".to_string(), "DATABASE=targetdb".to_string());
    options.insert("table".to_string(), "employees".to_string());
    options
}

#[tokio::test]
async fn test_destination_requires_existing_table() {
    init_test_logging();
    let engine = MemoryEngine::new();

    let mut destination = Db2Destination::new(Arc::new(engine.factory()));
    destination.configure(&destination_options()).unwrap();
    assert!(matches!(
        destination.open().await.unwrap_err(),
        Error::TableNotFound(_)
    ));
}

#[tokio::test]
async fn test_source_to_destination_pipe() {
    init_test_logging();

    // source side: seed rows, then mutate after the stream is open
    let source_engine = MemoryEngine::new();
    create_employee_table(&source_engine).await;
    insert_employee(&source_engine, 1, "a").await;
    insert_employee(&source_engine, 2, "b").await;

    let mut source = open_source(&source_engine, &source_options(), None).await;

    // destination side: same schema, different engine
    let target_engine = MemoryEngine::new();
    create_employee_table(&target_engine).await;
    let mut destination = Db2Destination::new(Arc::new(target_engine.factory()));
    destination.configure(&destination_options()).unwrap();
    destination.open().await.unwrap();

    // snapshot records materialize as inserts
    let snapshot_records = drain(&mut source).await;
    assert_eq!(snapshot_records.len(), 2);
    let written = destination.write(&snapshot_records).await.unwrap();
    assert_eq!(written, 2);
    assert_eq!(target_engine.row_count("EMPLOYEES").await, 2);

    // live changes flow through the same pipe
    update_employee(&source_engine, 1, "a2").await;
    insert_employee(&source_engine, 3, "c").await;

    let cdc_records = drain(&mut source).await;
    assert_eq!(cdc_records.len(), 2);
    destination.write(&cdc_records).await.unwrap();

    let conn = target_engine.connect();
    let rows = conn
        .query("SELECT ID, NAME FROM EMPLOYEES ORDER BY ID", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get_by_name("NAME"), Some(&Value::String("a2".into())));
    assert_eq!(rows[2].get_by_name("ID").and_then(|v| v.as_i64()), Some(3));

    // deletes remove the target row by key
    delete_employees(&source_engine).await;
    let delete_records = drain(&mut source).await;
    assert_eq!(delete_records.len(), 3);
    destination.write(&delete_records).await.unwrap();
    assert_eq!(target_engine.row_count("EMPLOYEES").await, 0);

    source.teardown().await.unwrap();
    destination.teardown().await.unwrap();
}
