//! Table writer
//!
//! Materializes records into the target table: parameterized INSERT,
//! UPDATE and DELETE, with payload values coerced to the table's column
//! types on the way in.

use std::collections::HashMap;

use db2_rdbc::{Connection, Value};

use crate::coltypes::{encode_for_write, get_table_info};
use crate::error::{Error, Result};
use crate::record::Record;

/// Writer over one target table.
pub struct Writer {
    conn: Box<dyn Connection>,
    table: String,
    column_types: HashMap<String, String>,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("table", &self.table)
            .field("column_types", &self.column_types)
            .finish()
    }
}

impl Writer {
    /// Create a writer; reads the target table's column types once.
    pub async fn new(conn: Box<dyn Connection>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let info = get_table_info(&*conn, &table).await?;
        Ok(Self {
            conn,
            table,
            column_types: info.column_types,
        })
    }

    /// Insert the record's payload as a new row.
    pub async fn insert(&self, record: &Record) -> Result<()> {
        let data = self.record_data(record)?;
        let encoded = encode_for_write(data, &self.column_types)?;

        let mut columns: Vec<&String> = encoded.keys().collect();
        columns.sort();

        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let params: Vec<Value> = columns.iter().map(|c| encoded[*c].clone()).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table, column_list, placeholders
        );
        self.conn.execute(&sql, &params).await?;
        Ok(())
    }

    /// Update the row identified by the record's key.
    pub async fn update(&self, record: &Record) -> Result<()> {
        let keys = self.record_keys(record)?;
        let data = self.record_data(record)?;
        let encoded = encode_for_write(data, &self.column_types)?;

        // key columns identify the row; everything else is assignable
        let mut set_columns: Vec<&String> = encoded
            .keys()
            .filter(|c| !keys.contains_key(c.as_str()))
            .collect();
        set_columns.sort();
        if set_columns.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let set_clause = set_columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = set_columns.iter().map(|c| encoded[*c].clone()).collect();

        let (where_clause, mut key_params) = self.key_predicate(&keys)?;
        params.append(&mut key_params);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table, set_clause, where_clause
        );
        self.conn.execute(&sql, &params).await?;
        Ok(())
    }

    /// Delete the row identified by the record's key.
    pub async fn delete(&self, record: &Record) -> Result<()> {
        let keys = self.record_keys(record)?;
        let (where_clause, params) = self.key_predicate(&keys)?;

        let sql = format!("DELETE FROM {} WHERE {}", self.table, where_clause);
        self.conn.execute(&sql, &params).await?;
        Ok(())
    }

    /// Release the connection.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn record_data(&self, record: &Record) -> Result<HashMap<String, serde_json::Value>> {
        match record.payload_json() {
            Some(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
            Some(_) => Err(Error::EmptyPayload),
            // key-only records still carry enough to materialize
            None if !record.key.is_empty() => {
                Ok(record.key.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            None => Err(Error::EmptyPayload),
        }
    }

    fn record_keys(&self, record: &Record) -> Result<HashMap<String, serde_json::Value>> {
        if record.key.is_empty() {
            return Err(Error::NoKey("record key".to_string()));
        }
        Ok(record
            .key
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn key_predicate(
        &self,
        keys: &HashMap<String, serde_json::Value>,
    ) -> Result<(String, Vec<Value>)> {
        let encoded = encode_for_write(keys.clone(), &self.column_types)?;

        let mut columns: Vec<&String> = encoded.keys().collect();
        columns.sort();

        let clause = columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = columns.iter().map(|c| encoded[*c].clone()).collect();

        Ok((clause, params))
    }
}
