//! DB2 destination connector
//!
//! Applies a record stream to a target table by routing each record to the
//! writer by its operation tag.

mod writer;

pub use writer::Writer;

use std::collections::HashMap;
use std::sync::Arc;

use db2_rdbc::ConnectionFactory;
use tracing::info;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::record::{Operation, Record};

/// DB2 destination connector.
pub struct Db2Destination {
    factory: Arc<dyn ConnectionFactory>,
    config: Option<Configuration>,
    writer: Option<Writer>,
}

impl Db2Destination {
    /// Create a destination backed by the given connection factory.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            config: None,
            writer: None,
        }
    }

    /// Parse and validate the option map.
    pub fn configure(&mut self, options: &HashMap<String, String>) -> Result<()> {
        self.config = Some(Configuration::parse(options)?);
        Ok(())
    }

    /// Connect and prepare the writer.
    pub async fn open(&mut self) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| Error::config("destination is not configured"))?;

        info!("opening db2 destination for table {}", config.table);

        let conn = self.factory.connect(&config.connection).await?;
        if !conn.is_valid().await {
            return Err(db2_rdbc::Error::ConnectionClosed.into());
        }

        self.writer = Some(Writer::new(conn, config.table).await?);
        Ok(())
    }

    /// Write a batch, routing each record by operation. Returns how many
    /// records were written; on failure, the count of records that were
    /// written before the failing one.
    pub async fn write(&mut self, records: &[Record]) -> Result<usize> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::config("destination is not open"))?;

        for (written, record) in records.iter().enumerate() {
            let result = match record.operation {
                Operation::Create => writer.insert(record).await,
                Operation::Update => writer.update(record).await,
                Operation::Delete => writer.delete(record).await,
            };
            if let Err(e) = result {
                return if written == 0 { Err(e) } else { Ok(written) };
            }
        }

        Ok(records.len())
    }

    /// Close the writer and its connection.
    pub async fn teardown(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.close().await?;
        }
        Ok(())
    }
}
