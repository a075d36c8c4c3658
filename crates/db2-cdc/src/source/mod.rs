//! DB2 source connector
//!
//! Runtime-facing contract: `configure`, `open`, `read`, `ack`,
//! `teardown`. The host runtime drives these serially per instance and
//! persists the opaque position bytes it gets back on each record.

mod cdc;
mod iterator;
mod setup;
mod snapshot;

pub use setup::{
    build_tracking_table_ddl, build_triggers, setup_cdc, tracking_table_name, TriggerDdl,
    COLUMN_OPERATION_TYPE, COLUMN_TIME_CREATED, COLUMN_TRACKING_ID,
};

use std::collections::HashMap;
use std::sync::Arc;

use db2_rdbc::{Connection, ConnectionFactory};
use tracing::info;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::record::Record;
use iterator::{CombinedIterator, CombinedParams};

/// DB2 source connector.
///
/// ```rust,no_run
/// # async fn example() -> db2_cdc::Result<()> {
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use db2_cdc::Db2Source;
/// use db2_rdbc::memory::MemoryEngine;
///
/// let engine = MemoryEngine::new();
/// let mut source = Db2Source::new(Arc::new(engine.factory()));
///
/// let mut options = HashMap::new();
/// options.insert("connection".to_string(), "DATABASE=testdb".to_string());
/// options.insert("table".to_string(), "employees".to_string());
/// options.insert("orderingColumn".to_string(), "id".to_string());
///
/// source.configure(&options)?;
/// source.open(None).await?;
/// match source.read().await {
///     Ok(record) => source.ack(&record.position).await?,
///     Err(e) if e.is_backoff_retry() => { /* retry later */ }
///     Err(e) => return Err(e),
/// }
/// source.teardown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Db2Source {
    factory: Arc<dyn ConnectionFactory>,
    config: Option<SourceConfig>,
    iterator: Option<CombinedIterator>,
}

impl Db2Source {
    /// Create a source backed by the given connection factory.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            config: None,
            iterator: None,
        }
    }

    /// Parse and validate the option map.
    pub fn configure(&mut self, options: &HashMap<String, String>) -> Result<()> {
        self.config = Some(SourceConfig::parse(options)?);
        Ok(())
    }

    /// Open the source, resuming from `position` when one is given.
    ///
    /// Idempotent with respect to tracking objects: re-opening with the
    /// same position reuses the tracking table and re-issues trigger
    /// creation.
    pub async fn open(&mut self, position: Option<&[u8]>) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| Error::config("source is not configured"))?;

        info!("opening db2 source for table {}", config.table());

        let conn: Arc<dyn Connection> =
            Arc::from(self.factory.connect(config.connection()).await?);

        let iterator = CombinedIterator::new(CombinedParams {
            factory: self.factory.clone(),
            conn,
            conn_str: config.connection().to_string(),
            table: config.table().to_string(),
            ordering_column: config.ordering_column.clone(),
            cfg_keys: config.primary_keys.clone(),
            columns: config.columns.clone(),
            batch_size: config.batch_size,
            snapshot: config.snapshot,
            position: position.map(|p| p.to_vec()),
        })
        .await?;

        self.iterator = Some(iterator);
        Ok(())
    }

    /// Next record, or [`Error::BackoffRetry`] when none is available.
    pub async fn read(&mut self) -> Result<Record> {
        let iterator = self
            .iterator
            .as_mut()
            .ok_or(Error::NoInitializedIterator)?;

        if !iterator.has_next().await? {
            return Err(Error::BackoffRetry);
        }

        iterator.next().await
    }

    /// Acknowledge a previously returned record's position.
    pub async fn ack(&mut self, position: &[u8]) -> Result<()> {
        let iterator = self
            .iterator
            .as_mut()
            .ok_or(Error::NoInitializedIterator)?;
        iterator.ack(position).await
    }

    /// Stop the active reader and release the DB handle. Tracking objects
    /// are left in place for the next run with the same position.
    pub async fn teardown(&mut self) -> Result<()> {
        if let Some(mut iterator) = self.iterator.take() {
            iterator.stop().await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn iterator(&self) -> Option<&CombinedIterator> {
        self.iterator.as_ref()
    }
}
