//! Connector configuration
//!
//! Shared options (connection, table) plus the source-specific options.
//! Configurations are parsed from the host runtime's option map, normalized
//! (identifiers uppercased the way DB2 stores them in its catalog) and
//! validated before anything touches the database.

use std::collections::HashMap;

use db2_rdbc::redact_conn_str;

use crate::error::{Error, Result};

/// Option keys as the host runtime presents them.
pub mod keys {
    /// DB2 connection string
    pub const CONNECTION: &str = "connection";
    /// Table to read from or write to
    pub const TABLE: &str = "table";
    /// Ordering column for the snapshot phase
    pub const ORDERING_COLUMN: &str = "orderingColumn";
    /// Projected columns
    pub const COLUMNS: &str = "columns";
    /// Key columns overriding the catalog primary keys
    pub const PRIMARY_KEYS: &str = "primaryKeys";
    /// Rows per batch query
    pub const BATCH_SIZE: &str = "batchSize";
    /// Whether to snapshot the table before CDC
    pub const SNAPSHOT: &str = "snapshot";
}

/// Maximum length for identifier-valued options.
pub const MAX_CONFIG_STRING_LENGTH: usize = 128;

/// Default rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound for `batchSize`.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Options shared between the source and the destination.
#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    /// DB2 connection string.
    pub connection: String,
    /// Table name, uppercased.
    pub table: String,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("connection", &redact_conn_str(&self.connection))
            .field("table", &self.table)
            .finish()
    }
}

impl Configuration {
    /// Parse the shared options out of the host's option map.
    pub fn parse(options: &HashMap<String, String>) -> Result<Self> {
        let connection = required(options, keys::CONNECTION)?;
        let table = required(options, keys::TABLE)?.to_uppercase();

        if table.len() > MAX_CONFIG_STRING_LENGTH {
            return Err(less_than_err(keys::TABLE, MAX_CONFIG_STRING_LENGTH));
        }

        Ok(Self { connection, table })
    }
}

/// Source configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Shared options.
    pub configuration: Configuration,
    /// Ordering column, uppercased. Values must be unique and strictly
    /// monotonic; duplicate values can skip rows across batches.
    pub ordering_column: String,
    /// Projected columns, uppercased; empty means all columns.
    pub columns: Vec<String>,
    /// Key columns overriding the catalog primary keys, uppercased.
    pub primary_keys: Vec<String>,
    /// Rows per batch query.
    pub batch_size: usize,
    /// Whether to snapshot the table before switching to CDC.
    pub snapshot: bool,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("configuration", &self.configuration)
            .field("ordering_column", &self.ordering_column)
            .field("columns", &self.columns)
            .field("primary_keys", &self.primary_keys)
            .field("batch_size", &self.batch_size)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl SourceConfig {
    /// Parse and validate the source options.
    pub fn parse(options: &HashMap<String, String>) -> Result<Self> {
        let configuration = Configuration::parse(options)?;

        let ordering_column = required(options, keys::ORDERING_COLUMN)?.to_uppercase();
        if ordering_column.len() > MAX_CONFIG_STRING_LENGTH {
            return Err(less_than_err(
                keys::ORDERING_COLUMN,
                MAX_CONFIG_STRING_LENGTH,
            ));
        }

        let columns = list(options, keys::COLUMNS);
        for col in &columns {
            if col.len() > MAX_CONFIG_STRING_LENGTH {
                return Err(Error::config(format!(
                    "column {:?} length must be less than or equal to {} characters",
                    col, MAX_CONFIG_STRING_LENGTH
                )));
            }
        }
        if !columns.is_empty() && !columns.contains(&ordering_column) {
            return Err(Error::config(format!(
                "columns must contain orderingColumn {:?}",
                ordering_column
            )));
        }

        let primary_keys = list(options, keys::PRIMARY_KEYS);
        for key in &primary_keys {
            if key.len() > MAX_CONFIG_STRING_LENGTH {
                return Err(Error::config(format!(
                    "primaryKey {:?} length must be less than or equal to {} characters",
                    key, MAX_CONFIG_STRING_LENGTH
                )));
            }
        }

        let batch_size = match options.get(keys::BATCH_SIZE) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                Error::config(format!("{:?} must be an integer, got {:?}", keys::BATCH_SIZE, raw))
            })?,
            None => DEFAULT_BATCH_SIZE,
        };
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(Error::config(format!(
                "{:?} must be between 1 and {}",
                keys::BATCH_SIZE,
                MAX_BATCH_SIZE
            )));
        }

        let snapshot = match options.get(keys::SNAPSHOT) {
            Some(raw) => raw.trim().parse::<bool>().map_err(|_| {
                Error::config(format!("{:?} must be a boolean, got {:?}", keys::SNAPSHOT, raw))
            })?,
            None => true,
        };

        Ok(Self {
            configuration,
            ordering_column,
            columns,
            primary_keys,
            batch_size,
            snapshot,
        })
    }

    /// The connection string.
    pub fn connection(&self) -> &str {
        &self.configuration.connection
    }

    /// The (uppercased) table name.
    pub fn table(&self) -> &str {
        &self.configuration.table
    }
}

fn required(options: &HashMap<String, String>, key: &str) -> Result<String> {
    match options.get(key).map(|s| s.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::config(format!("option {:?} is required", key))),
    }
}

fn list(options: &HashMap<String, String>, key: &str) -> Vec<String> {
    options
        .get(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn less_than_err(field: &str, max: usize) -> Error {
    Error::config(format!(
        "{:?} value must be less than or equal to {}",
        field, max
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> HashMap<String, String> {
        let mut options = HashMap::new();
        options.insert(keys::CONNECTION.to_string(), "HOSTNAME=h;DATABASE=d;UID=u;PWD=p".to_string());
        options.insert(keys::TABLE.to_string(), "employees".to_string());
        options.insert(keys::ORDERING_COLUMN.to_string(), "id".to_string());
        options
    }

    #[test]
    fn test_parse_minimal() {
        let cfg = SourceConfig::parse(&base_options()).unwrap();
        assert_eq!(cfg.table(), "EMPLOYEES");
        assert_eq!(cfg.ordering_column, "ID");
        assert!(cfg.columns.is_empty());
        assert!(cfg.primary_keys.is_empty());
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert!(cfg.snapshot);
    }

    #[test]
    fn test_missing_required_options() {
        let mut options = base_options();
        options.remove(keys::CONNECTION);
        assert!(SourceConfig::parse(&options).is_err());

        let mut options = base_options();
        options.remove(keys::TABLE);
        assert!(SourceConfig::parse(&options).is_err());

        let mut options = base_options();
        options.remove(keys::ORDERING_COLUMN);
        assert!(SourceConfig::parse(&options).is_err());
    }

    #[test]
    fn test_columns_uppercased_and_must_contain_ordering_column() {
        let mut options = base_options();
        options.insert(keys::COLUMNS.to_string(), "id, name".to_string());
        let cfg = SourceConfig::parse(&options).unwrap();
        assert_eq!(cfg.columns, vec!["ID".to_string(), "NAME".to_string()]);

        let mut options = base_options();
        options.insert(keys::COLUMNS.to_string(), "name".to_string());
        let err = SourceConfig::parse(&options).unwrap_err();
        assert!(err.to_string().contains("orderingColumn"));
    }

    #[test]
    fn test_primary_keys_uppercased() {
        let mut options = base_options();
        options.insert(keys::PRIMARY_KEYS.to_string(), "id,region".to_string());
        let cfg = SourceConfig::parse(&options).unwrap();
        assert_eq!(cfg.primary_keys, vec!["ID".to_string(), "REGION".to_string()]);
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut options = base_options();
        options.insert(keys::BATCH_SIZE.to_string(), "0".to_string());
        assert!(SourceConfig::parse(&options).is_err());

        options.insert(keys::BATCH_SIZE.to_string(), "100001".to_string());
        assert!(SourceConfig::parse(&options).is_err());

        options.insert(keys::BATCH_SIZE.to_string(), "500".to_string());
        assert_eq!(SourceConfig::parse(&options).unwrap().batch_size, 500);

        options.insert(keys::BATCH_SIZE.to_string(), "abc".to_string());
        assert!(SourceConfig::parse(&options).is_err());
    }

    #[test]
    fn test_snapshot_flag() {
        let mut options = base_options();
        options.insert(keys::SNAPSHOT.to_string(), "false".to_string());
        assert!(!SourceConfig::parse(&options).unwrap().snapshot);

        options.insert(keys::SNAPSHOT.to_string(), "maybe".to_string());
        assert!(SourceConfig::parse(&options).is_err());
    }

    #[test]
    fn test_table_length_limit() {
        let mut options = base_options();
        options.insert(keys::TABLE.to_string(), "T".repeat(129));
        assert!(SourceConfig::parse(&options).is_err());
    }

    #[test]
    fn test_debug_redacts_connection() {
        let cfg = SourceConfig::parse(&base_options()).unwrap();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("PWD=p"));
    }
}
