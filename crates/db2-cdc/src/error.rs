//! Error types for the DB2 connector
//!
//! One taxonomy for configuration, catalog, payload-coercion and tracking
//! faults, plus the backoff sentinel the host runtime keys its retry
//! protocol on.

use thiserror::Error;

/// Connector errors
#[derive(Error, Debug)]
pub enum Error {
    /// No records currently available; the host should back off and retry
    #[error("no records available, backoff and retry")]
    BackoffRetry,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog lookup failed
    #[error("catalog lookup failed: {0}")]
    CatalogLookup(String),

    /// The configured table does not exist
    #[error("table {0:?} not found")]
    TableNotFound(String),

    /// Tracking table or trigger installation failed
    #[error("trigger install failed: {0}")]
    TriggerInstall(String),

    /// Underlying driver error (query/scan/connection)
    #[error(transparent)]
    Driver(#[from] db2_rdbc::Error),

    /// A string-typed column returned an unexpected representation
    #[error("cannot convert value to bytes for column {0:?}")]
    CannotConvertValueToBytes(String),

    /// A value that must be textual is not a string
    #[error("value for column {0:?} is not a string")]
    ValueNotAString(String),

    /// A value could not be coerced into DECFLOAT
    #[error("cannot convert value for column {0:?} to DECFLOAT")]
    ConvertDecFloat(String),

    /// A textual temporal value matched none of the known layouts
    #[error("invalid time layout: {0:?}")]
    InvalidTimeLayout(String),

    /// The tracking id column holds a non-integer value
    #[error("tracking id is not an integer")]
    WrongTrackingIdType,

    /// The operation type column holds a non-textual value
    #[error("tracking operation type is not a string")]
    WrongTrackingOperatorType,

    /// The operation type column holds an unrecognized tag
    #[error("unknown operation type: {0:?}")]
    UnknownOperatorType(String),

    /// A configured key column is missing from the row
    #[error("key {0:?} doesn't exist")]
    NoKey(String),

    /// A record that requires a payload arrived without one
    #[error("payload is empty")]
    EmptyPayload,

    /// The ordering column is missing from the row
    #[error("ordering column {0:?} is missing from the row")]
    OrderingColumnNotPresent(String),

    /// The position token carries an unknown iterator type
    #[error("unknown iterator type: {0:?}")]
    UnknownIteratorType(String),

    /// The background tracking-table cleanup failed
    #[error("clear tracking table: {0}")]
    Gc(String),

    /// No iterator is initialized (read before open)
    #[error("no initialized iterator")]
    NoInitializedIterator,

    /// JSON encoding/decoding error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a catalog lookup error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::CatalogLookup(msg.into())
    }

    /// Create a trigger install error
    pub fn trigger_install(msg: impl Into<String>) -> Self {
        Self::TriggerInstall(msg.into())
    }

    /// Create a GC error
    pub fn gc(msg: impl Into<String>) -> Self {
        Self::Gc(msg.into())
    }

    /// True when this is the backoff sentinel rather than a failure.
    pub fn is_backoff_retry(&self) -> bool {
        matches!(self, Self::BackoffRetry)
    }
}

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, Error>;
