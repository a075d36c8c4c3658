//! Error types for DB2 connectivity
//!
//! Driver-level errors with classification for intelligent retry.

use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-level errors (refused, closed, timeout)
    Connection,
    /// Query execution errors
    Query,
    /// Row decoding errors
    Decode,
    /// Transaction errors (begin/commit/rollback)
    Transaction,
    /// Other/unknown errors
    Other,
}

/// Driver-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Connection could not be established
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection was closed by the server or by `close()`
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Query failed to execute
    #[error("query failed: {0}")]
    Query(String),

    /// A row could not be decoded into driver values
    #[error("scan failed: {0}")]
    Scan(String),

    /// Transaction control failed
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Deadlock detected by the database
    #[error("deadlock detected: {0}")]
    DeadlockDetected(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a connection refused error
    pub fn connection_refused(msg: impl Into<String>) -> Self {
        Self::ConnectionRefused(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a scan error
    pub fn scan(msg: impl Into<String>) -> Self {
        Self::Scan(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a deadlock error
    pub fn deadlock_detected(msg: impl Into<String>) -> Self {
        Self::DeadlockDetected(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionRefused(_)
            | Self::ConnectionClosed
            | Self::Timeout(_)
            | Self::DeadlockDetected(_) => true,

            // SQLSTATE connection exception class (08xxx) and rollback class (40xxx)
            Self::Query(msg) | Self::Transaction(msg) => {
                msg.contains("SQLSTATE=08") || msg.contains("SQLSTATE=40")
            }

            Self::Scan(_) | Self::Other(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionRefused(_) | Self::ConnectionClosed | Self::Timeout(_) => {
                ErrorCategory::Connection
            }
            Self::Query(_) | Self::DeadlockDetected(_) => ErrorCategory::Query,
            Self::Scan(_) => ErrorCategory::Decode,
            Self::Transaction(_) => ErrorCategory::Transaction,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::query("SQL0204N table not found");
        assert!(err.to_string().contains("query failed"));
        assert!(err.to_string().contains("SQL0204N"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::ConnectionClosed.is_retriable());
        assert!(Error::connection_refused("host:50000").is_retriable());
        assert!(Error::timeout("5s").is_retriable());
        assert!(Error::deadlock_detected("txn 42").is_retriable());
        assert!(Error::query("SQLSTATE=08003 connection lost").is_retriable());

        assert!(!Error::query("SQL0104N syntax error").is_retriable());
        assert!(!Error::scan("bad column").is_retriable());
        assert!(!Error::other("unknown").is_retriable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::ConnectionClosed.category(), ErrorCategory::Connection);
        assert_eq!(Error::query("x").category(), ErrorCategory::Query);
        assert_eq!(Error::scan("x").category(), ErrorCategory::Decode);
        assert_eq!(Error::transaction("x").category(), ErrorCategory::Transaction);
        assert_eq!(Error::other("x").category(), ErrorCategory::Other);
    }
}
