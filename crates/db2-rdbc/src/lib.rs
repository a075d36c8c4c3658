//! # db2-rdbc
//!
//! Relational connectivity boundary for the DB2 connector.
//!
//! This crate defines the value types and connection traits the CDC engine
//! programs against, so the actual driver (ODBC, CLI bindings, a test
//! double) stays behind a narrow seam:
//!
//! - [`Value`] / [`Row`] - driver value model covering DB2's type surface
//! - [`Connection`] / [`Transaction`] - query execution on an open handle
//! - [`ConnectionFactory`] - opening handles from a connection string
//! - [`memory`] - an in-memory DB2-flavored engine implementing the traits,
//!   with working row-level triggers, for tests and local development
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> db2_rdbc::Result<()> {
//! use db2_rdbc::memory::MemoryEngine;
//! use db2_rdbc::{Connection, Value};
//!
//! let engine = MemoryEngine::new();
//! let conn = engine.connect();
//! conn.execute(
//!     "CREATE TABLE USERS (ID INTEGER NOT NULL PRIMARY KEY, NAME VARCHAR(100))",
//!     &[],
//! )
//! .await?;
//! conn.execute(
//!     "INSERT INTO USERS (ID, NAME) VALUES (?, ?)",
//!     &[Value::Int32(1), Value::String("alice".into())],
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod memory;
pub mod types;

pub use connection::{
    redact_conn_str, Connection, ConnectionConfig, ConnectionFactory, Transaction,
};
pub use error::{Error, ErrorCategory, Result};
pub use types::{Row, Value};
