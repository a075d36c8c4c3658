//! # db2-cdc - Change Data Capture for DB2
//!
//! A DB2 connector with two halves:
//!
//! - **Source**: emits an ordered record stream describing a single table -
//!   a complete snapshot first, then every insert, update and delete -
//!   with a resumable position token. Changes are captured by row-level
//!   triggers writing into a per-run tracking table; an acknowledged-row
//!   garbage collector keeps that table bounded.
//! - **Destination**: applies such a record stream to a target table,
//!   routing each record to INSERT / UPDATE / DELETE by its operation tag.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   triggers    ┌──────────────────────────┐
//! │  table T    │ ────────────► │ CONDUIT_<T>_<suffix>     │
//! │ (captured)  │               │ (tracking table)         │
//! └──────┬──────┘               └──────────┬───────────────┘
//!        │ snapshot reads                  │ cdc reads │ GC deletes
//!        ▼                                 ▼           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │            CombinedIterator (snapshot → cdc)             │
//! └───────────────────────────┬──────────────────────────────┘
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │    Db2Source: configure / open / read / ack / teardown   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Triggers are installed before the snapshot begins, so changes
//! concurrent with the snapshot are captured; the stream is at-least-once
//! across the snapshot-to-CDC handoff.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> db2_cdc::Result<()> {
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use db2_cdc::Db2Source;
//! use db2_rdbc::memory::MemoryEngine;
//!
//! let engine = MemoryEngine::new();
//! let mut source = Db2Source::new(Arc::new(engine.factory()));
//!
//! let mut options = HashMap::new();
//! options.insert("connection".into(), "DATABASE=testdb".into());
//! options.insert("table".into(), "employees".into());
//! options.insert("orderingColumn".into(), "id".into());
//!
//! source.configure(&options)?;
//! source.open(None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod coltypes;
pub mod config;
pub mod destination;
pub mod error;
pub mod position;
pub mod record;
pub mod source;
pub mod spec;

pub use config::{Configuration, SourceConfig};
pub use destination::{Db2Destination, Writer};
pub use error::{Error, Result};
pub use position::{IteratorType, Position};
pub use record::{Metadata, Operation, Record};
pub use source::Db2Source;
pub use spec::{spec, Spec};
