//! Record model
//!
//! The unit handed to the host runtime: an operation tag, the key columns,
//! an optional JSON post-image, table metadata, and the opaque position.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation described by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Row created (also used for snapshot rows)
    Create,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

/// Record metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Source table name
    pub table: String,
    /// When the record was produced
    pub created_at: DateTime<Utc>,
}

/// A change record emitted by the source or consumed by the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque resume token
    pub position: Vec<u8>,
    /// Operation tag
    pub operation: Operation,
    /// Key column values
    pub key: BTreeMap<String, serde_json::Value>,
    /// JSON-encoded post-image; absent for deletes
    pub payload: Option<Vec<u8>>,
    /// Record metadata
    pub metadata: Metadata,
}

impl Record {
    /// Create a `create` record.
    pub fn create(
        position: Vec<u8>,
        table: impl Into<String>,
        key: BTreeMap<String, serde_json::Value>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            position,
            operation: Operation::Create,
            key,
            payload: Some(payload),
            metadata: Metadata {
                table: table.into(),
                created_at: Utc::now(),
            },
        }
    }

    /// Create an `update` record.
    pub fn update(
        position: Vec<u8>,
        table: impl Into<String>,
        key: BTreeMap<String, serde_json::Value>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            position,
            operation: Operation::Update,
            key,
            payload: Some(payload),
            metadata: Metadata {
                table: table.into(),
                created_at: Utc::now(),
            },
        }
    }

    /// Create a key-only `delete` record.
    pub fn delete(
        position: Vec<u8>,
        table: impl Into<String>,
        key: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            position,
            operation: Operation::Delete,
            key,
            payload: None,
            metadata: Metadata {
                table: table.into(),
                created_at: Utc::now(),
            },
        }
    }

    /// Decode the JSON payload, if present.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        self.payload
            .as_deref()
            .and_then(|p| serde_json::from_slice(p).ok())
    }
}
