//! Resumable position token
//!
//! The position is opaque to the host runtime: it round-trips as JSON bytes
//! through the runtime's offset store and comes back on restart. It carries
//! which phase the reader was in, how far it got, and the tracking-suffix
//! that names this run's tracking objects.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which reader produced the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IteratorType {
    /// Snapshot phase
    #[serde(rename = "s")]
    Snapshot,
    /// CDC phase
    #[serde(rename = "c")]
    Cdc,
}

/// Reader progress, JSON-encoded end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Which iterator created this position.
    #[serde(rename = "iterator_type")]
    pub iterator_type: IteratorType,

    /// Last processed value of the ordering column (snapshot phase).
    #[serde(rename = "snapshot_last_processed_val", default)]
    pub snapshot_last_processed_val: Option<serde_json::Value>,

    /// Last processed tracking id (CDC phase).
    #[serde(rename = "cdc_last_id", default)]
    pub cdc_last_id: i64,

    /// Suffix identifying this run's tracking table and triggers.
    #[serde(rename = "suffix_name", default)]
    pub suffix_name: String,
}

impl Position {
    /// A snapshot position at the given ordering-column value.
    pub fn snapshot(last_processed: serde_json::Value, suffix_name: impl Into<String>) -> Self {
        Self {
            iterator_type: IteratorType::Snapshot,
            snapshot_last_processed_val: Some(last_processed),
            cdc_last_id: 0,
            suffix_name: suffix_name.into(),
        }
    }

    /// A CDC position at the given tracking id.
    pub fn cdc(last_id: i64, suffix_name: impl Into<String>) -> Self {
        Self {
            iterator_type: IteratorType::Cdc,
            snapshot_last_processed_val: None,
            cdc_last_id: last_id,
            suffix_name: suffix_name.into(),
        }
    }

    /// Encode into opaque bytes for the host runtime.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a position handed back by the host runtime.
    ///
    /// `None` or empty bytes mean "no position": a fresh stream.
    pub fn decode(raw: Option<&[u8]>) -> Result<Option<Position>> {
        let raw = match raw {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(None),
        };

        // surface an unknown iterator tag as its own error kind, not a
        // generic JSON parse failure
        let probe: serde_json::Value = serde_json::from_slice(raw)?;
        if let Some(tag) = probe.get("iterator_type").and_then(|v| v.as_str()) {
            if tag != "s" && tag != "c" {
                return Err(Error::UnknownIteratorType(tag.to_string()));
            }
        }

        let pos: Position = serde_json::from_slice(raw)?;
        Ok(Some(pos))
    }
}
