//! DB2 column-type introspection and value coercion
//!
//! Reads table metadata from the `SYSCAT` catalog and converts values
//! between driver-native and payload representations.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use db2_rdbc::{Connection, Value};

use crate::error::{Error, Result};

// DB2 type names as SYSCAT.COLUMNS reports them.

// String types.
const CHAR_TYPE: &str = "CHARACTER";
const CLOB_TYPE: &str = "CLOB";
const LONG_VARCHAR_TYPE: &str = "LONG VARCHAR";
const GRAPHIC_TYPE: &str = "GRAPHIC";
const VARCHAR_TYPE: &str = "VARCHAR";
const LONG_VARGRAPHIC_TYPE: &str = "LONG VARGRAPHIC";
const VARGRAPHIC_TYPE: &str = "VARGRAPHIC";
const DECIMAL_TYPE: &str = "DECIMAL";
const DECFLOAT_TYPE: &str = "DECFLOAT";

// Time types.
const DATE_TYPE: &str = "DATE";
const TIME_TYPE: &str = "TIME";
const TIMESTAMP_TYPE: &str = "TIMESTAMP";

// Binary types.
const BINARY_TYPE: &str = "BINARY";
const VARBINARY_TYPE: &str = "VARBINARY";
const BLOB_TYPE: &str = "BLOB";

/// Types whose driver representation is normalized to text in payloads.
const STRING_LIKE_TYPES: [&str; 9] = [
    CHAR_TYPE,
    CLOB_TYPE,
    LONG_VARCHAR_TYPE,
    GRAPHIC_TYPE,
    LONG_VARGRAPHIC_TYPE,
    VARCHAR_TYPE,
    VARGRAPHIC_TYPE,
    DECIMAL_TYPE,
    DECFLOAT_TYPE,
];

/// Types that carry their length into DDL reproduction.
const LENGTH_BEARING_TYPES: [&str; 8] = [
    CHAR_TYPE,
    VARCHAR_TYPE,
    GRAPHIC_TYPE,
    VARGRAPHIC_TYPE,
    BINARY_TYPE,
    VARBINARY_TYPE,
    CLOB_TYPE,
    BLOB_TYPE,
];

/// Catalog query for column names, types, lengths and key sequence.
const QUERY_SCHEMA_COLUMN_TYPES: &str = "SELECT COLNAME, TYPENAME, LENGTH, KEYSEQ \
     FROM SYSCAT.COLUMNS WHERE TABNAME = ? ORDER BY COLNO";

/// Table metadata relevant to the connector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    /// Column name to DB2 type name.
    pub column_types: HashMap<String, String>,
    /// Column name to declared length, for length-bearing types.
    pub column_lengths: HashMap<String, u32>,
    /// Column names in definition order.
    pub column_order: Vec<String>,
    /// Primary key columns ordered by key sequence.
    pub primary_keys: Vec<String>,
}

impl TableInfo {
    /// Reproduce the table's columns as a DDL fragment, original types and
    /// lengths included.
    pub fn column_definitions(&self) -> String {
        self.column_order
            .iter()
            .map(|name| {
                let type_name = self.column_types.get(name).map(String::as_str).unwrap_or("");
                match self.column_lengths.get(name) {
                    Some(len) if LENGTH_BEARING_TYPES.contains(&type_name) => {
                        format!("{} {}({})", name, type_name, len)
                    }
                    _ => format!("{} {}", name, type_name),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Read [`TableInfo`] for `table` from the catalog.
pub async fn get_table_info(conn: &dyn Connection, table: &str) -> Result<TableInfo> {
    let rows = conn
        .query(QUERY_SCHEMA_COLUMN_TYPES, &[Value::String(table.to_string())])
        .await
        .map_err(|e| Error::catalog(e.to_string()))?;

    if rows.is_empty() {
        return Err(Error::TableNotFound(table.to_string()));
    }

    let mut info = TableInfo::default();
    let mut keyed: Vec<(u32, String)> = Vec::new();

    for row in rows {
        let name = row
            .get_by_name("COLNAME")
            .and_then(|v| v.as_string())
            .ok_or_else(|| Error::catalog("missing COLNAME in catalog row"))?;
        let type_name = row
            .get_by_name("TYPENAME")
            .and_then(|v| v.as_string())
            .ok_or_else(|| Error::catalog("missing TYPENAME in catalog row"))?;
        let length = row
            .get_by_name("LENGTH")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let key_seq = row.get_by_name("KEYSEQ").and_then(|v| v.as_i64()).unwrap_or(0);

        if length > 0 {
            info.column_lengths.insert(name.clone(), length as u32);
        }
        if key_seq > 0 {
            keyed.push((key_seq as u32, name.clone()));
        }
        info.column_types.insert(name.clone(), type_name);
        info.column_order.push(name);
    }

    keyed.sort_by_key(|(seq, _)| *seq);
    info.primary_keys = keyed.into_iter().map(|(_, name)| name).collect();

    Ok(info)
}

/// Normalize a driver row for payload construction.
///
/// String-like columns (CHAR, VARCHAR, CLOB, GRAPHIC, LONG VARCHAR,
/// VARGRAPHIC, LONG VARGRAPHIC, DECIMAL, DECFLOAT) are converted to text;
/// other columns pass through untouched.
pub fn decode_row(
    row: HashMap<String, Value>,
    column_types: &HashMap<String, String>,
) -> Result<HashMap<String, Value>> {
    let mut result = HashMap::with_capacity(row.len());

    for (key, value) in row {
        if value.is_null() {
            result.insert(key, value);
            continue;
        }

        let type_name = column_types.get(&key).map(String::as_str).unwrap_or("");
        if STRING_LIKE_TYPES.contains(&type_name) {
            let text = match value {
                Value::Bytes(bytes) => String::from_utf8(bytes)
                    .map_err(|_| Error::CannotConvertValueToBytes(key.clone()))?,
                Value::String(s) => s,
                Value::Decimal(d) => d.to_string(),
                _ => return Err(Error::CannotConvertValueToBytes(key)),
            };
            result.insert(key, Value::String(text));
        } else {
            result.insert(key, value);
        }
    }

    Ok(result)
}

/// Coerce payload values into driver values for writing.
///
/// Composite JSON values are marshaled to text (DB2 has no JSON type),
/// temporal text is parsed against the known layouts, DECFLOAT accepts
/// numeric and numeric-text variants, and binary columns accept text as
/// bytes.
pub fn encode_for_write(
    data: HashMap<String, serde_json::Value>,
    column_types: &HashMap<String, String>,
) -> Result<HashMap<String, Value>> {
    let mut result = HashMap::with_capacity(data.len());

    for (key, value) in data {
        if value.is_null() {
            result.insert(key, Value::Null);
            continue;
        }

        if value.is_object() || value.is_array() {
            result.insert(key, Value::String(serde_json::to_string(&value)?));
            continue;
        }

        let type_name = column_types
            .get(&key.to_uppercase())
            .map(String::as_str)
            .unwrap_or("");

        let converted = match type_name {
            DATE_TYPE => {
                let text = value.as_str().ok_or_else(|| Error::ValueNotAString(key.clone()))?;
                Value::Date(parse_to_date(text)?)
            }
            TIME_TYPE => {
                let text = value.as_str().ok_or_else(|| Error::ValueNotAString(key.clone()))?;
                Value::Time(parse_to_time(text)?)
            }
            TIMESTAMP_TYPE => {
                let text = value.as_str().ok_or_else(|| Error::ValueNotAString(key.clone()))?;
                Value::DateTime(parse_to_timestamp(text)?)
            }
            DECFLOAT_TYPE => match &value {
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .map(Value::Float64)
                    .ok_or_else(|| Error::ConvertDecFloat(key.clone()))?,
                serde_json::Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::Float64)
                    .map_err(|_| Error::ConvertDecFloat(key.clone()))?,
                _ => return Err(Error::ConvertDecFloat(key)),
            },
            BINARY_TYPE | VARBINARY_TYPE | BLOB_TYPE => {
                let text = value.as_str().ok_or_else(|| Error::ValueNotAString(key.clone()))?;
                Value::Bytes(text.as_bytes().to_vec())
            }
            _ => json_scalar_to_value(value),
        };

        result.insert(key, converted);
    }

    Ok(result)
}

fn json_scalar_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                n.as_f64().map(Value::Float64).unwrap_or(Value::Null)
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        _ => Value::Null,
    }
}

/// Timestamp layouts tried in order: RFC3339 (with and without fractional
/// seconds) first, then common locale layouts including DB2's dotted form.
const TIMESTAMP_LAYOUTS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d-%H.%M.%S%.f",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M:%S",
    "%a %b %e %H:%M:%S %Y",
];

fn parse_to_timestamp(text: &str) -> Result<NaiveDateTime> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_utc());
    }
    for layout in TIMESTAMP_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, layout) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    Err(Error::InvalidTimeLayout(text.to_string()))
}

fn parse_to_date(text: &str) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_to_timestamp(text).map(|ts| ts.date())
}

fn parse_to_time(text: &str) -> Result<NaiveTime> {
    for layout in ["%H:%M:%S%.f", "%H.%M.%S", "%I:%M %p"] {
        if let Ok(time) = NaiveTime::parse_from_str(text, layout) {
            return Ok(time);
        }
    }
    parse_to_timestamp(text).map(|ts| ts.time())
}
