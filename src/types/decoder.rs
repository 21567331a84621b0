//! Decoding of wire rows into typed values.
//!
//! The coordinator sends every batch as row-major JSON arrays. Each cell is
//! interpreted according to its column's type signature.

use super::mapping::TrinoType;
use super::value::{Row, Value};
use crate::error::DecodeError;
use crate::transport::Column;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value as Json;

/// Converts raw wire rows of one batch into decoded rows.
///
/// Implementations must be pure: a failure for one batch leaves rows from
/// earlier batches untouched.
pub trait RowDecoder: Send + Sync {
    /// Decode all rows of a batch.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if a row has the wrong number of cells or a
    /// cell does not match its column type.
    fn decode_batch(&self, columns: &[Column], rows: Vec<Vec<Json>>) -> Result<Vec<Row>, DecodeError>;
}

/// Default decoder mapping Trino types onto [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedValueDecoder;

impl RowDecoder for TypedValueDecoder {
    fn decode_batch(&self, columns: &[Column], rows: Vec<Vec<Json>>) -> Result<Vec<Row>, DecodeError> {
        let types: Vec<TrinoType> = columns.iter().map(Column::trino_type).collect();

        rows.into_iter()
            .enumerate()
            .map(|(row_idx, cells)| {
                if cells.len() != types.len() {
                    return Err(DecodeError::SchemaMismatch(format!(
                        "row {} has {} values but {} columns were declared",
                        row_idx,
                        cells.len(),
                        types.len()
                    )));
                }
                cells
                    .into_iter()
                    .zip(types.iter())
                    .enumerate()
                    .map(|(col_idx, (cell, ty))| {
                        decode_value(cell, ty).map_err(|message| {
                            DecodeError::ValueConversionFailed {
                                row: row_idx,
                                column: col_idx,
                                message,
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Row::new)
            })
            .collect()
    }
}

/// Decode a single cell.
pub fn decode_value(value: Json, ty: &TrinoType) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        TrinoType::Boolean => match value {
            Json::Bool(b) => Ok(Value::Boolean(b)),
            other => Err(mismatch("boolean", &other)),
        },
        TrinoType::TinyInt => integer(&value, "tinyint")
            .and_then(|v| i8::try_from(v).map_err(|_| out_of_range("tinyint", v)))
            .map(Value::TinyInt),
        TrinoType::SmallInt => integer(&value, "smallint")
            .and_then(|v| i16::try_from(v).map_err(|_| out_of_range("smallint", v)))
            .map(Value::SmallInt),
        TrinoType::Integer => integer(&value, "integer")
            .and_then(|v| i32::try_from(v).map_err(|_| out_of_range("integer", v)))
            .map(Value::Integer),
        TrinoType::BigInt => integer(&value, "bigint").map(Value::BigInt),
        TrinoType::Real => float(&value, "real").map(|v| Value::Real(v as f32)),
        TrinoType::Double => float(&value, "double").map(Value::Double),
        TrinoType::Decimal { .. } => match value {
            Json::String(s) => Ok(Value::Decimal(s)),
            Json::Number(n) => Ok(Value::Decimal(n.to_string())),
            other => Err(mismatch("decimal", &other)),
        },
        TrinoType::Varchar { .. } | TrinoType::Char { .. } | TrinoType::Uuid | TrinoType::IpAddress => {
            text(value, "varchar").map(Value::Varchar)
        }
        TrinoType::Varbinary => {
            let encoded = text(value, "varbinary")?;
            STANDARD
                .decode(encoded.as_bytes())
                .map(Value::Varbinary)
                .map_err(|e| format!("invalid base64 varbinary: {}", e))
        }
        TrinoType::Json => match value {
            Json::String(s) => Ok(Value::Json(s)),
            other => Ok(Value::Json(other.to_string())),
        },
        TrinoType::Date => text(value, "date").map(Value::Date),
        TrinoType::Time { .. } => text(value, "time").map(Value::Time),
        TrinoType::Timestamp { .. } => text(value, "timestamp").map(Value::Timestamp),
        TrinoType::IntervalYearToMonth | TrinoType::IntervalDayToSecond => {
            text(value, "interval").map(Value::Interval)
        }
        TrinoType::Array(element) => match value {
            Json::Array(items) => items
                .into_iter()
                .map(|item| decode_value(item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(mismatch("array", &other)),
        },
        TrinoType::Map(key_type, value_type) => match value {
            Json::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((decode_map_key(k, key_type)?, decode_value(v, value_type)?)))
                .collect::<Result<Vec<_>, String>>()
                .map(Value::Map),
            other => Err(mismatch("map", &other)),
        },
        TrinoType::Row(fields) => match value {
            Json::Array(items) if items.len() == fields.len() => items
                .into_iter()
                .zip(fields.iter())
                .map(|(item, (_, field_type))| decode_value(item, field_type))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Row),
            Json::Array(items) => Err(format!(
                "row has {} fields but {} were declared",
                items.len(),
                fields.len()
            )),
            other => Err(mismatch("row", &other)),
        },
        TrinoType::Other(_) => Ok(decode_untyped(value)),
    }
}

/// Map keys always travel as JSON object keys, i.e. strings.
fn decode_map_key(key: String, key_type: &TrinoType) -> Result<Value, String> {
    match key_type {
        TrinoType::Boolean => key
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| format!("invalid boolean map key '{}'", key)),
        TrinoType::TinyInt
        | TrinoType::SmallInt
        | TrinoType::Integer
        | TrinoType::BigInt
        | TrinoType::Real
        | TrinoType::Double => {
            let parsed: Json = serde_json::from_str(&key)
                .map_err(|_| format!("invalid numeric map key '{}'", key))?;
            decode_value(parsed, key_type)
        }
        other => decode_value(Json::String(key), other),
    }
}

fn decode_untyped(value: Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => match n.as_i64() {
            Some(v) => Value::BigInt(v),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Varchar(s),
        Json::Array(items) => Value::Array(items.into_iter().map(decode_untyped).collect()),
        other @ Json::Object(_) => Value::Json(other.to_string()),
    }
}

fn integer(value: &Json, type_name: &str) -> Result<i64, String> {
    match value {
        Json::Number(n) => n.as_i64().ok_or_else(|| mismatch(type_name, value)),
        Json::String(s) => s.parse::<i64>().map_err(|_| mismatch(type_name, value)),
        _ => Err(mismatch(type_name, value)),
    }
}

fn float(value: &Json, type_name: &str) -> Result<f64, String> {
    match value {
        Json::Number(n) => n.as_f64().ok_or_else(|| mismatch(type_name, value)),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_err(|_| mismatch(type_name, value)),
        },
        _ => Err(mismatch(type_name, value)),
    }
}

fn text(value: Json, type_name: &str) -> Result<String, String> {
    match value {
        Json::String(s) => Ok(s),
        other => Err(mismatch(type_name, &other)),
    }
}

fn mismatch(type_name: &str, value: &Json) -> String {
    format!("expected {} but found {}", type_name, value)
}

fn out_of_range(type_name: &str, value: i64) -> String {
    format!("value {} is out of range for {}", value, type_name)
}
