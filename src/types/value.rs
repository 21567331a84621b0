//! Decoded row values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// A single decoded value.
///
/// Temporal, decimal and interval values keep the coordinator's text
/// rendering so that no precision is lost in transit.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    /// Exact decimal as text, e.g. `"123.45"`
    Decimal(String),
    Varchar(String),
    Varbinary(Vec<u8>),
    Json(String),
    Date(String),
    Time(String),
    Timestamp(String),
    Interval(String),
    Array(Vec<Value>),
    /// Map entries in wire order
    Map(Vec<(Value, Value)>),
    /// Row fields in declaration order
    Row(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value of any integral variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Integer(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point value of any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Text of any string-carrying variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s)
            | Value::Decimal(s)
            | Value::Json(s)
            | Value::Date(s)
            | Value::Time(s)
            | Value::Timestamp(s)
            | Value::Interval(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Varbinary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// JSON rendering, used for nested values in Arrow output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_) => {
                self.as_i64().map_or(Json::Null, Json::from)
            }
            Value::Real(v) => float_to_json(f64::from(*v)),
            Value::Double(v) => float_to_json(*v),
            Value::Json(s) => serde_json::from_str(s).unwrap_or_else(|_| Json::String(s.clone())),
            Value::Varbinary(b) => Json::String(STANDARD.encode(b)),
            Value::Decimal(s)
            | Value::Varchar(s)
            | Value::Date(s)
            | Value::Time(s)
            | Value::Timestamp(s)
            | Value::Interval(s) => Json::String(s.clone()),
            Value::Array(values) | Value::Row(values) => {
                Json::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let object = entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Value::Varchar(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key, v.to_json())
                    })
                    .collect();
                Json::Object(object)
            }
        }
    }
}

fn float_to_json(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(format_float(v)))
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() && v > 0.0 {
        "Infinity".to_string()
    } else if v.is_infinite() {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", format_float(f64::from(*v))),
            Value::Double(v) => write!(f, "{}", format_float(*v)),
            Value::Decimal(s)
            | Value::Varchar(s)
            | Value::Json(s)
            | Value::Date(s)
            | Value::Time(s)
            | Value::Timestamp(s)
            | Value::Interval(s) => write!(f, "{}", s),
            Value::Varbinary(bytes) => {
                write!(f, "0x")?;
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Array(values) => {
                write!(f, "[")?;
                write_list(f, values)?;
                write!(f, "]")
            }
            Value::Row(values) => {
                write!(f, "(")?;
                write_list(f, values)?;
                write!(f, ")")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value)?;
    }
    Ok(())
}

/// One decoded result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at a column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Integer at a column index; `None` if absent, NULL or not integral.
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, index: usize) -> Option<bool> {
        self.get(index).and_then(Value::as_bool)
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map_or(true, Value::is_null)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.values)
    }
}
