//! Dynamic wire value.

use crate::error::Result;
use crate::protocol::types::{FormatCode, Oid, oid};

use super::registry::TypeRegistry;
use super::{FromWireValue, ToWireValue};

/// A decoded column or an untyped parameter.
///
/// Datetime variants use the server's internal representation: days or
/// microseconds relative to 2000-01-01. `i64::MAX` / `i64::MIN` (and
/// `i32::MAX` / `i32::MIN` for dates) encode `infinity` / `-infinity`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// The single-byte `"char"` type.
    Char(i8),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(u32),
    Float4(f32),
    Float8(f64),
    /// Decimal text, or `NaN` / `Infinity` / `-Infinity`.
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    Json(String),
    Uuid([u8; 16]),
    Date(i32),
    Time(i64),
    Timestamp(i64),
    TimestampTz(i64),
    /// A column whose type has no registered codec.
    Unknown {
        oid: Oid,
        format: FormatCode,
        bytes: Vec<u8>,
    },
}

impl Value {
    /// Oid used when this value is bound without a prepared parameter type.
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Char(_) => oid::CHAR,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Oid(_) => oid::OID,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Bytea(_) => oid::BYTEA,
            Value::Json(_) => oid::JSON,
            Value::Uuid(_) => oid::UUID,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Unknown { oid, .. } => *oid,
        }
    }

    /// Short variant name, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "Bool",
            Value::Char(_) => "Char",
            Value::Int2(_) => "Int2",
            Value::Int4(_) => "Int4",
            Value::Int8(_) => "Int8",
            Value::Oid(_) => "Oid",
            Value::Float4(_) => "Float4",
            Value::Float8(_) => "Float8",
            Value::Numeric(_) => "Numeric",
            Value::Text(_) => "Text",
            Value::Bytea(_) => "Bytea",
            Value::Json(_) => "Json",
            Value::Uuid(_) => "Uuid",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::Timestamp(_) => "Timestamp",
            Value::TimestampTz(_) => "TimestampTz",
            Value::Unknown { .. } => "Unknown",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer variant, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(i64::from(*v)),
            Value::Int4(v) => Some(i64::from(*v)),
            Value::Int8(v) => Some(*v),
            Value::Oid(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(f64::from(*v)),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow textual content: `Text`, `Json` and `Numeric`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Json(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytea(b) => Some(b),
            Value::Unknown { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int4(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int8(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float8(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytea(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl FromWireValue<'_> for Value {
    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }

    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        TypeRegistry::global().decode(oid, FormatCode::Text, Some(bytes))
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        TypeRegistry::global().decode(oid, FormatCode::Binary, Some(bytes))
    }
}

impl ToWireValue for Value {
    fn natural_oid(&self) -> Oid {
        Value::natural_oid(self)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        TypeRegistry::global().encode(target_oid, self, buf)
    }
}
