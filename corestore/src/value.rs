//! Backend-neutral runtime value.
//!
//! [`Value`] is what flows through the query builder, the validation
//! pipeline, and row decoding. Each backend adapter is responsible for
//! converting to and from its own wire representation (`sqlx::Postgres`
//! arguments, `rusqlite::types::Value`).

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, NaiveDateTime, DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single scalar or composite value held by a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    /// Ordered collection, backing `Array` fields and `Includes` comparisons.
    Array(Vec<Value>),
    /// Unordered collection, backing `Set` fields.
    Set(Vec<Value>),
    /// A foreign object id, backing `Object`/`Reference` fields.
    ObjectId(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<i64> {
        match self {
            Value::ObjectId(id) => Some(*id),
            Value::BigInt(id) => Some(*id),
            Value::Int(id) => Some(*id as i64),
            _ => None,
        }
    }

    /// The name used for error messages and migration DDL; not necessarily
    /// the backend's own type name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::ObjectId(_) => "object",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A materialized row: field name to value, in declaration order.
pub type ValueRow = BTreeMap<String, Value>;
