//! The engine's own scalar value type, and its conversion to/from the
//! driver-level `sea_orm::Value`. Kept separate from `sea_orm::Value` so that
//! the schema model does not leak driver-specific variants (e.g. sea_orm's
//! many integer widths) into the declarative layer.

use sea_orm::Value as DriverValue;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<Value> for DriverValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => DriverValue::String(None),
            Value::Text(s) => DriverValue::String(Some(Box::new(s))),
            Value::Integer(i) => DriverValue::BigInt(Some(i)),
            Value::Real(f) => DriverValue::Double(Some(f)),
            Value::Blob(b) => DriverValue::Bytes(Some(Box::new(b))),
        }
    }
}

impl From<&Value> for DriverValue {
    fn from(v: &Value) -> Self {
        v.clone().into()
    }
}

impl From<DriverValue> for Value {
    fn from(v: DriverValue) -> Self {
        match v {
            DriverValue::String(Some(s)) => Value::Text(*s),
            DriverValue::String(None) => Value::Null,
            DriverValue::BigInt(Some(i)) => Value::Integer(i),
            DriverValue::BigInt(None) => Value::Null,
            DriverValue::Int(Some(i)) => Value::Integer(i as i64),
            DriverValue::Int(None) => Value::Null,
            DriverValue::Double(Some(f)) => Value::Real(f),
            DriverValue::Double(None) => Value::Null,
            DriverValue::Float(Some(f)) => Value::Real(f as f64),
            DriverValue::Float(None) => Value::Null,
            DriverValue::Bytes(Some(b)) => Value::Blob(*b),
            DriverValue::Bytes(None) => Value::Null,
            DriverValue::Bool(Some(b)) => Value::Integer(b as i64),
            DriverValue::Bool(None) => Value::Null,
            _ => Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}
