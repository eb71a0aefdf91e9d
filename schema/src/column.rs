use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The logical type of a column, independent of the SQL affinity the
/// migrator eventually chooses for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Text,
    Integer,
    Real,
    Date,
    Guid,
    Blob,
    Fileset,
}

/// How a column's value is filled in when absent from an `insert`.
#[derive(Clone)]
pub enum ColumnDefault {
    None,
    Literal(Value),
    Callback(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl ColumnDefault {
    pub fn resolve(&self) -> Option<Value> {
        match self {
            ColumnDefault::None => None,
            ColumnDefault::Literal(v) => Some(v.clone()),
            ColumnDefault::Callback(f) => Some(f()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ColumnDefault::None)
    }
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::None => write!(f, "ColumnDefault::None"),
            ColumnDefault::Literal(v) => write!(f, "ColumnDefault::Literal({v:?})"),
            ColumnDefault::Callback(_) => write!(f, "ColumnDefault::Callback(<fn>)"),
        }
    }
}

impl PartialEq for ColumnDefault {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnDefault::None, ColumnDefault::None) => true,
            (ColumnDefault::Literal(a), ColumnDefault::Literal(b)) => a == b,
            // Callbacks are never structurally comparable; two callback
            // defaults are only equal if they're the same column definition.
            (ColumnDefault::Callback(a), ColumnDefault::Callback(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: LogicalType,
    pub not_null: bool,
    pub default: ColumnDefault,
    pub lww: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Column {
            name: name.into(),
            ty,
            not_null: false,
            default: ColumnDefault::None,
            lww: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = ColumnDefault::Literal(value.into());
        self
    }

    pub fn default_callback(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = ColumnDefault::Callback(Arc::new(f));
        self
    }

    pub fn lww(mut self) -> Self {
        self.lww = true;
        self
    }

    /// Name of this column's companion HLC column, e.g. `email` -> `email__hlc`.
    /// Only meaningful when `self.lww` is set.
    pub fn hlc_companion_name(&self) -> String {
        format!("{}__hlc", self.name)
    }
}
