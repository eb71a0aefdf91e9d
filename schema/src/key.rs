use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    Primary,
    Unique,
    Indexed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    pub columns: Vec<String>,
    pub kind: KeyKind,
}

impl Key {
    pub fn primary(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Key {
            columns: columns.into_iter().map(Into::into).collect(),
            kind: KeyKind::Primary,
        }
    }

    pub fn unique(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Key {
            columns: columns.into_iter().map(Into::into).collect(),
            kind: KeyKind::Unique,
        }
    }

    pub fn indexed(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Key {
            columns: columns.into_iter().map(Into::into).collect(),
            kind: KeyKind::Indexed,
        }
    }

    /// A deterministic index/constraint name derived from table + columns,
    /// since the declarative schema does not require the caller to name keys.
    pub fn name(&self, table: &str) -> String {
        let prefix = match self.kind {
            KeyKind::Primary => "pk",
            KeyKind::Unique => "uq",
            KeyKind::Indexed => "idx",
        };
        format!("{prefix}_{table}_{}", self.columns.join("_"))
    }

    /// Two keys have incompatible shapes on the same column set (a schema
    /// validation error) if they cover the same columns with a different
    /// kind.
    pub fn conflicts_with(&self, other: &Key) -> bool {
        self.columns == other.columns && self.kind != other.kind
    }
}
