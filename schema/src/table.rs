use crate::column::{Column, LogicalType};
use crate::key::{Key, KeyKind};

pub const SYSTEM_ID: &str = "system_id";
pub const SYSTEM_CREATED_AT: &str = "system_created_at";
pub const SYSTEM_VERSION: &str = "system_version";

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub keys: Vec<Key>,
    /// Whether `system_id`/`system_created_at`/`system_version` (and, per
    /// LWW column, its `*__hlc` companion) are implicitly added to this
    /// table. Every user-facing table opts in; the engine's own hidden
    /// tables (`__dirty_rows`, fileset metadata) do not.
    pub system_columns: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
            keys: Vec::new(),
            system_columns: true,
        }
    }

    pub fn without_system_columns(mut self) -> Self {
        self.system_columns = false;
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn key(mut self, key: Key) -> Self {
        self.keys.push(key);
        self
    }

    /// The declared columns plus the system columns and LWW companion
    /// columns this table implicitly carries. This is the authoritative
    /// column list the migrator diffs against and the data engine validates
    /// writes against.
    pub fn effective_columns(&self) -> Vec<Column> {
        let mut cols = Vec::with_capacity(self.columns.len() + 4);
        if self.system_columns {
            cols.push(Column::new(SYSTEM_ID, LogicalType::Guid).not_null());
            cols.push(Column::new(SYSTEM_CREATED_AT, LogicalType::Text).not_null());
            cols.push(Column::new(SYSTEM_VERSION, LogicalType::Text).not_null());
        }
        for c in &self.columns {
            cols.push(c.clone());
            if c.lww {
                cols.push(Column::new(c.hlc_companion_name(), LogicalType::Text));
            }
        }
        cols
    }

    /// The declared keys plus the implicit `system_id` primary key when this
    /// table carries system columns.
    pub fn effective_keys(&self) -> Vec<Key> {
        let mut keys = self.keys.clone();
        if self.system_columns {
            keys.push(Key::primary([SYSTEM_ID]));
        }
        keys
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        if self.system_columns && (name == SYSTEM_ID || name == SYSTEM_CREATED_AT || name == SYSTEM_VERSION) {
            return None; // synthesized on demand by effective_columns, not stored inline
        }
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.effective_columns().iter().any(|c| c.name == name)
    }

    pub fn lww_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.lww)
    }

    /// Conflicting key shapes declared on the same column set (SchemaValidation).
    pub fn conflicting_keys(&self) -> Vec<(&Key, &Key)> {
        let mut out = Vec::new();
        for (i, a) in self.keys.iter().enumerate() {
            for b in &self.keys[i + 1..] {
                if a.conflicts_with(b) {
                    out.push((a, b));
                }
            }
        }
        out
    }

    pub fn primary_key_columns(&self) -> Vec<String> {
        self.effective_keys()
            .iter()
            .find(|k| k.kind == KeyKind::Primary)
            .map(|k| k.columns.clone())
            .unwrap_or_default()
    }
}
