use std::collections::HashSet;

use crate::column::LogicalType;
use crate::table::Table;
use crate::view::{View, ViewDefinition};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaValidationError {
    #[error("table {table}: NOT NULL column {column} has neither a default value nor a default callback")]
    NotNullWithoutDefault { table: String, column: String },
    #[error("table {table}: LWW column {column} has unsupported logical type {ty:?} (blob and fileset columns cannot be LWW)")]
    LwwOnUnsupportedType {
        table: String,
        column: String,
        ty: LogicalType,
    },
    #[error("table {table}: keys on columns {columns:?} declare incompatible kinds")]
    ConflictingKeyShapes { table: String, columns: Vec<String> },
    #[error("view {view} definition cycles back to itself")]
    ViewCycle { view: String },
    #[error("view {view} references unknown table or view {reference}")]
    UnknownReference { view: String, reference: String },
}

/// The declarative schema: an ordered set of tables and views. This is the
/// single source of truth the migrator diffs against and the data engine
/// validates every write against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub views: Vec<View>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    /// True if `name` names either a table or a view.
    pub fn is_known_relation(&self, name: &str) -> bool {
        self.find_table(name).is_some() || self.find_view(name).is_some()
    }

    /// Runs every schema validation rule: NOT NULL columns need a default,
    /// LWW columns cannot be blob/fileset, keys on the same column set
    /// cannot disagree on kind, and view definitions cannot cycle or
    /// reference unknown relations.
    pub fn validate(&self) -> Result<(), Vec<SchemaValidationError>> {
        let mut errors = Vec::new();

        for table in &self.tables {
            for column in &table.columns {
                if column.not_null && column.default.is_none() {
                    errors.push(SchemaValidationError::NotNullWithoutDefault {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
                if column.lww
                    && matches!(column.ty, LogicalType::Blob | LogicalType::Fileset)
                {
                    errors.push(SchemaValidationError::LwwOnUnsupportedType {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        ty: column.ty,
                    });
                }
            }
            for (a, b) in table.conflicting_keys() {
                errors.push(SchemaValidationError::ConflictingKeyShapes {
                    table: table.name.clone(),
                    columns: a.columns.clone().into_iter().chain(b.columns.clone()).collect(),
                });
            }
        }

        for view in &self.views {
            let mut visited = HashSet::new();
            if let Err(e) = self.check_view_acyclic(view, &mut visited) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_view_acyclic(
        &self,
        view: &View,
        visited: &mut HashSet<String>,
    ) -> Result<(), SchemaValidationError> {
        if !visited.insert(view.name.clone()) {
            return Err(SchemaValidationError::ViewCycle {
                view: view.name.clone(),
            });
        }
        if let ViewDefinition::Query(query) = &view.definition {
            let mut referenced = vec![query.from.0.clone()];
            referenced.extend(query.joins.iter().map(|j| j.table.clone()));
            for reference in referenced {
                if reference == view.name {
                    return Err(SchemaValidationError::ViewCycle {
                        view: view.name.clone(),
                    });
                }
                if let Some(nested) = self.find_view(&reference) {
                    self.check_view_acyclic(nested, visited)?;
                } else if self.find_table(&reference).is_none() {
                    return Err(SchemaValidationError::UnknownReference {
                        view: view.name.clone(),
                        reference,
                    });
                }
            }
        }
        Ok(())
    }
}
