use crate::query::Query;

#[derive(Clone, Debug, PartialEq)]
pub enum ViewDefinition {
    Query(Query),
    RawSql(String),
}

/// A read-only named query. Views are resolved wherever a table name could
/// appear: in a `FROM`, a `JOIN`, or as a dependency-analysis target.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub name: String,
    pub definition: ViewDefinition,
}

impl View {
    pub fn from_query(name: impl Into<String>, query: Query) -> Self {
        View {
            name: name.into(),
            definition: ViewDefinition::Query(query),
        }
    }

    pub fn from_raw_sql(name: impl Into<String>, sql: impl Into<String>) -> Self {
        View {
            name: name.into(),
            definition: ViewDefinition::RawSql(sql.into()),
        }
    }
}
