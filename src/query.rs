//! Query-IR-driven read surfaces: `query`, `queryMaps`, `queryTable`, plus
//! the `rawQuery` escape hatch.

use sea_orm::{ConnectionTrait, QueryResult, Statement};
use schema::{Expr, LogicalType, Query, Row, Schema, Value, ViewDefinition};

use crate::error::EngineError;
use crate::Engine;

fn resolve_alias(query: &Query, alias_or_name: &str) -> String {
    if query.from.1.as_deref() == Some(alias_or_name) {
        return query.from.0.clone();
    }
    if let Some(join) = query.joins.iter().find(|j| j.alias.as_deref() == Some(alias_or_name)) {
        return join.table.clone();
    }
    alias_or_name.to_string()
}

fn column_logical_type(schema: &Schema, relation: &str, column: &str) -> Option<LogicalType> {
    if let Some(table) = schema.find_table(relation) {
        return table.effective_columns().into_iter().find(|c| c.name == column).map(|c| c.ty);
    }
    let view = schema.find_view(relation)?;
    match &view.definition {
        ViewDefinition::Query(inner) => {
            for projected in &inner.select {
                let out_name = match (&projected.alias, &projected.expr) {
                    (Some(alias), _) => alias.clone(),
                    (None, Expr::Column { name, .. }) => name.clone(),
                    _ => continue,
                };
                if out_name == column {
                    return match &projected.expr {
                        Expr::Column { table, name } => {
                            let inner_relation = table
                                .clone()
                                .map(|t| resolve_alias(inner, &t))
                                .unwrap_or_else(|| inner.from.0.clone());
                            column_logical_type(schema, &inner_relation, name)
                        }
                        _ => Some(LogicalType::Text),
                    };
                }
            }
            for projected in &inner.select {
                if matches!(projected.expr, Expr::Wildcard { .. }) {
                    if let Some(ty) = column_logical_type(schema, &inner.from.0, column) {
                        return Some(ty);
                    }
                }
            }
            None
        }
        ViewDefinition::RawSql(_) => Some(LogicalType::Text),
    }
}

fn expand_table_wildcard(schema: &Schema, relation: &str) -> Vec<(String, LogicalType)> {
    if let Some(table) = schema.find_table(relation) {
        return table.effective_columns().into_iter().map(|c| (c.name, c.ty)).collect();
    }
    if let Some(view) = schema.find_view(relation) {
        if let ViewDefinition::Query(inner) = &view.definition {
            return expand_select(schema, inner);
        }
    }
    Vec::new()
}

/// Resolves the ordered, typed output-column list a lowered `query` will
/// produce, so each result row can be extracted with the right
/// `QueryResult` accessor per column. Qualified wildcards (`alias.*`) and
/// plain columns resolve through views recursively; an unqualified `*`
/// expands only the query's own `FROM` relation — a deliberate
/// simplification for queries that join several tables and still project a
/// bare wildcard.
pub(crate) fn expand_select(schema: &Schema, query: &Query) -> Vec<(String, LogicalType)> {
    let mut out = Vec::new();
    for projected in &query.select {
        match &projected.expr {
            Expr::Wildcard { table: Some(t) } => {
                let relation = resolve_alias(query, t);
                out.extend(expand_table_wildcard(schema, &relation));
            }
            Expr::Wildcard { table: None } => {
                out.extend(expand_table_wildcard(schema, &query.from.0));
            }
            Expr::Column { table, name } => {
                let relation = table
                    .clone()
                    .map(|t| resolve_alias(query, &t))
                    .unwrap_or_else(|| query.from.0.clone());
                let ty = column_logical_type(schema, &relation, name).unwrap_or(LogicalType::Text);
                let out_name = projected.alias.clone().unwrap_or_else(|| name.clone());
                out.push((out_name, ty));
            }
            _ => {
                let out_name = projected.alias.clone().unwrap_or_else(|| "expr".to_string());
                out.push((out_name, LogicalType::Text));
            }
        }
    }
    out
}

/// Pragmatically inlines any view referenced by name in `query`'s rendered
/// SQL as a `(<inner SQL>) AS "name"` subquery, via textual substitution,
/// rather than extending the IR's `from`/`join` fields to carry a nested
/// `Query` — that would widen the structural-equality check the streaming
/// engine's hot-swap comparison relies on for every query, not just ones
/// that touch a view.
pub(crate) fn render_query_sql(schema: &Schema, query: &Query) -> String {
    let mut sql = schema::to_sql_string(query);
    for view in &schema.views {
        if let ViewDefinition::Query(inner) = &view.definition {
            let inner_sql = schema::to_sql_string(inner);
            let needle = format!("\"{}\"", view.name);
            let replacement = format!("({inner_sql}) AS \"{}\"", view.name);
            sql = sql.replace(&needle, &replacement);
        }
    }
    sql
}

pub(crate) fn row_from_result_typed(qr: &QueryResult, columns: &[(String, LogicalType)]) -> Row {
    let mut row = Row::new();
    for (name, ty) in columns {
        let value = match ty {
            LogicalType::Integer => qr.try_get::<Option<i64>>("", name).ok().flatten().map(Value::Integer),
            LogicalType::Real => qr.try_get::<Option<f64>>("", name).ok().flatten().map(Value::Real),
            LogicalType::Blob => qr.try_get::<Option<Vec<u8>>>("", name).ok().flatten().map(Value::Blob),
            LogicalType::Text | LogicalType::Guid | LogicalType::Date | LogicalType::Fileset => {
                qr.try_get::<Option<String>>("", name).ok().flatten().map(Value::Text)
            }
        }
        .unwrap_or(Value::Null);
        row.insert(name.clone(), value);
    }
    row
}

impl Engine {
    /// Runs `query` and returns its rows as [`Row`] maps. Rows destined for
    /// a [`stream::StreamingQuery`] must project `system_id`/`system_version`
    /// (true of any wildcard select over a user table) or the refresh will
    /// fail with `StreamError::MissingSystemColumns`.
    pub async fn query_maps(&self, query: &Query) -> Result<Vec<Row>, EngineError> {
        let columns = expand_select(&self.schema, query);
        let sql = render_query_sql(&self.schema, query);
        let stmt = Statement::from_string(self.conn.get_database_backend(), sql);
        let results = self.conn.query_all(stmt).await?;
        Ok(results.iter().map(|qr| row_from_result_typed(qr, &columns)).collect())
    }

    /// Alias for [`Engine::query_maps`]: there is no statement-builder-only
    /// surface distinct from executing and mapping to rows here — a caller
    /// wanting typed results instead goes through the typed-record factory
    /// registry over [`record::DbRecord`].
    pub async fn query(&self, query: &Query) -> Result<Vec<Row>, EngineError> {
        self.query_maps(query).await
    }

    pub async fn query_table(&self, table: &str) -> Result<Vec<Row>, EngineError> {
        self.table(table)?;
        self.query_maps(&Query::from(table)).await
    }

    /// Runs `query` and wraps each returned row as a not-new
    /// [`record::DbRecord`]. Every row's table is resolved from the query's
    /// own `FROM` clause, so
    /// this fails if `query.from.0` does not name a table in the schema
    /// (views have no `system_id` to key a record's `save()`/`reload()` on).
    pub async fn query_records(self: &std::sync::Arc<Self>, query: &Query) -> Result<Vec<record::DbRecord>, EngineError> {
        let table_def = self.table(&query.from.0)?.clone();
        let rows = self.query_maps(query).await?;
        let backend: std::sync::Arc<dyn record::RecordBackend> = self.clone();
        Ok(rows
            .into_iter()
            .map(|row| record::DbRecord::from_row(backend.clone(), table_def.clone(), row))
            .collect())
    }

    /// `queryTable(table, …) -> [DbRecord]`.
    pub async fn query_table_records(self: &std::sync::Arc<Self>, table: &str) -> Result<Vec<record::DbRecord>, EngineError> {
        self.query_records(&Query::from(table)).await
    }

    /// Runs `query` and maps each row through the typed-record factory
    /// registered for `T`. Panics naming
    /// `T` if no factory was registered — the registry's own contract, not
    /// one this surface softens.
    pub async fn query_typed<T: 'static>(self: &std::sync::Arc<Self>, query: &Query) -> Result<Vec<T>, EngineError> {
        let records = self.query_records(query).await?;
        Ok(records.into_iter().map(record::build::<T>).collect())
    }

    /// `queryTableTyped<T>`.
    pub async fn query_table_typed<T: 'static>(self: &std::sync::Arc<Self>, table: &str) -> Result<Vec<T>, EngineError> {
        self.query_typed(&Query::from(table)).await
    }

    /// Escape hatch for SQL the IR cannot express. The caller supplies the
    /// output column list explicitly since arbitrary SQL has no schema to
    /// infer it from.
    pub async fn raw_query(&self, sql: &str, columns: &[(String, LogicalType)]) -> Result<Vec<Row>, EngineError> {
        let stmt = Statement::from_string(self.conn.get_database_backend(), sql.to_string());
        let results = self.conn.query_all(stmt).await?;
        Ok(results.iter().map(|qr| row_from_result_typed(qr, columns)).collect())
    }
}
