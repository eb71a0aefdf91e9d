//! Schema-aware dependency analysis: turns a [`Query`] into the set of
//! tables and columns it reads. This is the authoritative analyzer; there is
//! no SQL-regex fallback.

use std::collections::HashSet;

use crate::query::{Expr, Predicate, Query};
use crate::schema::Schema;
use crate::view::ViewDefinition;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryDependencies {
    pub tables: HashSet<String>,
    pub columns: HashSet<(String, String)>,
    pub uses_wildcard: bool,
}

impl QueryDependencies {
    fn merge(&mut self, other: QueryDependencies) {
        self.tables.extend(other.tables);
        self.columns.extend(other.columns);
        self.uses_wildcard |= other.uses_wildcard;
    }

    /// Whether a write to `table` could affect a query with these
    /// dependencies. False positives are fine (extra refreshes); false
    /// negatives are a correctness bug (staleness).
    pub fn affected_by_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn affected_by_column(&self, table: &str, column: &str) -> bool {
        self.columns.contains(&(table.to_string(), column.to_string()))
            || (self.uses_wildcard && self.tables.contains(table))
    }
}

/// Analyzes `query` against `schema`, recursing through any views it (or its
/// joins, subqueries, or nested views) reference. `visited` guards against
/// view-definition cycles; schema validation should already reject those,
/// but this analyzer does not trust that invariant blindly.
pub fn analyze(query: &Query, schema: &Schema) -> QueryDependencies {
    let mut visited = HashSet::new();
    analyze_inner(query, schema, &mut visited)
}

fn resolve(name: &str, schema: &Schema, visited: &mut HashSet<String>, deps: &mut QueryDependencies) {
    if let Some(view) = schema.find_view(name) {
        if !visited.insert(name.to_string()) {
            return; // cycle guard; schema validation should have rejected this already
        }
        match &view.definition {
            ViewDefinition::Query(inner) => {
                let inner_deps = analyze_inner(inner, schema, visited);
                deps.merge(inner_deps);
            }
            ViewDefinition::RawSql(_) => {
                // The IR cannot see into raw SQL views; callers that define
                // views this way must accept over-notification is not
                // possible here — mark every declared table as a dependency
                // so writes are never silently missed.
                for table in &schema.tables {
                    deps.tables.insert(table.name.clone());
                }
                deps.uses_wildcard = true;
            }
        }
    } else {
        deps.tables.insert(name.to_string());
    }
}

fn analyze_inner(query: &Query, schema: &Schema, visited: &mut HashSet<String>) -> QueryDependencies {
    let mut deps = QueryDependencies::default();

    resolve(&query.from.0, schema, visited, &mut deps);
    for join in &query.joins {
        resolve(&join.table, schema, visited, &mut deps);
        walk_predicate(&join.on, query, schema, visited, &mut deps);
    }

    for projected in &query.select {
        walk_expr(&projected.expr, query, schema, visited, &mut deps);
    }

    if let Some(filter) = &query.filter {
        walk_predicate(filter, query, schema, visited, &mut deps);
    }

    for expr in &query.group_by {
        walk_expr(expr, query, schema, visited, &mut deps);
    }

    for (expr, _) in &query.order_by {
        walk_expr(expr, query, schema, visited, &mut deps);
    }

    deps
}

fn resolved_table_name(alias_or_name: &str, query: &Query) -> String {
    // Reverse-resolve an alias back to its real table/view name.
    if query.from.1.as_deref() == Some(alias_or_name) {
        return query.from.0.clone();
    }
    if let Some(join) = query
        .joins
        .iter()
        .find(|j| j.alias.as_deref() == Some(alias_or_name))
    {
        return join.table.clone();
    }
    alias_or_name.to_string()
}

fn walk_expr(
    expr: &Expr,
    query: &Query,
    schema: &Schema,
    visited: &mut HashSet<String>,
    deps: &mut QueryDependencies,
) {
    match expr {
        Expr::Wildcard { table: Some(t) } => {
            let resolved = resolved_table_name(t, query);
            resolve(&resolved, schema, visited, deps);
            deps.uses_wildcard = true;
        }
        Expr::Wildcard { table: None } => {
            deps.uses_wildcard = true;
            resolve(&query.from.0, schema, visited, deps);
        }
        Expr::Column { table: Some(t), name } => {
            let resolved = resolved_table_name(t, query);
            resolve(&resolved, schema, visited, deps);
            deps.columns.insert((resolved, name.clone()));
        }
        Expr::Column { table: None, name } => {
            resolve(&query.from.0, schema, visited, deps);
            deps.columns.insert((query.from.0.clone(), name.clone()));
        }
        Expr::Literal(_) => {}
        Expr::Function { args, .. } => {
            for arg in args {
                walk_expr(arg, query, schema, visited, deps);
            }
        }
        Expr::Subquery(inner) => {
            let inner_deps = analyze_inner(inner, schema, visited);
            deps.merge(inner_deps);
        }
        Expr::List(items) => {
            for item in items {
                walk_expr(item, query, schema, visited, deps);
            }
        }
    }
}

fn walk_predicate(
    predicate: &Predicate,
    query: &Query,
    schema: &Schema,
    visited: &mut HashSet<String>,
    deps: &mut QueryDependencies,
) {
    match predicate {
        Predicate::Compare { left, right, .. } => {
            walk_expr(left, query, schema, visited, deps);
            walk_expr(right, query, schema, visited, deps);
        }
        Predicate::And(preds) | Predicate::Or(preds) => {
            for p in preds {
                walk_predicate(p, query, schema, visited, deps);
            }
        }
        Predicate::Not(p) => walk_predicate(p, query, schema, visited, deps),
        Predicate::IsNull(e) | Predicate::IsNotNull(e) => {
            walk_expr(e, query, schema, visited, deps)
        }
        Predicate::Raw { touches, .. } => {
            for (table, column) in touches {
                let t = table.clone().unwrap_or_else(|| query.from.0.clone());
                resolve(&t, schema, visited, deps);
                deps.columns.insert((t, column.clone()));
            }
        }
    }
}
