//! Translates the engine's [`Query`] IR into SQL via `sea_query`, the same
//! statement builder `sea_orm`'s entity API uses internally (and the one the
//! teacher's `actions::file::get_random_files` reaches for directly when the
//! typed entity API isn't expressive enough).

use sea_query::{
    Alias, Cond, Expr as SeaExpr, IntoTableRef, JoinType, Order, Query as SeaQuery,
    SelectStatement, SqliteQueryBuilder,
};

use crate::query::{Aliased, CompareOp, Expr, Join, JoinKind, OrderDir, Predicate, Query};
use crate::value::Value;

fn alias(name: &str) -> Alias {
    Alias::new(name)
}

fn expr_to_sea(expr: &Expr) -> sea_query::SimpleExpr {
    match expr {
        Expr::Column { table: Some(t), name } => SeaExpr::col((alias(t), alias(name))).into(),
        Expr::Column { table: None, name } => SeaExpr::col(alias(name)).into(),
        Expr::Literal(v) => literal_to_sea(v),
        Expr::Wildcard { table: Some(t) } => SeaExpr::col((alias(t), sea_query::Asterisk)).into(),
        Expr::Wildcard { table: None } => SeaExpr::col(sea_query::Asterisk).into(),
        Expr::Function { name, args } => {
            let sea_args: Vec<sea_query::SimpleExpr> = args.iter().map(expr_to_sea).collect();
            SeaExpr::cust_with_exprs(&format!("{name}({})", placeholders(sea_args.len())), sea_args)
        }
        Expr::Subquery(query) => {
            let stmt = to_select_statement(query);
            sea_query::SimpleExpr::SubQuery(None, Box::new(stmt.into()))
        }
        Expr::List(_) => {
            unreachable!("Expr::List only lowers through CompareOp::In, never as a bare expression")
        }
    }
}

fn placeholders(n: usize) -> String {
    (0..n).map(|_| "?").collect::<Vec<_>>().join(", ")
}

fn literal_to_sea(v: &Value) -> sea_query::SimpleExpr {
    use sea_query::Value as SV;
    let sv = match v {
        Value::Null => SV::String(None),
        Value::Text(s) => SV::String(Some(Box::new(s.clone()))),
        Value::Integer(i) => SV::BigInt(Some(*i)),
        Value::Real(f) => SV::Double(Some(*f)),
        Value::Blob(b) => SV::Bytes(Some(Box::new(b.clone()))),
    };
    SeaExpr::val(sv).into()
}

/// Exposed for callers that build DML (`UPDATE`/`DELETE ... WHERE`) rather
/// than a full `SELECT`, where reusing the same predicate translation the
/// query path uses keeps the two in lockstep.
pub fn predicate_to_sea(predicate: &Predicate) -> Cond {
    match predicate {
        Predicate::Compare { left, op, right } => {
            let l = expr_to_sea(left);
            let cmp = match op {
                CompareOp::Eq => l.eq(expr_to_sea(right)),
                CompareOp::Ne => l.ne(expr_to_sea(right)),
                CompareOp::Lt => l.lt(expr_to_sea(right)),
                CompareOp::Lte => l.lte(expr_to_sea(right)),
                CompareOp::Gt => l.gt(expr_to_sea(right)),
                CompareOp::Gte => l.gte(expr_to_sea(right)),
                CompareOp::Like => l.like(match right {
                    Expr::Literal(Value::Text(s)) => s.clone(),
                    _ => String::new(),
                }),
                CompareOp::In => {
                    let values: Vec<sea_query::SimpleExpr> = match right {
                        Expr::List(items) => items.iter().map(expr_to_sea).collect(),
                        other => vec![expr_to_sea(other)],
                    };
                    l.is_in(values)
                }
            };
            Cond::all().add(cmp)
        }
        Predicate::And(preds) => preds.iter().fold(Cond::all(), |acc, p| acc.add(predicate_to_sea(p))),
        Predicate::Or(preds) => preds.iter().fold(Cond::any(), |acc, p| acc.add(predicate_to_sea(p))),
        Predicate::Not(p) => Cond::all().not().add(predicate_to_sea(p)),
        Predicate::IsNull(e) => Cond::all().add(expr_to_sea(e).is_null()),
        Predicate::IsNotNull(e) => Cond::all().add(expr_to_sea(e).is_not_null()),
        Predicate::Raw { sql, .. } => Cond::all().add(SeaExpr::cust(sql)),
    }
}

fn join_kind_to_sea(kind: JoinKind) -> JoinType {
    match kind {
        JoinKind::Inner => JoinType::InnerJoin,
        JoinKind::Left => JoinType::LeftJoin,
    }
}

fn select_one(stmt: &mut SelectStatement, projected: &Aliased<Expr>) {
    let expr = expr_to_sea(&projected.expr);
    match &projected.alias {
        Some(a) => {
            stmt.expr_as(expr, alias(a));
        }
        None => {
            stmt.expr(expr);
        }
    }
}

fn apply_join(stmt: &mut SelectStatement, join: &Join) {
    let table_ref: sea_query::TableRef = match &join.alias {
        Some(a) => (alias(&join.table), alias(a)).into_table_ref(),
        None => alias(&join.table).into_table_ref(),
    };
    stmt.join(join_kind_to_sea(join.kind), table_ref, predicate_to_sea(&join.on));
}

/// Builds a `sea_query::SelectStatement` for `query`. Views are expected to
/// have already been inlined or resolved by the caller (the data engine
/// resolves a view name in `FROM`/`JOIN` to its underlying definition before
/// calling this); this function only lowers the IR it is given.
pub fn to_select_statement(query: &Query) -> SelectStatement {
    let mut stmt = SeaQuery::select();

    let from_ref: sea_query::TableRef = match &query.from.1 {
        Some(a) => (alias(&query.from.0), alias(a)).into_table_ref(),
        None => alias(&query.from.0).into_table_ref(),
    };
    stmt.from(from_ref);

    for join in &query.joins {
        apply_join(&mut stmt, join);
    }

    for projected in &query.select {
        select_one(&mut stmt, projected);
    }

    if let Some(filter) = &query.filter {
        stmt.cond_where(predicate_to_sea(filter));
    }

    for expr in &query.group_by {
        stmt.add_group_by([expr_to_sea(expr)]);
    }

    for (expr, dir) in &query.order_by {
        let order = match dir {
            OrderDir::Asc => Order::Asc,
            OrderDir::Desc => Order::Desc,
        };
        stmt.order_by_expr(expr_to_sea(expr), order);
    }

    if let Some(limit) = query.limit {
        stmt.limit(limit);
    }

    // `for_update_table` is intentionally not lowered: SQLite has no
    // `SELECT ... FOR UPDATE`.

    stmt
}

pub fn to_sql_string(query: &Query) -> String {
    to_select_statement(query).to_string(SqliteQueryBuilder)
}
