//! The engine's own value-typed representation of a SELECT query. Two
//! `Query` values compare equal iff every component compares equal; that
//! structural equality is what drives the streaming engine's hot-swap check
//! (a caller handing a `StreamingQuery` a new, but structurally identical,
//! `Query` is a no-op).

use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Unqualified or qualified column reference. `table` is `None` when the
    /// caller wrote a bare column name; the dependency analyzer resolves it
    /// against the query's `FROM` table.
    Column { table: Option<String>, name: String },
    Literal(Value),
    /// `*` or `alias.*`.
    Wildcard { table: Option<String> },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Subquery(Box<Query>),
    /// A literal value set, valid only as the right-hand side of a
    /// `CompareOp::In` comparison.
    List(Vec<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn wildcard() -> Self {
        Expr::Wildcard { table: None }
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Expr::List(values.into_iter().map(Expr::Literal).collect())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aliased<T> {
    pub expr: T,
    pub alias: Option<String>,
}

impl<T> Aliased<T> {
    pub fn new(expr: T) -> Self {
        Aliased { expr, alias: None }
    }

    pub fn aliased(expr: T, alias: impl Into<String>) -> Self {
        Aliased {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    IsNull(Expr),
    IsNotNull(Expr),
    /// An opaque placeholder-bound fragment for predicates the IR cannot
    /// express structurally (rare; dependency analysis treats bound column
    /// names passed alongside it as the ground truth for its dependencies).
    Raw { sql: String, touches: Vec<(Option<String>, String)> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub on: Predicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub from: (String, Option<String>),
    pub joins: Vec<Join>,
    pub select: Vec<Aliased<Expr>>,
    pub filter: Option<Predicate>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<(Expr, OrderDir)>,
    pub limit: Option<u64>,
    pub for_update_table: Option<String>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Query {
            from: (table.into(), None),
            joins: Vec::new(),
            select: vec![Aliased::new(Expr::wildcard())],
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            for_update_table: None,
        }
    }

    pub fn from_aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        let mut query = Query::from(table);
        query.from.1 = Some(alias.into());
        query
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn select(mut self, columns: Vec<Aliased<Expr>>) -> Self {
        self.select = columns;
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn order_by(mut self, expr: Expr, dir: OrderDir) -> Self {
        self.order_by.push((expr, dir));
        self
    }

    pub fn for_update(mut self, table: impl Into<String>) -> Self {
        self.for_update_table = Some(table.into());
        self
    }

    /// The alias under which `table` is known within this query's FROM/JOIN
    /// clauses, if any; used to resolve qualified column references back to
    /// a real table name.
    pub fn alias_for_table(&self, table: &str) -> Option<&str> {
        if self.from.0 == table {
            return self.from.1.as_deref();
        }
        self.joins
            .iter()
            .find(|j| j.table == table)
            .and_then(|j| j.alias.as_deref())
    }
}
