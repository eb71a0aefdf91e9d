//! The engine's declarative schema model, its Query IR, and the schema-aware
//! dependency analyzer that turns a query into the set of tables/columns it
//! reads. Everything here is a pure, I/O-free value type; the crates that
//! need a live database (`migrate`, `engine`) sit on top of this one.

mod builder;
mod column;
mod depend;
mod key;
mod query;
mod row;
mod schema;
mod table;
mod value;
mod view;

pub use builder::{predicate_to_sea, to_select_statement, to_sql_string};
pub use column::{Column, ColumnDefault, LogicalType};
pub use depend::{analyze, QueryDependencies};
pub use key::{Key, KeyKind};
pub use query::{Aliased, CompareOp, Expr, Join, JoinKind, OrderDir, Predicate, Query};
pub use row::Row;
pub use schema::{Schema, SchemaValidationError};
pub use table::{Table, SYSTEM_CREATED_AT, SYSTEM_ID, SYSTEM_VERSION};
pub use value::Value;
pub use view::{View, ViewDefinition};

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> Schema {
        Schema::new().table(
            Table::new("users")
                .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
                .column(Column::new("age", LogicalType::Integer).not_null().default_value(0))
                .column(Column::new("email", LogicalType::Text).lww()),
        )
    }

    #[test]
    fn effective_columns_include_system_and_hlc_companions() {
        let schema = users_schema();
        let users = schema.find_table("users").unwrap();
        let names: Vec<_> = users.effective_columns().into_iter().map(|c| c.name).collect();
        assert!(names.contains(&SYSTEM_ID.to_string()));
        assert!(names.contains(&SYSTEM_CREATED_AT.to_string()));
        assert!(names.contains(&SYSTEM_VERSION.to_string()));
        assert!(names.contains(&"email__hlc".to_string()));
    }

    #[test]
    fn validate_rejects_not_null_without_default() {
        let schema = Schema::new().table(
            Table::new("t").column(Column::new("a", LogicalType::Text).not_null()),
        );
        let errors = schema.validate().unwrap_err();
        assert!(matches!(
            errors[0],
            SchemaValidationError::NotNullWithoutDefault { .. }
        ));
    }

    #[test]
    fn validate_rejects_lww_on_blob() {
        let schema = Schema::new().table(
            Table::new("t").column(Column::new("blob_col", LogicalType::Blob).lww()),
        );
        let errors = schema.validate().unwrap_err();
        assert!(matches!(
            errors[0],
            SchemaValidationError::LwwOnUnsupportedType { .. }
        ));
    }

    #[test]
    fn validate_rejects_conflicting_key_shapes() {
        let schema = Schema::new().table(
            Table::new("t")
                .column(Column::new("a", LogicalType::Text).not_null().default_value(""))
                .key(Key::unique(["a"]))
                .key(Key::indexed(["a"])),
        );
        let errors = schema.validate().unwrap_err();
        assert!(matches!(
            errors[0],
            SchemaValidationError::ConflictingKeyShapes { .. }
        ));
    }

    #[test]
    fn dependency_analysis_resolves_wildcard_and_columns() {
        let schema = users_schema();
        let query = Query::from("users").filter(Predicate::Compare {
            left: Expr::col("age"),
            op: CompareOp::Gte,
            right: Expr::Literal(Value::Integer(18)),
        });
        let deps = analyze(&query, &schema);
        assert!(deps.uses_wildcard);
        assert!(deps.affected_by_table("users"));
        assert!(deps.affected_by_column("users", "age"));
    }

    #[test]
    fn dependency_analysis_recurses_through_views() {
        let mut schema = users_schema();
        let adults = View::from_query(
            "adults",
            Query::from("users").filter(Predicate::Compare {
                left: Expr::col("age"),
                op: CompareOp::Gte,
                right: Expr::Literal(Value::Integer(18)),
            }),
        );
        schema = schema.view(adults);

        let query = Query::from("adults");
        let deps = analyze(&query, &schema);
        assert!(deps.affected_by_table("users"));
    }

    #[test]
    fn view_cycle_is_rejected() {
        let schema = Schema::new()
            .view(View::from_query("a", Query::from("b")))
            .view(View::from_query("b", Query::from("a")));
        let errors = schema.validate().unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, SchemaValidationError::ViewCycle { .. })));
    }

    #[test]
    fn query_structural_equality_drives_hot_swap() {
        let a = Query::from("users").filter(Predicate::IsNull(Expr::col("email")));
        let b = Query::from("users").filter(Predicate::IsNull(Expr::col("email")));
        let c = Query::from("users").filter(Predicate::IsNotNull(Expr::col("email")));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn in_predicate_lowers_to_a_real_value_set() {
        let predicate = Predicate::Compare {
            left: Expr::col("age"),
            op: CompareOp::In,
            right: Expr::list([Value::Integer(18), Value::Integer(21), Value::Integer(30)]),
        };
        let query = Query::from("users").filter(predicate);
        let sql = to_sql_string(&query);
        assert!(sql.contains("IN"));
        assert!(sql.contains("18"));
        assert!(sql.contains("21"));
        assert!(sql.contains("30"));
        assert!(!sql.contains("IN ()"));
    }

    #[test]
    fn in_predicate_dependencies_cover_every_listed_value() {
        let schema = users_schema();
        let query = Query::from("users").filter(Predicate::Compare {
            left: Expr::col("age"),
            op: CompareOp::In,
            right: Expr::list([Value::Integer(18), Value::Integer(21)]),
        });
        let deps = analyze(&query, &schema);
        assert!(deps.affected_by_column("users", "age"));
    }
}
