//! The schema-diff migrator: introspects the live database, diffs it
//! against a declarative [`schema::Schema`], and executes the resulting DDL
//! plan with table-recreation fallback for unsupported ALTERs.

mod ddl;
mod diff;
mod error;
mod introspect;

pub use diff::Change;
pub use error::MigrationError;
pub use introspect::{introspect, LiveDatabase};

use log::{debug, info};
use sea_orm::{ConnectionTrait, Statement, TransactionTrait};
use schema::{Schema, Table};

/// Runs the full migrator algorithm against `conn`: introspect, diff,
/// generate, execute as a single grouped unit. If
/// any step fails the whole group is rolled back, since every statement runs
/// inside one `sea_orm` transaction.
///
/// `extra_tables` are hidden tables the caller wants diffed through the same
/// path as user tables — `__dirty_rows` and the per-fileset metadata
/// table(s); they are appended
/// to `schema`'s table list before diffing, never special-cased in DDL.
pub async fn run<C>(conn: &C, schema: &Schema, extra_tables: &[Table]) -> Result<(), MigrationError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Err(errors) = schema.validate() {
        return Err(MigrationError::SchemaValidation(errors));
    }

    let mut full_schema = schema.clone();
    full_schema.tables.extend(extra_tables.iter().cloned());

    let live = introspect::introspect(conn).await?;
    let changes = diff::diff(&full_schema, &live);

    if changes.is_empty() {
        debug!("migrator: schema already up to date, nothing to do");
        return Ok(());
    }

    info!("migrator: applying {} schema change(s)", changes.len());
    let statements = ddl::plan_statements(&changes, &full_schema.tables, &live);

    let txn = conn.begin().await?;
    for sql in &statements {
        debug!("migrator: {sql}");
        txn.execute(Statement::from_string(txn.get_database_backend(), sql.clone()))
            .await?;
    }
    txn.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;
    use schema::{Column, Key, LogicalType};

    async fn memdb() -> sea_orm::DatabaseConnection {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn users_schema(email_not_null: bool) -> Schema {
        let mut email = Column::new("email", LogicalType::Text);
        if email_not_null {
            email = email.not_null().default_value("");
        }
        Schema::new().table(
            Table::new("users")
                .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
                .column(email),
        )
    }

    #[tokio::test]
    async fn creates_table_from_empty_database() {
        let conn = memdb().await;
        run(&conn, &users_schema(false), &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        let table = live.find_table("users").unwrap();
        assert!(table.columns.iter().any(|c| c.name == "system_id"));
        assert!(table.columns.iter().any(|c| c.name == "name"));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let conn = memdb().await;
        let schema = users_schema(false);
        run(&conn, &schema, &[]).await.unwrap();
        run(&conn, &schema, &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        assert_eq!(live.tables.iter().filter(|t| t.name == "users").count(), 1);
    }

    #[tokio::test]
    async fn view_migrates_and_second_run_is_a_no_op() {
        let conn = memdb().await;
        let mut schema = users_schema(false);
        schema = schema.view(schema::View::from_query(
            "active_users",
            schema::Query::from("users").filter(schema::Predicate::IsNotNull(schema::Expr::col("name"))),
        ));
        run(&conn, &schema, &[]).await.unwrap();
        run(&conn, &schema, &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        assert_eq!(live.views.iter().filter(|v| v.name == "active_users").count(), 1);
        assert!(diff::diff(&schema, &live).is_empty());
    }

    #[tokio::test]
    async fn adding_nullable_column_does_not_recreate() {
        let conn = memdb().await;
        run(&conn, &users_schema(false), &[]).await.unwrap();

        conn.execute(Statement::from_string(
            conn.get_database_backend(),
            "INSERT INTO users (system_id, system_created_at, system_version, name) VALUES ('a', '1', '1', 'x')".to_owned(),
        ))
        .await
        .unwrap();

        run(&conn, &users_schema(false), &[]).await.unwrap();
        let live = introspect::introspect(&conn).await.unwrap();
        assert!(live.find_table("users").unwrap().columns.iter().any(|c| c.name == "email"));
    }

    #[tokio::test]
    async fn not_null_column_add_recreates_and_backfills_default() {
        let conn = memdb().await;
        run(&conn, &users_schema(false), &[]).await.unwrap();
        conn.execute(Statement::from_string(
            conn.get_database_backend(),
            "INSERT INTO users (system_id, system_created_at, system_version, name) VALUES ('a', '1', '1', 'x')".to_owned(),
        ))
        .await
        .unwrap();

        run(&conn, &users_schema(true), &[]).await.unwrap();

        use sea_orm::{FromQueryResult, Statement as Stmt};
        #[derive(FromQueryResult)]
        struct Row {
            email: String,
        }
        let row = Row::find_by_statement(Stmt::from_string(
            conn.get_database_backend(),
            "SELECT email FROM users WHERE system_id = 'a'".to_owned(),
        ))
        .one(&conn)
        .await
        .unwrap()
        .unwrap();
        assert_eq!(row.email, "");
    }

    #[tokio::test]
    async fn indexed_key_uses_create_index_not_recreation() {
        let conn = memdb().await;
        let schema = users_schema(false);
        run(&conn, &schema, &[]).await.unwrap();

        let indexed = Schema::new().table(
            Table::new("users")
                .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
                .column(Column::new("email", LogicalType::Text))
                .key(Key::indexed(["name"])),
        );
        run(&conn, &indexed, &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        let table = live.find_table("users").unwrap();
        assert!(table.indices.iter().any(|i| i.columns == vec!["name".to_string()]));
    }

    #[tokio::test]
    async fn unique_key_is_enforced_on_table_creation() {
        let conn = memdb().await;
        let schema = Schema::new().table(
            Table::new("users")
                .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
                .column(Column::new("email", LogicalType::Text))
                .key(Key::unique(["email"])),
        );
        run(&conn, &schema, &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        let table = live.find_table("users").unwrap();
        assert!(table
            .indices
            .iter()
            .any(|i| i.columns == vec!["email".to_string()] && i.unique));

        use sea_orm::{ConnectionTrait, Statement as Stmt};
        let insert = |id: &str, name: &str| {
            format!(
                "INSERT INTO users (system_id, system_created_at, system_version, name, email) \
                 VALUES ('{id}', '0', '0', '{name}', 'dup@example.com')"
            )
        };
        conn.execute(Stmt::from_string(conn.get_database_backend(), insert("a", "x")))
            .await
            .unwrap();
        let dup = conn
            .execute(Stmt::from_string(conn.get_database_backend(), insert("b", "y")))
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn adding_unique_key_to_existing_table_does_not_recreate() {
        let conn = memdb().await;
        let schema = users_schema(false);
        run(&conn, &schema, &[]).await.unwrap();

        let unique = Schema::new().table(
            Table::new("users")
                .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
                .column(Column::new("email", LogicalType::Text))
                .key(Key::unique(["email"])),
        );
        run(&conn, &unique, &[]).await.unwrap();

        let live = introspect::introspect(&conn).await.unwrap();
        let table = live.find_table("users").unwrap();
        assert!(table
            .indices
            .iter()
            .any(|i| i.columns == vec!["email".to_string()] && i.unique));
    }

    #[tokio::test]
    async fn drop_table_removes_it() {
        let conn = memdb().await;
        run(&conn, &users_schema(false), &[]).await.unwrap();
        run(&conn, &Schema::new(), &[]).await.unwrap();
        let live = introspect::introspect(&conn).await.unwrap();
        assert!(live.find_table("users").is_none());
    }
}
