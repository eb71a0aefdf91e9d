//! The reactive streaming-query engine: `StreamingQuery` instances fed
//! through a `QueryStreamManager` that buffers table-change notifications,
//! deduplicates them, and fans out concurrent refreshes.

mod executor;
mod manager;
mod query_stream;

pub use executor::QueryExecutor;
pub use manager::{QueryStreamManager, StreamHandle};
pub use query_stream::{StreamingQuery, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("query executor failed: {0}")]
    Executor(String),
    #[error("result row is missing system_id/system_version")]
    MissingSystemColumns,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use schema::{Column, LogicalType, Query, Row, Schema, Table, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeExecutor {
        rows: Mutex<Vec<Row>>,
        calls: Mutex<usize>,
    }

    impl FakeExecutor {
        fn new(rows: Vec<Row>) -> Arc<Self> {
            Arc::new(FakeExecutor {
                rows: Mutex::new(rows),
                calls: Mutex::new(0),
            })
        }

        fn set_rows(&self, rows: Vec<Row>) {
            *self.rows.lock().unwrap() = rows;
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn query_maps(&self, _query: &Query) -> Result<Vec<Row>, StreamError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn row(id: &str, version: &str, name: &str) -> Row {
        Row::new()
            .with(schema::SYSTEM_ID, Value::Text(id.to_string()))
            .with(schema::SYSTEM_VERSION, Value::Text(version.to_string()))
            .with("name", Value::Text(name.to_string()))
    }

    fn users_schema() -> Arc<Schema> {
        Arc::new(Schema::new().table(
            Table::new("users").column(Column::new("name", LogicalType::Text).not_null().default_value("")),
        ))
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Mapped(String);

    #[tokio::test]
    async fn empty_result_emits_empty_list_on_first_subscription() {
        let executor = FakeExecutor::new(vec![]);
        let stream = StreamingQuery::new(
            1,
            Query::from("users"),
            users_schema(),
            executor,
            std::sync::Weak::new(),
            Duration::from_secs(5),
            |r: Row| Mapped(r.get("name").unwrap().clone().to_string_lossy()),
        );
        let sub = stream.subscribe().await;
        assert!(sub.latest().is_empty());
    }

    #[tokio::test]
    async fn unchanged_rows_reuse_cached_mapped_value() {
        let executor = FakeExecutor::new(vec![row("a", "v1", "Alice")]);
        let mapper_calls = Arc::new(Mutex::new(0));
        let calls = mapper_calls.clone();
        let stream = StreamingQuery::new(
            1,
            Query::from("users"),
            users_schema(),
            executor.clone(),
            std::sync::Weak::new(),
            Duration::from_secs(5),
            move |r: Row| {
                *calls.lock().unwrap() += 1;
                Mapped(r.get("name").unwrap().clone().to_string_lossy())
            },
        );
        let sub = stream.subscribe().await;
        let first = sub.latest();
        assert_eq!(first.len(), 1);

        // Same rows, same system_version: refresh should not re-invoke the
        // mapper or emit a new list.
        stream.refresh().await.unwrap();
        assert_eq!(*mapper_calls.lock().unwrap(), 1);
        assert!(Arc::ptr_eq(&first, &sub.latest()));
    }

    #[tokio::test]
    async fn changed_version_invokes_mapper_again() {
        let executor = FakeExecutor::new(vec![row("a", "v1", "Alice")]);
        let stream = StreamingQuery::new(
            1,
            Query::from("users"),
            users_schema(),
            executor.clone(),
            std::sync::Weak::new(),
            Duration::from_secs(5),
            |r: Row| Mapped(r.get("name").unwrap().clone().to_string_lossy()),
        );
        let _sub = stream.subscribe().await;
        executor.set_rows(vec![row("a", "v2", "Alicia")]);
        stream.refresh().await.unwrap();
        let mut rx = stream.subscribe().await;
        rx.changed().await.ok();
    }

    #[tokio::test]
    async fn dependency_gating_ignores_unrelated_table() {
        let schema = users_schema();
        let query = Query::from("users");
        let deps = schema::analyze(&query, &schema);
        assert!(deps.affected_by_table("users"));
        assert!(!deps.affected_by_table("orders"));
    }

    #[tokio::test]
    async fn manager_batches_three_rapid_notifications_into_one_refresh() {
        let executor = FakeExecutor::new(vec![row("a", "v1", "Alice")]);
        let manager = Arc::new(QueryStreamManager::new(Duration::from_millis(50), Duration::from_secs(5)));
        let stream = StreamingQuery::new(
            1,
            Query::from("users"),
            users_schema(),
            executor.clone(),
            Arc::downgrade(&manager),
            manager.dispose_timeout(),
            |r: Row| Mapped(r.get("name").unwrap().clone().to_string_lossy()),
        );
        let _sub = stream.subscribe().await;
        let calls_before = executor.call_count();

        manager.notify_table_changed("users").await;
        manager.notify_table_changed("users").await;
        manager.notify_table_changed("users").await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        // One subscribe-triggered refresh plus exactly one batched refresh.
        assert_eq!(executor.call_count(), calls_before + 1);
    }

    #[tokio::test]
    async fn unregistering_last_subscriber_clears_cache() {
        let executor = FakeExecutor::new(vec![row("a", "v1", "Alice")]);
        let manager = Arc::new(QueryStreamManager::new(Duration::from_millis(10), Duration::from_secs(5)));
        let stream = StreamingQuery::new(
            1,
            Query::from("users"),
            users_schema(),
            executor,
            Arc::downgrade(&manager),
            manager.dispose_timeout(),
            |r: Row| Mapped(r.get("name").unwrap().clone().to_string_lossy()),
        );
        let sub = stream.subscribe().await;
        drop(sub);
        // give the sync unregister a beat — it runs inline in Drop, no await needed,
        // but this keeps the test robust if that ever changes.
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.cleanup();
    }

    trait ValueExt {
        fn to_string_lossy(self) -> String;
    }

    impl ValueExt for Value {
        fn to_string_lossy(self) -> String {
            match self {
                Value::Text(s) => s,
                other => format!("{other:?}"),
            }
        }
    }
}
