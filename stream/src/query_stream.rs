use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use schema::{Query, QueryDependencies, Row, Schema, Value};
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock as AsyncRwLock};

use crate::executor::QueryExecutor;
use crate::manager::{QueryStreamManager, StreamHandle};
use crate::StreamError;

type Mapper<T> = Arc<dyn Fn(Row) -> T + Send + Sync>;

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        _ => None,
    }
}

/// A live query: the `Query` IR, its computed dependencies, a hot broadcast
/// of the latest mapped result list, and a per-row cache keyed by
/// `system_id` so unchanged rows reuse the same mapped object across
/// refreshes.
pub struct StreamingQuery<T> {
    id: u64,
    schema: Arc<Schema>,
    executor: Arc<dyn QueryExecutor>,
    manager: Weak<QueryStreamManager>,
    query: AsyncRwLock<Query>,
    mapper: AsyncRwLock<Mapper<T>>,
    dependencies: StdRwLock<QueryDependencies>,
    sender: watch::Sender<Arc<Vec<T>>>,
    cache: StdMutex<HashMap<String, (T, String)>>,
    last_ids: StdMutex<Vec<String>>,
    listener_count: AtomicUsize,
    disposed: AtomicBool,
    refresh_lock: AsyncMutex<()>,
    dispose_timeout: Duration,
}

impl<T: Clone + Send + Sync + 'static> StreamingQuery<T> {
    pub fn new(
        id: u64,
        query: Query,
        schema: Arc<Schema>,
        executor: Arc<dyn QueryExecutor>,
        manager: Weak<QueryStreamManager>,
        dispose_timeout: Duration,
        mapper: impl Fn(Row) -> T + Send + Sync + 'static,
    ) -> Arc<Self> {
        let dependencies = schema::analyze(&query, &schema);
        let (sender, _receiver) = watch::channel(Arc::new(Vec::new()));
        Arc::new(StreamingQuery {
            id,
            schema,
            executor,
            manager,
            query: AsyncRwLock::new(query),
            mapper: AsyncRwLock::new(Arc::new(mapper)),
            dependencies: StdRwLock::new(dependencies),
            sender,
            cache: StdMutex::new(HashMap::new()),
            last_ids: StdMutex::new(Vec::new()),
            listener_count: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            refresh_lock: AsyncMutex::new(()),
            dispose_timeout,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dependencies(&self) -> QueryDependencies {
        self.dependencies.read().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// `onListen`: registers with the manager (first listener only) and
    /// triggers a refresh. Returns a [`Subscription`] whose `Drop`
    /// implements "on last listener gone".
    pub async fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let previous = self.listener_count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            if let Some(manager) = self.manager.upgrade() {
                manager.register(self.clone());
            }
            let _ = self.refresh().await;
        }
        Subscription {
            stream: self.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Atomically swaps the query and/or mapper. A structurally-equal
    /// `Query` is a no-op;
    /// changing the mapper invalidates the cache before refreshing.
    pub async fn update_query(&self, new_query: Option<Query>, new_mapper: Option<Mapper<T>>) {
        let mut changed = false;

        if let Some(q) = new_query {
            let mut current = self.query.write().await;
            if q != *current {
                *self.dependencies.write().unwrap() = schema::analyze(&q, &self.schema);
                *current = q;
                changed = true;
            }
        }

        if let Some(m) = new_mapper {
            *self.mapper.write().await = m;
            self.cache.lock().unwrap().clear();
            changed = true;
        }

        if changed {
            let _ = self.refresh().await;
        }
    }

    /// Executes the query and emits a new result list only if something
    /// observable changed, reusing cached mapped values for unchanged rows
    ///. Refreshes on one query are
    /// serialized by `refresh_lock`.
    pub async fn refresh(&self) -> Result<(), StreamError> {
        let _guard = self.refresh_lock.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let query = self.query.read().await.clone();
        let mapper = self.mapper.read().await.clone();
        let rows = self.executor.query_maps(&query).await?;

        let mut new_ids = Vec::with_capacity(rows.len());
        let mut incoming = Vec::with_capacity(rows.len());
        for row in rows {
            let system_id = row
                .get(schema::SYSTEM_ID)
                .and_then(as_text)
                .ok_or(StreamError::MissingSystemColumns)?;
            let system_version = row
                .get(schema::SYSTEM_VERSION)
                .and_then(as_text)
                .ok_or(StreamError::MissingSystemColumns)?;
            // The engine never emits two rows with the same system_id; this
            // guards the invariant defensively rather than trusting it.
            if new_ids.contains(&system_id) {
                continue;
            }
            new_ids.push(system_id.clone());
            incoming.push((system_id, system_version, row));
        }

        {
            let last_ids = self.last_ids.lock().unwrap();
            let cache = self.cache.lock().unwrap();
            let unchanged = *last_ids == new_ids
                && incoming
                    .iter()
                    .all(|(id, version, _)| cache.get(id).map(|(_, v)| v == version).unwrap_or(false));
            if unchanged {
                return Ok(());
            }
        }

        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut pruned_cache = HashMap::with_capacity(incoming.len());
        let mut output = Vec::with_capacity(incoming.len());
        {
            let cache = self.cache.lock().unwrap();
            for (id, version, row) in incoming {
                let mapped = match cache.get(&id) {
                    Some((value, cached_version)) if *cached_version == version => value.clone(),
                    _ => mapper(row),
                };
                pruned_cache.insert(id, (mapped.clone(), version));
                output.push(mapped);
            }
        }
        *self.cache.lock().unwrap() = pruned_cache;
        *self.last_ids.lock().unwrap() = new_ids;

        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.sender.send(Arc::new(output));
        Ok(())
    }

    fn on_listener_dropped(&self) {
        let previous = self.listener_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.last_ids.lock().unwrap().clear();
            self.cache.lock().unwrap().clear();
            if let Some(manager) = self.manager.upgrade() {
                manager.unregister_only(self.id);
            }
        }
    }

    /// Marks the query disposed, awaits any in-flight refresh (bounded by
    /// `dispose_timeout`), clears the cache, and suppresses any further
    /// emission. Idempotent: subsequent calls are no-ops.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = tokio::time::timeout(self.dispose_timeout, self.refresh_lock.lock()).await;
        self.cache.lock().unwrap().clear();
        self.last_ids.lock().unwrap().clear();
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> StreamHandle for StreamingQuery<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn dependencies(&self) -> QueryDependencies {
        StreamingQuery::dependencies(self)
    }

    fn is_disposed(&self) -> bool {
        StreamingQuery::is_disposed(self)
    }

    async fn refresh(&self) -> Result<(), StreamError> {
        StreamingQuery::refresh(self).await
    }

    async fn dispose(&self) {
        StreamingQuery::dispose(self).await
    }
}

/// A live subscription to a [`StreamingQuery`]. Dropping the last
/// `Subscription` to a query unregisters it from the manager and clears its
/// result cache without closing the
/// underlying broadcast — a later `subscribe()` reactivates it.
pub struct Subscription<T> {
    stream: Arc<StreamingQuery<T>>,
    receiver: watch::Receiver<Arc<Vec<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    pub fn latest(&self) -> Arc<Vec<T>> {
        self.receiver.borrow().clone()
    }

    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.receiver.changed().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stream.on_listener_dropped();
    }
}
