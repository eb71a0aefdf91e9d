use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use schema::QueryDependencies;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::StreamError;

/// Type-erased handle to a `StreamingQuery<T>` for any `T`, so the manager's
/// registry does not need to be generic over every result type in the
/// process.
#[async_trait]
pub trait StreamHandle: Send + Sync {
    fn id(&self) -> u64;
    fn dependencies(&self) -> QueryDependencies;
    fn is_disposed(&self) -> bool;
    async fn refresh(&self) -> Result<(), StreamError>;
    async fn dispose(&self);
}

type Registry = Arc<StdRwLock<HashMap<u64, Arc<dyn StreamHandle>>>>;

struct ChannelState {
    sender: async_channel::Sender<String>,
    task: JoinHandle<()>,
}

/// Global per-engine registry of active streams. Table-change notifications
/// are buffered over a 50ms
/// window and deduplicated before the affected queries refresh
/// concurrently; column-change notifications are precise enough to be rare,
/// so they bypass the buffer.
pub struct QueryStreamManager {
    active: Registry,
    channel: AsyncMutex<ChannelState>,
    buffer_window: Duration,
    dispose_timeout: Duration,
}

impl QueryStreamManager {
    pub fn new(buffer_window: Duration, dispose_timeout: Duration) -> Self {
        let active: Registry = Arc::new(StdRwLock::new(HashMap::new()));
        let (sender, task) = Self::spawn_batcher(active.clone(), buffer_window);
        QueryStreamManager {
            active,
            channel: AsyncMutex::new(ChannelState { sender, task }),
            buffer_window,
            dispose_timeout,
        }
    }

    /// The ceiling a disposed [`crate::StreamingQuery`] built through this
    /// manager waits for its in-flight refresh before giving up.
    pub fn dispose_timeout(&self) -> Duration {
        self.dispose_timeout
    }

    fn spawn_batcher(active: Registry, window: Duration) -> (async_channel::Sender<String>, JoinHandle<()>) {
        let (tx, rx) = async_channel::unbounded::<String>();
        let task = tokio::spawn(async move {
            loop {
                let first = match rx.recv().await {
                    Ok(table) => table,
                    Err(_) => break, // channel closed: manager is disposing
                };
                let mut batch = HashSet::new();
                batch.insert(first);

                let deadline = Instant::now() + window;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match tokio::time::timeout(remaining, rx.recv()).await {
                        Ok(Ok(table)) => {
                            batch.insert(table);
                        }
                        Ok(Err(_)) => break,
                        Err(_) => break, // window elapsed
                    }
                }

                Self::refresh_affected_by_tables(&active, &batch).await;
            }
        });
        (tx, task)
    }

    async fn refresh_affected_by_tables(active: &Registry, tables: &HashSet<String>) {
        let handles: Vec<Arc<dyn StreamHandle>> = {
            let guard = active.read().unwrap();
            guard
                .values()
                .filter(|h| tables.iter().any(|t| h.dependencies().affected_by_table(t)))
                .cloned()
                .collect()
        };
        for result in join_all(handles.iter().map(|h| h.refresh())).await {
            if let Err(e) = result {
                log::warn!("stream refresh failed: {e}");
            }
        }
    }

    pub fn register(&self, handle: Arc<dyn StreamHandle>) {
        self.active.write().unwrap().insert(handle.id(), handle);
    }

    /// Removes the query from the registry and disposes it.
    pub async fn unregister(&self, id: u64) {
        let handle = self.active.write().unwrap().remove(&id);
        if let Some(handle) = handle {
            handle.dispose().await;
        }
    }

    /// Removes the query from the registry without disposing it — used by
    /// the "last listener gone" path, which does not close the query's
    /// broadcast.
    pub fn unregister_only(&self, id: u64) {
        self.active.write().unwrap().remove(&id);
    }

    /// Enqueues `table` for batched, deduplicated refresh.
    /// Falls back to an immediate synchronous refresh if the buffering
    /// channel cannot accept the event, so a notification is never lost.
    pub async fn notify_table_changed(&self, table: impl Into<String>) {
        let table = table.into();
        let mut channel = self.channel.lock().await;
        if channel.sender.send(table.clone()).await.is_ok() {
            return;
        }

        // Channel observed closed: rebuild it once and retry.
        let (sender, task) = Self::spawn_batcher(self.active.clone(), self.buffer_window);
        channel.task.abort();
        channel.sender = sender;
        channel.task = task;
        if channel.sender.send(table.clone()).await.is_ok() {
            return;
        }

        // Rebuild failed too: process synchronously so the notification is
        // never silently dropped.
        let mut set = HashSet::new();
        set.insert(table);
        drop(channel);
        Self::refresh_affected_by_tables(&self.active, &set).await;
    }

    /// Same batching effect as [`Self::notify_table_changed`], used by
    /// migrations and bulk loads that touch several tables at once.
    pub async fn notify_multiple_tables_changed(&self, tables: impl IntoIterator<Item = String>) {
        for table in tables {
            self.notify_table_changed(table).await;
        }
    }

    /// Column-precise notification. Rare enough to issue directly rather
    /// than through the buffering channel.
    pub async fn notify_column_changed(&self, table: impl Into<String>, column: impl Into<String>) {
        let table = table.into();
        let column = column.into();
        let handles: Vec<Arc<dyn StreamHandle>> = {
            let guard = self.active.read().unwrap();
            guard
                .values()
                .filter(|h| h.dependencies().affected_by_column(&table, &column))
                .cloned()
                .collect()
        };
        for result in join_all(handles.iter().map(|h| h.refresh())).await {
            if let Err(e) = result {
                log::warn!("stream refresh failed: {e}");
            }
        }
    }

    /// Drops queries that have already disposed themselves but are still
    /// present in the registry (e.g. disposed directly rather than through
    /// `unregister`).
    pub fn cleanup(&self) {
        self.active.write().unwrap().retain(|_, h| !h.is_disposed());
    }

    /// Awaits outstanding refreshes, disposes every query, and closes the
    /// buffering channel.
    pub async fn dispose(&self) {
        let handles: Vec<Arc<dyn StreamHandle>> = {
            let mut guard = self.active.write().unwrap();
            guard.drain().map(|(_, h)| h).collect()
        };
        join_all(handles.iter().map(|h| h.dispose())).await;

        let channel = self.channel.lock().await;
        channel.sender.close();
        channel.task.abort();
    }
}
