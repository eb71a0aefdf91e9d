use async_trait::async_trait;
use schema::{Query, Row};

use crate::StreamError;

/// The engine operation a [`StreamingQuery`](crate::StreamingQuery) drives
/// its refreshes through. Implemented by `engine::Engine` so this crate
/// never depends on it directly, keeping the generic algorithm and the
/// concrete backend in separate crates.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query_maps(&self, query: &Query) -> Result<Vec<Row>, StreamError>;
}
