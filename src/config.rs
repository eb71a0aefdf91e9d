use std::time::Duration;

/// Configuration for [`crate::Engine::open`], exposing per-instance knobs
/// that would otherwise be hard-coded constants.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Window over which table-change notifications are buffered and
    /// deduplicated before affected streaming queries refresh.
    pub buffer_window: Duration,
    /// Ceiling `StreamingQuery::dispose` waits for an in-flight refresh to
    /// finish before clearing the query's cache and returning anyway.
    pub dispose_timeout: Duration,
    /// Raw `PRAGMA` statements executed once, in declaration order,
    /// immediately after connecting.
    pub pragmas: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buffer_window: Duration::from_millis(50),
            dispose_timeout: Duration::from_secs(5),
            pragmas: vec!["PRAGMA foreign_keys = ON".to_string()],
        }
    }
}
