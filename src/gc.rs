//! Fileset garbage collection orchestration. A scheduled maintenance task a
//! caller runs periodically, not a background timer the engine starts
//! itself.

use std::collections::HashSet;

use crate::error::EngineError;
use crate::Engine;

impl Engine {
    /// Removes every fileset and file not named in `referenced_fileset_ids`.
    /// The caller is responsible for computing that set — typically by
    /// scanning every fileset-typed column across the schema's tables.
    pub async fn collect_fileset_garbage(
        &self,
        referenced_fileset_ids: &HashSet<String>,
    ) -> Result<fileset::gc::OrphanReport, EngineError> {
        fileset::gc::collect_orphans(&self.conn, self.file_repo.as_ref(), referenced_fileset_ids)
            .await
            .map_err(EngineError::from)
    }
}
