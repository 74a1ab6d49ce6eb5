//! A single slab migration.

use std::sync::Arc;

use keel_types::{MigrationResult, UnhealthySlab};
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::error::{JobError, MigrateError};
use crate::worker::Worker;

/// One scheduling attempt for one slab.
///
/// Created when handed to a worker task and consumed exactly once.
pub struct Job {
    /// The slab to migrate.
    pub slab: UnhealthySlab,
    /// Position of the slab in the batch at dispatch time.
    pub index: usize,
    /// Size of the batch at dispatch time.
    pub batch_size: usize,
    /// Contract set to migrate onto.
    pub set: String,
    coordinator: Arc<dyn Coordinator>,
}

impl Job {
    /// Create a job for `slab` at `index` of a batch of `batch_size`.
    pub fn new(
        slab: UnhealthySlab,
        index: usize,
        batch_size: usize,
        set: String,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        Self {
            slab,
            index,
            batch_size,
            set,
            coordinator,
        }
    }

    /// `"<index+1>/<batch_size>"`, for logging.
    pub fn progress(&self) -> String {
        format!("{}/{}", self.index + 1, self.batch_size)
    }

    /// Fetch the slab body and have `worker` migrate it.
    ///
    /// A worker response carrying an embedded error is returned inside the
    /// [`JobError`] so callers can still inspect the surcharge flag.
    #[tracing::instrument(skip(self, worker), fields(key = %self.slab.key, progress = %self.progress()))]
    pub async fn execute(&self, worker: &dyn Worker) -> Result<MigrationResult, JobError> {
        let slab = self
            .coordinator
            .slab(&self.slab.key)
            .await
            .map_err(|e| JobError::new(MigrateError::SlabLookup(Box::new(e))))?;

        debug!(shards = slab.shards.len(), set = %self.set, "migrating slab");

        let result = worker
            .migrate_slab(&slab, &self.set)
            .await
            .map_err(|e| JobError::new(MigrateError::Migration(Box::new(e))))?;

        match result.error.clone() {
            Some(msg) if !msg.is_empty() => Err(JobError {
                source: MigrateError::Remote(msg),
                result,
            }),
            _ => Ok(result),
        }
    }
}
