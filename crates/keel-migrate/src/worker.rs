//! Workers and the pool the migrator fans out to.

use std::sync::{Arc, RwLock};

use keel_types::{MigrationResult, Slab};

use crate::error::MigrateError;

/// A remote executor capable of migrating one slab at a time per call.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier of the worker. Failing this means the worker is
    /// unreachable.
    async fn id(&self) -> Result<String, MigrateError>;

    /// Move the slab's unhealthy shards onto contracts of the given set.
    async fn migrate_slab(&self, slab: &Slab, set: &str) -> Result<MigrationResult, MigrateError>;
}

/// The set of workers currently available to the migrator.
///
/// The host may swap workers at any time; a migration run takes a snapshot
/// when it starts.
#[derive(Default)]
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<dyn Worker>>>,
}

impl WorkerPool {
    /// Create a pool with the given workers.
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            workers: RwLock::new(workers),
        }
    }

    /// Replace the pool's workers.
    pub fn set_workers(&self, workers: Vec<Arc<dyn Worker>>) {
        *self.workers.write().expect("lock poisoned") = workers;
    }

    /// Snapshot of the current workers.
    pub fn workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.read().expect("lock poisoned").clone()
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.workers.read().expect("lock poisoned").len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
