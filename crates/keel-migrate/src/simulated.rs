//! A [`Worker`] that migrates slabs of a [`MemoryCoordinator`].
//!
//! `SimulatedWorker` sleeps for a random duration per migration, fails a
//! configurable share of them and applies a surcharge to slabs below a
//! health threshold. A successful migration restores the slab's health in
//! the coordinator. The RNG is seeded for reproducible runs.
//!
//! # Example
//!
//! ```ignore
//! let worker = SimulatedWorker::new("worker-1", coordinator)
//!     .latency(5, 20)        // 5-20 ms per migration
//!     .failure_rate(0.1)     // 10% of migrations fail
//!     .surcharge_below(0.25)
//!     .seed(42);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use keel_types::{MigrationResult, Slab, is_synced};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::MigrateError;
use crate::memory::MemoryCoordinator;
use crate::worker::Worker;

/// Error reported inside a failed simulated migration.
pub const SIMULATED_FAILURE: &str = "failed to upload sector to host: connection reset";

/// Simulated migration worker.
pub struct SimulatedWorker {
    id: String,
    coordinator: Arc<MemoryCoordinator>,
    latency_ms: (u64, u64),
    failure_rate: f64,
    surcharge_below: Option<f64>,
    rng: Mutex<StdRng>,
    unreachable: AtomicBool,
    /// Timestamp of the chain tip as seen by this worker. `None` is synced.
    consensus_tip: Mutex<Option<SystemTime>>,
    migrations: AtomicUsize,
}

impl SimulatedWorker {
    /// A worker with no latency, no failures and no surcharge.
    pub fn new(id: impl Into<String>, coordinator: Arc<MemoryCoordinator>) -> Self {
        Self {
            id: id.into(),
            coordinator,
            latency_ms: (0, 0),
            failure_rate: 0.0,
            surcharge_below: None,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            unreachable: AtomicBool::new(false),
            consensus_tip: Mutex::new(None),
            migrations: AtomicUsize::new(0),
        }
    }

    /// Set the migration latency range in milliseconds (uniform random).
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms.max(min_ms));
        self
    }

    /// Set the share of migrations that fail, in `[0, 1]`.
    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Apply a surcharge when migrating slabs with a health below `health`.
    pub fn surcharge_below(mut self, health: f64) -> Self {
        self.surcharge_below = Some(health);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Make the worker unreachable (or reachable again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Set the chain tip timestamp the worker checks before migrating.
    pub fn set_consensus_tip(&self, tip: SystemTime) {
        *self.consensus_tip.lock().expect("lock poisoned") = Some(tip);
    }

    /// Number of migrations attempted so far.
    pub fn migrations(&self) -> usize {
        self.migrations.load(Ordering::Relaxed)
    }

    async fn delay(&self) {
        let (min, max) = self.latency_ms;
        if max == 0 {
            return;
        }
        let ms = if min == max {
            min
        } else {
            self.rng.lock().expect("lock poisoned").random_range(min..=max)
        };
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn roll_failure(&self) -> bool {
        self.failure_rate > 0.0
            && self
                .rng
                .lock()
                .expect("lock poisoned")
                .random_bool(self.failure_rate)
    }
}

#[async_trait::async_trait]
impl Worker for SimulatedWorker {
    async fn id(&self) -> Result<String, MigrateError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(MigrateError::Worker(format!("{} is unreachable", self.id)));
        }
        Ok(self.id.clone())
    }

    async fn migrate_slab(&self, slab: &Slab, set: &str) -> Result<MigrationResult, MigrateError> {
        self.migrations.fetch_add(1, Ordering::Relaxed);

        let tip = *self.consensus_tip.lock().expect("lock poisoned");
        if tip.is_some_and(|tip| !is_synced(tip, SystemTime::now())) {
            return Err(MigrateError::ConsensusNotSynced);
        }
        if set.is_empty() {
            return Err(MigrateError::Worker("no contract set given".into()));
        }

        self.delay().await;

        let health = self
            .coordinator
            .health(&slab.key)
            .ok_or(MigrateError::SlabNotFound(slab.key))?;
        let surcharge_applied = self.surcharge_below.is_some_and(|below| health < below);

        if self.roll_failure() {
            return Ok(MigrationResult {
                shards_migrated: 0,
                surcharge_applied,
                error: Some(SIMULATED_FAILURE.to_string()),
            });
        }

        if !self.coordinator.set_health(&slab.key, 1.0) {
            return Err(MigrateError::SlabNotFound(slab.key));
        }
        Ok(MigrationResult {
            shards_migrated: slab.shards.iter().filter(|s| s.contracts.is_empty()).count(),
            surcharge_applied,
            error: None,
        })
    }
}
