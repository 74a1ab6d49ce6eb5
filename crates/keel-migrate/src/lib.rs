//! Slab migration for Keel.
//!
//! This crate provides:
//!
//! - [`Migrator`]: refreshes slab health, keeps a starvation-free queue of
//!   unhealthy slabs and fans it out to a pool of workers.
//! - [`WorkQueue`]: the queue merge that keeps waiting slabs ahead of new ones.
//! - [`Job`]: one slab migration, executed by exactly one worker task.
//! - [`RollingSample`]: trailing-window migration latencies and their p90.
//! - [`Coordinator`] / [`Worker`]: the collaborators the migrator drives.
//! - [`MemoryCoordinator`] / [`SimulatedWorker`]: in-memory collaborators
//!   for tests and simulations.

pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod job;
pub mod memory;
pub mod migrator;
pub mod queue;
pub mod signal;
pub mod simulated;
pub mod stats;
pub mod worker;

pub use coordinator::Coordinator;
pub use error::{JobError, MigrateError};
pub use job::Job;
pub use memory::MemoryCoordinator;
pub use migrator::{MigrationStatus, Migrator, RunOutcome};
pub use queue::{MergeStats, WorkQueue};
pub use signal::Signal;
pub use simulated::SimulatedWorker;
pub use stats::RollingSample;
pub use worker::{Worker, WorkerPool};
