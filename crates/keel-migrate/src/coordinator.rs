//! The coordinator ("bus") as seen by the migrator.

use keel_types::{Bucket, ObjectRef, Slab, SlabKey, UnhealthySlab};

use crate::error::MigrateError;

/// Source of truth for slab health, slab contents, object listings and the
/// contract set.
///
/// Abstracted so that tests and simulations can run without a bus.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Recompute cached slab health across the whole system.
    async fn refresh_health(&self) -> Result<(), MigrateError>;

    /// List slabs with a health below `health_cutoff` for the given
    /// contract set, at most `limit` of them.
    async fn slabs_for_migration(
        &self,
        health_cutoff: f64,
        set: &str,
        limit: usize,
    ) -> Result<Vec<UnhealthySlab>, MigrateError>;

    /// Fetch the full shard layout of a slab.
    async fn slab(&self, key: &SlabKey) -> Result<Slab, MigrateError>;

    /// Name of the configured contract set. Empty when none is configured.
    async fn contract_set(&self) -> Result<String, MigrateError>;

    /// List all buckets.
    async fn list_buckets(&self) -> Result<Vec<Bucket>, MigrateError>;

    /// List the objects in `bucket` that store data in the given slab.
    async fn objects_by_slab_key(
        &self,
        bucket: &str,
        key: &SlabKey,
    ) -> Result<Vec<ObjectRef>, MigrateError>;
}
