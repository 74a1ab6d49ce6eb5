//! In-memory coordinator for tests and simulations.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_types::{Bucket, ObjectRef, Slab, SlabKey, UnhealthySlab};
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::error::MigrateError;

/// A [`Coordinator`] that keeps slabs, health and objects in memory.
///
/// Health is whatever the caller (or a simulated worker) last set;
/// `refresh_health` only counts calls and can be made to fail.
#[derive(Default)]
pub struct MemoryCoordinator {
    state: RwLock<State>,
    refreshes: AtomicUsize,
}

#[derive(Default)]
struct State {
    slabs: HashMap<SlabKey, (Slab, f64)>,
    contract_set: String,
    /// Bucket name -> objects and the slabs they reference.
    buckets: BTreeMap<String, Vec<(ObjectRef, Vec<SlabKey>)>>,
    refresh_error: Option<String>,
}

impl MemoryCoordinator {
    /// Create an empty coordinator without a contract set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a slab with the given health.
    pub fn add_slab(&self, slab: Slab, health: f64) {
        let mut state = self.state.write().expect("lock poisoned");
        state.slabs.insert(slab.key, (slab, health));
    }

    /// Update a slab's health. Returns `false` for an unknown slab.
    pub fn set_health(&self, key: &SlabKey, health: f64) -> bool {
        let mut state = self.state.write().expect("lock poisoned");
        match state.slabs.get_mut(key) {
            Some((_, h)) => {
                *h = health;
                true
            }
            None => false,
        }
    }

    /// Forget a slab.
    pub fn remove_slab(&self, key: &SlabKey) -> Option<Slab> {
        let mut state = self.state.write().expect("lock poisoned");
        state.slabs.remove(key).map(|(slab, _)| slab)
    }

    /// Current health of a slab.
    pub fn health(&self, key: &SlabKey) -> Option<f64> {
        let state = self.state.read().expect("lock poisoned");
        state.slabs.get(key).map(|(_, h)| *h)
    }

    /// Number of known slabs.
    pub fn slab_count(&self) -> usize {
        self.state.read().expect("lock poisoned").slabs.len()
    }

    /// Set the contract set name. An empty name means none is configured.
    pub fn set_contract_set(&self, name: impl Into<String>) {
        self.state.write().expect("lock poisoned").contract_set = name.into();
    }

    /// Store an object in `bucket` referencing the given slabs. Creates the
    /// bucket if needed.
    pub fn add_object(&self, bucket: &str, object: ObjectRef, slabs: &[SlabKey]) {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .push((object, slabs.to_vec()));
    }

    /// Make subsequent health refreshes fail with `error`, or succeed again
    /// with `None`.
    pub fn fail_refresh(&self, error: Option<String>) {
        self.state.write().expect("lock poisoned").refresh_error = error;
    }

    /// Number of health refreshes requested so far, failed ones included.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Coordinator for MemoryCoordinator {
    async fn refresh_health(&self) -> Result<(), MigrateError> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        match &self.state.read().expect("lock poisoned").refresh_error {
            Some(e) => Err(MigrateError::Coordinator(e.clone())),
            None => Ok(()),
        }
    }

    async fn slabs_for_migration(
        &self,
        health_cutoff: f64,
        set: &str,
        limit: usize,
    ) -> Result<Vec<UnhealthySlab>, MigrateError> {
        let state = self.state.read().expect("lock poisoned");
        let mut slabs: Vec<UnhealthySlab> = state
            .slabs
            .iter()
            .filter(|(_, (_, health))| *health < health_cutoff)
            .map(|(key, (_, health))| UnhealthySlab {
                key: *key,
                health: *health,
            })
            .collect();
        slabs.sort_by(|a, b| a.health.total_cmp(&b.health).then(a.key.cmp(&b.key)));
        slabs.truncate(limit);
        debug!(count = slabs.len(), set, health_cutoff, "listed slabs for migration");
        Ok(slabs)
    }

    async fn slab(&self, key: &SlabKey) -> Result<Slab, MigrateError> {
        let state = self.state.read().expect("lock poisoned");
        state
            .slabs
            .get(key)
            .map(|(slab, _)| slab.clone())
            .ok_or(MigrateError::SlabNotFound(*key))
    }

    async fn contract_set(&self) -> Result<String, MigrateError> {
        Ok(self.state.read().expect("lock poisoned").contract_set.clone())
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, MigrateError> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .buckets
            .keys()
            .map(|name| Bucket { name: name.clone() })
            .collect())
    }

    async fn objects_by_slab_key(
        &self,
        bucket: &str,
        key: &SlabKey,
    ) -> Result<Vec<ObjectRef>, MigrateError> {
        let state = self.state.read().expect("lock poisoned");
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| MigrateError::Coordinator(format!("bucket {bucket:?} not found")))?;
        Ok(objects
            .iter()
            .filter(|(_, slabs)| slabs.contains(key))
            .map(|(object, _)| object.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(name: &str) -> Slab {
        Slab {
            key: SlabKey::from_data(name.as_bytes()),
            min_shards: 1,
            shards: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_slabs_for_migration_filters_and_sorts() {
        let coord = MemoryCoordinator::new();
        coord.add_slab(slab("a"), 0.6);
        coord.add_slab(slab("b"), 0.2);
        coord.add_slab(slab("c"), 0.9);
        coord.add_slab(slab("d"), 0.4);

        let slabs = coord.slabs_for_migration(0.75, "set", 10).await.unwrap();
        let keys: Vec<SlabKey> = slabs.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![slab("b").key, slab("d").key, slab("a").key]);

        let slabs = coord.slabs_for_migration(0.75, "set", 2).await.unwrap();
        assert_eq!(slabs.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_slab() {
        let coord = MemoryCoordinator::new();
        let key = SlabKey::from_data(b"gone");
        let err = coord.slab(&key).await.unwrap_err();
        assert!(err.is_slab_not_found());
        assert!(!coord.set_health(&key, 0.1));
    }

    #[tokio::test]
    async fn test_refresh_failure_toggle() {
        let coord = MemoryCoordinator::new();
        coord.refresh_health().await.unwrap();

        coord.fail_refresh(Some("db locked".into()));
        assert!(coord.refresh_health().await.is_err());

        coord.fail_refresh(None);
        coord.refresh_health().await.unwrap();
        assert_eq!(coord.refresh_count(), 3);
    }

    #[tokio::test]
    async fn test_objects_by_slab_key() {
        let coord = MemoryCoordinator::new();
        let a = slab("a").key;
        let b = slab("b").key;
        let obj = |name: &str| ObjectRef {
            name: name.into(),
            size: 10,
        };
        coord.add_object("photos", obj("cat.jpg"), &[a]);
        coord.add_object("photos", obj("dog.jpg"), &[a, b]);
        coord.add_object("docs", obj("cv.pdf"), &[b]);

        let buckets = coord.list_buckets().await.unwrap();
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "photos"]);

        let objects = coord.objects_by_slab_key("photos", &a).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert!(coord.objects_by_slab_key("docs", &a).await.unwrap().is_empty());
        assert!(coord.objects_by_slab_key("missing", &a).await.is_err());
    }
}
