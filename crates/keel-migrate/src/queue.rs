//! The migration work queue.
//!
//! Slabs that were already queued are served before newly discovered ones,
//! whatever their health. Only the newly discovered tail is sorted by
//! health, worst first. This keeps a steady stream of freshly degraded
//! slabs from starving slabs that have been waiting since an earlier pass.

use std::collections::HashMap;

use keel_types::{SlabKey, UnhealthySlab};

/// What a merge changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries from the previous queue that still need migration.
    pub kept: usize,
    /// Entries from the previous queue that no longer need migration.
    pub removed: usize,
    /// Newly discovered entries appended to the queue.
    pub added: usize,
}

/// Ordered queue of unhealthy slabs, unique by key.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    slabs: Vec<UnhealthySlab>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the coordinator's latest list of unhealthy slabs into the queue.
    ///
    /// - Queued slabs present in `fetched` stay, in their existing order.
    /// - Queued slabs absent from `fetched` are dropped.
    /// - Slabs in `fetched` that were not queued are appended, sorted by
    ///   ascending health.
    pub fn merge(&mut self, fetched: Vec<UnhealthySlab>) -> MergeStats {
        let mut fresh: HashMap<SlabKey, UnhealthySlab> =
            fetched.iter().map(|slab| (slab.key, *slab)).collect();

        let before = self.slabs.len();
        self.slabs.retain(|slab| fresh.remove(&slab.key).is_some());
        let kept = self.slabs.len();

        // Walk `fetched` rather than the map so ties keep the coordinator's order.
        let mut added: Vec<UnhealthySlab> = fetched
            .iter()
            .filter_map(|slab| fresh.remove(&slab.key))
            .collect();
        added.sort_by(|a, b| a.health.total_cmp(&b.health));

        let stats = MergeStats {
            kept,
            removed: before - kept,
            added: added.len(),
        };
        self.slabs.extend(added);
        stats
    }

    /// The queued slabs, in service order.
    pub fn as_slice(&self) -> &[UnhealthySlab] {
        &self.slabs
    }

    /// Number of queued slabs.
    pub fn len(&self) -> usize {
        self.slabs.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(name: &str, health: f64) -> UnhealthySlab {
        UnhealthySlab {
            key: SlabKey::from_data(name.as_bytes()),
            health,
        }
    }

    fn keys(queue: &WorkQueue) -> Vec<SlabKey> {
        queue.as_slice().iter().map(|s| s.key).collect()
    }

    #[test]
    fn test_new_entries_sorted_by_health() {
        let mut queue = WorkQueue::new();
        let stats = queue.merge(vec![slab("x", 0.4), slab("y", 0.1), slab("z", 0.3)]);

        assert_eq!(
            keys(&queue),
            vec![slab("y", 0.).key, slab("z", 0.).key, slab("x", 0.).key]
        );
        assert_eq!(
            stats,
            MergeStats {
                kept: 0,
                removed: 0,
                added: 3
            }
        );
    }

    #[test]
    fn test_existing_entries_served_before_new_ones() {
        let mut queue = WorkQueue::new();
        queue.merge(vec![slab("a", 0.1), slab("b", 0.2)]);

        // C is worse than B but arrived later.
        let stats = queue.merge(vec![slab("b", 0.2), slab("c", 0.05)]);

        assert_eq!(keys(&queue), vec![slab("b", 0.).key, slab("c", 0.).key]);
        assert_eq!(
            stats,
            MergeStats {
                kept: 1,
                removed: 1,
                added: 1
            }
        );
    }

    #[test]
    fn test_survivors_keep_relative_order() {
        let mut queue = WorkQueue::new();
        queue.merge(vec![
            slab("a", 0.1),
            slab("b", 0.2),
            slab("c", 0.3),
            slab("d", 0.4),
        ]);

        // Health changes of queued slabs don't reorder them.
        queue.merge(vec![slab("d", 0.01), slab("b", 0.9), slab("c", 0.5)]);

        assert_eq!(
            keys(&queue),
            vec![slab("b", 0.).key, slab("c", 0.).key, slab("d", 0.).key]
        );
    }

    #[test]
    fn test_empty_fetch_clears_queue() {
        let mut queue = WorkQueue::new();
        queue.merge(vec![slab("a", 0.1), slab("b", 0.2)]);

        let stats = queue.merge(Vec::new());
        assert!(queue.is_empty());
        assert_eq!(stats.removed, 2);
    }

    #[test]
    fn test_duplicate_keys_in_fetch_are_queued_once() {
        let mut queue = WorkQueue::new();
        queue.merge(vec![slab("a", 0.3), slab("a", 0.3), slab("b", 0.1)]);
        assert_eq!(queue.len(), 2);
        assert_eq!(keys(&queue), vec![slab("b", 0.).key, slab("a", 0.).key]);

        // Already queued: not re-added even if listed twice.
        queue.merge(vec![slab("a", 0.3), slab("a", 0.3), slab("b", 0.1)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_equal_health_keeps_fetch_order() {
        let mut queue = WorkQueue::new();
        queue.merge(vec![slab("p", 0.5), slab("q", 0.5), slab("r", 0.5)]);
        assert_eq!(
            keys(&queue),
            vec![slab("p", 0.).key, slab("q", 0.).key, slab("r", 0.).key]
        );
    }
}
