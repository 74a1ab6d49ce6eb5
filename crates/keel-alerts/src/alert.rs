//! The alert model and per-process alert identities.

use std::time::SystemTime;

use keel_types::{AlertId, ContractId, Severity, SlabKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An operator-visible notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identity. Raising the same condition twice yields the same id.
    pub id: AlertId,
    /// How urgent the alert is.
    pub severity: Severity,
    /// Short human-readable summary.
    pub message: String,
    /// Free-form payload (error strings, hints, affected keys).
    pub data: Map<String, Value>,
    /// When the alert was raised.
    pub timestamp: SystemTime,
}

impl Alert {
    /// Create an alert stamped with the current time and an empty payload.
    pub fn new(id: AlertId, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id,
            severity,
            message: message.into(),
            data: Map::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Add a payload entry.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Base identities for every alert category.
///
/// Built once at startup and handed to whoever raises alerts, so the same
/// condition maps onto the same alert for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertIds {
    /// Failed health refresh.
    pub health_refresh: AlertId,
    /// Wallet balance below the allowance.
    pub low_balance: AlertId,
    /// Ongoing migrations, and the base for per-slab migration outcomes.
    pub migration: AlertId,
    /// Base for per-contract pruning failures.
    pub pruning: AlertId,
}

impl AlertIds {
    /// Fresh random identities, constant until the process restarts.
    pub fn random() -> Self {
        Self {
            health_refresh: AlertId::random(),
            low_balance: AlertId::random(),
            migration: AlertId::random(),
            pruning: AlertId::random(),
        }
    }

    /// Identities derived from a seed, stable across restarts.
    pub fn from_seed(seed: &[u8]) -> Self {
        let root = AlertId::from_data(seed);
        Self {
            health_refresh: root.derive(b"health-refresh"),
            low_balance: root.derive(b"low-balance"),
            migration: root.derive(b"migration"),
            pruning: root.derive(b"pruning"),
        }
    }

    /// Identity of the migration outcome alert for one slab.
    pub fn for_slab(&self, key: &SlabKey) -> AlertId {
        id_for_slab(&self.migration, key)
    }

    /// Identity of the pruning alert for one contract.
    pub fn for_contract(&self, fcid: &ContractId) -> AlertId {
        id_for_contract(&self.pruning, fcid)
    }
}

/// Derive a slab-scoped alert id from a base id.
pub fn id_for_slab(base: &AlertId, key: &SlabKey) -> AlertId {
    base.derive(key.as_bytes())
}

/// Derive a contract-scoped alert id from a base id.
pub fn id_for_contract(base: &AlertId, fcid: &ContractId) -> AlertId {
    base.derive(fcid.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_are_stable_and_distinct() {
        let a = AlertIds::from_seed(b"node-1");
        let b = AlertIds::from_seed(b"node-1");
        assert_eq!(a, b);

        let all = [a.health_refresh, a.low_balance, a.migration, a.pruning];
        for (i, x) in all.iter().enumerate() {
            for y in &all[i + 1..] {
                assert_ne!(x, y);
            }
        }
        assert_ne!(a, AlertIds::from_seed(b"node-2"));
    }

    #[test]
    fn test_slab_ids_collide_per_key() {
        let ids = AlertIds::random();
        let key = SlabKey::from_data(b"slab");
        assert_eq!(ids.for_slab(&key), ids.for_slab(&key));
        assert_ne!(ids.for_slab(&key), ids.migration);
        assert_ne!(
            ids.for_slab(&key),
            ids.for_slab(&SlabKey::from_data(b"other"))
        );
    }

    #[test]
    fn test_contract_ids_use_pruning_base() {
        let ids = AlertIds::random();
        let fcid = ContractId::from_data(b"contract");
        assert_eq!(ids.for_contract(&fcid), id_for_contract(&ids.pruning, &fcid));
        assert_ne!(ids.for_contract(&fcid), id_for_contract(&ids.migration, &fcid));
    }

    #[test]
    fn test_with_data() {
        let alert = Alert::new(AlertId::random(), Severity::Info, "hello")
            .with_data("count", 3)
            .with_data("note", "text");
        assert_eq!(alert.message, "hello");
        assert_eq!(alert.data["count"], 3);
        assert_eq!(alert.data["note"], "text");
    }
}
