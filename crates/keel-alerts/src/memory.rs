//! In-memory alert sink.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_types::{AlertId, Severity};
use tracing::debug;

use crate::alert::Alert;
use crate::error::AlertError;
use crate::sink::AlertSink;

/// Alert sink backed by a `RwLock<HashMap>`.
///
/// Useful for tests and for the daemon's simulation mode. Can be switched
/// into an unavailable state to exercise callers' error handling.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<HashMap<AlertId, Alert>>,
    unavailable: AtomicBool,
}

impl MemoryAlertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Look up an active alert by id.
    pub fn get(&self, id: &AlertId) -> Option<Alert> {
        self.alerts.read().expect("lock poisoned").get(id).cloned()
    }

    /// Whether an alert with this id is active.
    pub fn contains(&self, id: &AlertId) -> bool {
        self.alerts.read().expect("lock poisoned").contains_key(id)
    }

    /// All active alerts, most severe first, oldest first within a severity.
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        alerts
    }

    /// Number of active alerts with the given severity.
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.alerts
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|a| a.severity == severity)
            .count()
    }

    /// Number of active alerts.
    pub fn len(&self) -> usize {
        self.alerts.read().expect("lock poisoned").len()
    }

    /// Whether no alert is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), AlertError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(AlertError::Unavailable("memory store disabled".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlertSink for MemoryAlertStore {
    async fn register_alert(&self, alert: Alert) -> Result<(), AlertError> {
        self.check_available()?;
        debug!(id = %alert.id, severity = %alert.severity, message = %alert.message, "registering alert");
        self.alerts
            .write()
            .expect("lock poisoned")
            .insert(alert.id, alert);
        Ok(())
    }

    async fn dismiss_alerts(&self, ids: &[AlertId]) -> Result<(), AlertError> {
        self.check_available()?;
        let mut map = self.alerts.write().expect("lock poisoned");
        for id in ids {
            if map.remove(id).is_some() {
                debug!(%id, "dismissed alert");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(n: u8, severity: Severity) -> Alert {
        Alert::new(AlertId::from([n; 32]), severity, format!("alert {n}"))
    }

    #[tokio::test]
    async fn test_register_replaces_same_id() {
        let store = MemoryAlertStore::new();
        store.register_alert(alert(1, Severity::Info)).await.unwrap();
        store
            .register_alert(alert(1, Severity::Warning))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get(&AlertId::from([1; 32])).unwrap();
        assert_eq!(stored.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_dismiss() {
        let store = MemoryAlertStore::new();
        store.register_alert(alert(1, Severity::Info)).await.unwrap();
        store.register_alert(alert(2, Severity::Info)).await.unwrap();

        // Unknown ids are ignored.
        store
            .dismiss_alerts(&[AlertId::from([1; 32]), AlertId::from([9; 32])])
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(!store.contains(&AlertId::from([1; 32])));
        assert!(store.contains(&AlertId::from([2; 32])));
    }

    #[tokio::test]
    async fn test_alerts_sorted_by_severity() {
        let store = MemoryAlertStore::new();
        store.register_alert(alert(1, Severity::Info)).await.unwrap();
        store
            .register_alert(alert(2, Severity::Critical))
            .await
            .unwrap();
        store
            .register_alert(alert(3, Severity::Warning))
            .await
            .unwrap();

        let severities: Vec<Severity> = store.alerts().iter().map(|a| a.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Warning, Severity::Info]
        );
        assert_eq!(store.count_severity(Severity::Info), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryAlertStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.register_alert(alert(1, Severity::Info)).await,
            Err(AlertError::Unavailable(_))
        ));
        assert!(store.dismiss_alerts(&[]).await.is_err());
        assert!(store.is_empty());

        store.set_unavailable(false);
        store.register_alert(alert(1, Severity::Info)).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
