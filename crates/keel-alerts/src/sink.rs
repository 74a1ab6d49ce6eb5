//! The alert sink trait.

use keel_types::AlertId;

use crate::alert::Alert;
use crate::error::AlertError;

/// Destination for operator-facing alerts.
///
/// Registering an alert whose id is already known replaces the previous
/// alert. Dismissing an unknown id is not an error.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    /// Register (or replace) an alert.
    async fn register_alert(&self, alert: Alert) -> Result<(), AlertError>;

    /// Dismiss all alerts with the given ids.
    async fn dismiss_alerts(&self, ids: &[AlertId]) -> Result<(), AlertError>;
}
