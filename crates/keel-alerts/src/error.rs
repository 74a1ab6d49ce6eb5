//! Error types for alert delivery.

use keel_types::AlertId;

/// Errors that can occur while registering or dismissing alerts.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The alert backend could not be reached.
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the alert.
    #[error("alert {id} rejected: {reason}")]
    Rejected {
        /// The alert that was refused.
        id: AlertId,
        /// Why it was refused.
        reason: String,
    },
}
