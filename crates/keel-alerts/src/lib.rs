//! Operator-facing alerts for Keel.
//!
//! This crate provides:
//!
//! - [`Alert`]: a notice with a stable identity, severity and JSON payload.
//! - [`AlertIds`]: the per-process base identities every alert derives from.
//! - [`AlertSink`]: where alerts are registered and dismissed.
//! - [`MemoryAlertStore`]: an in-memory sink for tests and simulations.
//! - [`catalog`]: constructors for every alert the migrator raises.

pub mod alert;
pub mod catalog;
pub mod error;
pub mod memory;
pub mod sink;

pub use alert::{Alert, AlertIds};
pub use error::AlertError;
pub use memory::MemoryAlertStore;
pub use sink::AlertSink;
