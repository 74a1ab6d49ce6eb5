//! Error types for migration operations.

use keel_types::{MigrationResult, SlabKey};

/// Canonical message for a consensus desync, also matched in remote error strings.
pub const ERR_CONSENSUS_NOT_SYNCED: &str = "consensus is not synced";

/// Canonical message for a missing slab, also matched in remote error strings.
pub const ERR_SLAB_NOT_FOUND: &str = "slab not found";

/// Errors that can occur while scheduling or executing migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The chain is not synced; migrations cannot proceed.
    #[error("consensus is not synced")]
    ConsensusNotSynced,

    /// The slab no longer exists.
    #[error("slab not found: {0}")]
    SlabNotFound(SlabKey),

    /// No contract set is configured.
    #[error("no contract set configured")]
    NoContractSet,

    /// The coordinator failed a request.
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// The worker failed a request.
    #[error("worker error: {0}")]
    Worker(String),

    /// Fetching the slab body from the coordinator failed.
    #[error("failed to fetch slab; {0}")]
    SlabLookup(#[source] Box<MigrateError>),

    /// The worker's migration call failed.
    #[error("failed to migrate slab; {0}")]
    Migration(#[source] Box<MigrateError>),

    /// The worker ran the migration but reported an error.
    #[error("failed to migrate slab; {0}")]
    Remote(String),
}

impl MigrateError {
    /// Whether this error, or any error it wraps, means consensus is not synced.
    pub fn is_consensus_not_synced(&self) -> bool {
        match self {
            Self::ConsensusNotSynced => true,
            Self::SlabLookup(inner) | Self::Migration(inner) => inner.is_consensus_not_synced(),
            Self::Coordinator(msg) | Self::Worker(msg) | Self::Remote(msg) => {
                msg.contains(ERR_CONSENSUS_NOT_SYNCED)
            }
            _ => false,
        }
    }

    /// Whether this error, or any error it wraps, means the slab is gone.
    pub fn is_slab_not_found(&self) -> bool {
        match self {
            Self::SlabNotFound(_) => true,
            Self::SlabLookup(inner) | Self::Migration(inner) => inner.is_slab_not_found(),
            Self::Coordinator(msg) | Self::Worker(msg) | Self::Remote(msg) => {
                msg.contains(ERR_SLAB_NOT_FOUND)
            }
            _ => false,
        }
    }

    /// Whether the error happened while looking up the slab body.
    pub fn is_slab_lookup(&self) -> bool {
        matches!(self, Self::SlabLookup(_))
    }
}

/// A failed job, together with whatever the worker returned.
///
/// The result is kept because the surcharge flag decides which alert is
/// raised even when the migration failed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct JobError {
    /// Why the job failed.
    pub source: MigrateError,
    /// The worker's response; default when the call itself failed.
    pub result: MigrationResult,
}

impl JobError {
    /// A failure without a worker response.
    pub fn new(source: MigrateError) -> Self {
        Self {
            source,
            result: MigrationResult::default(),
        }
    }
}
