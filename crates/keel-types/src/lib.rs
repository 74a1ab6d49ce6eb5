//! Shared types and identifiers for Keel.
//!
//! This crate defines the core types used across the Keel workspace:
//! identifiers ([`SlabKey`], [`ContractId`], [`SectorRoot`], [`AlertId`]),
//! slab data ([`UnhealthySlab`], [`Slab`], [`Sector`]), object listings
//! ([`Bucket`], [`ObjectRef`]), worker responses ([`MigrationResult`]),
//! alert [`Severity`], and the migrator configuration ([`MigratorConfig`]).

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// How long the chain tip may lag behind wall-clock time before consensus
/// is considered out of sync.
pub const CONSENSUS_SYNC_THRESHOLD: Duration = Duration::from_secs(3 * 60 * 60);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced when parsing identifiers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    /// The input was not 64 hex characters.
    #[error("invalid id length: expected 64 hex characters, got {0}")]
    InvalidLength(usize),

    /// The input contained a non-hex character.
    #[error("invalid hex character {0:?}")]
    InvalidHex(char),
}

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex32(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Encryption key of a slab. Unique across the whole system, so it
    /// doubles as the slab's identity.
    SlabKey
);

define_id!(
    /// Identifier of a file contract formed with a storage host.
    ContractId
);

define_id!(
    /// Merkle root of a sector stored on a host.
    SectorRoot
);

define_id!(
    /// Stable identity of an operator-facing alert.
    AlertId
);

impl AlertId {
    /// Generate a random alert id. Used for per-process base identities.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Derive a child id from this base id and some discriminating bytes.
    ///
    /// The same `(base, data)` pair always yields the same id, which makes
    /// repeated register/dismiss calls for one condition collide onto a
    /// single alert.
    pub fn derive(&self, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0);
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

fn parse_hex32(s: &str) -> Result<[u8; 32], TypesError> {
    if s.len() != 64 {
        return Err(TypesError::InvalidLength(s.len()));
    }
    let mut out = [0u8; 32];
    for (i, pair) in s.as_bytes().chunks(2).enumerate() {
        let (hi, lo) = (pair[0] as char, pair[1] as char);
        let hi = hi.to_digit(16).ok_or(TypesError::InvalidHex(hi))?;
        let lo = lo.to_digit(16).ok_or(TypesError::InvalidHex(lo))?;
        out[i] = ((hi << 4) | lo) as u8;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Slab data
// ---------------------------------------------------------------------------

/// A slab whose health dropped below the migration cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnhealthySlab {
    /// Key of the slab.
    pub key: SlabKey,
    /// Remaining redundancy in `[0, 1]`. 0 is unrecoverable, 1 is fully
    /// redundant.
    pub health: f64,
}

/// One shard of a slab, stored as a sector under one or more contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    /// Root of the sector data.
    pub root: SectorRoot,
    /// Contracts currently holding this sector.
    pub contracts: Vec<ContractId>,
}

/// Full shard layout of a slab, as returned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slab {
    /// Key of the slab.
    pub key: SlabKey,
    /// Number of shards required to recover the slab.
    pub min_shards: u8,
    /// All shards of the slab.
    pub shards: Vec<Sector>,
}

/// A bucket known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket name.
    pub name: String,
}

/// An object that stores data in a given slab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object path within its bucket.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Response of a worker's slab migration.
///
/// A call can succeed at the transport level and still carry an embedded
/// `error` reported by the remote operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Number of shards moved to new hosts.
    pub shards_migrated: usize,
    /// Whether hosts were overpaid to force a sector download.
    pub surcharge_applied: bool,
    /// Operation-level error reported by the worker, if any.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity of an operator-facing alert, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational notice.
    Info,
    /// Something needs attention soon.
    Warning,
    /// An operation failed.
    Error,
    /// Data or funds are at risk.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// Whether a chain tip with the given timestamp is recent enough to
/// consider consensus synced at `now`.
///
/// A tip timestamp in the future counts as synced.
pub fn is_synced(tip_timestamp: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(tip_timestamp) {
        Ok(lag) => lag <= CONSENSUS_SYNC_THRESHOLD,
        Err(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the migration scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Slabs with a health below this value are migrated.
    pub health_cutoff: f64,
    /// Number of concurrent migrations per worker.
    pub parallel_slabs_per_worker: u64,
    /// Maximum number of unhealthy slabs fetched per refresh.
    pub batch_size: usize,
    /// Minimum interval between updates of the ongoing migrations alert.
    pub alert_interval_ms: u64,
    /// Length of the trailing window used for migration speed estimates.
    pub stats_window_ms: u64,
}

impl MigratorConfig {
    /// Interval between ongoing migrations alert updates.
    pub fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }

    /// Trailing window for migration speed samples.
    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            health_cutoff: 0.75,
            parallel_slabs_per_worker: 1,
            batch_size: 1_000_000,
            alert_interval_ms: 30_000,  // 30 s
            stats_window_ms: 3_600_000, // 1 h
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_key_from_data_deterministic() {
        let k1 = SlabKey::from_data(b"slab");
        let k2 = SlabKey::from_data(b"slab");
        assert_eq!(k1, k2, "same data must produce same SlabKey");
        assert_ne!(k1, SlabKey::from_data(b"other slab"));
    }

    #[test]
    fn test_display_outputs_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x0a;
        bytes[31] = 0xff;
        let key = SlabKey::from(bytes);
        let hex = key.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("0a00"));
        assert!(hex.ends_with("00ff"));
    }

    #[test]
    fn test_parse_hex() {
        let key = SlabKey::from_data(b"parse me");
        let parsed: SlabKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);

        let contract = ContractId::from_data(b"contract");
        let parsed: ContractId = contract.to_string().parse().unwrap();
        assert_eq!(parsed, contract);
    }

    #[test]
    fn test_parse_hex_rejects_bad_input() {
        assert_eq!(
            "abc".parse::<SlabKey>(),
            Err(TypesError::InvalidLength(3))
        );
        let bad = "z".repeat(64);
        assert_eq!(bad.parse::<SlabKey>(), Err(TypesError::InvalidHex('z')));
    }

    #[test]
    fn test_debug_format() {
        let id = ContractId::from([0u8; 32]);
        let debug = format!("{id:?}");
        assert!(debug.starts_with("ContractId("));
        assert!(debug.ends_with(')'));
    }

    #[test]
    fn test_alert_id_derive_is_stable() {
        let base = AlertId::from_data(b"migration");
        let key = SlabKey::from_data(b"slab-1");

        let a = base.derive(key.as_bytes());
        let b = base.derive(key.as_bytes());
        assert_eq!(a, b);
        assert_ne!(a, base);
        assert_ne!(a, base.derive(SlabKey::from_data(b"slab-2").as_bytes()));
        assert_ne!(a, AlertId::from_data(b"pruning").derive(key.as_bytes()));
    }

    #[test]
    fn test_alert_id_random_is_unique() {
        assert_ne!(AlertId::random(), AlertId::random());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Critical.to_string(), "critical");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }

    #[test]
    fn test_is_synced() {
        let now = SystemTime::now();
        assert!(is_synced(now, now));
        assert!(is_synced(now - Duration::from_secs(60 * 60), now));
        assert!(is_synced(now - CONSENSUS_SYNC_THRESHOLD, now));
        assert!(!is_synced(
            now - CONSENSUS_SYNC_THRESHOLD - Duration::from_secs(1),
            now
        ));
        assert!(is_synced(now + Duration::from_secs(60), now));
    }

    #[test]
    fn test_migration_result_default() {
        let res = MigrationResult::default();
        assert_eq!(res.shards_migrated, 0);
        assert!(!res.surcharge_applied);
        assert!(res.error.is_none());
    }

    #[test]
    fn test_migrator_config_default() {
        let config = MigratorConfig::default();
        assert_eq!(config.health_cutoff, 0.75);
        assert_eq!(config.parallel_slabs_per_worker, 1);
        assert_eq!(config.batch_size, 1_000_000);
        assert_eq!(config.alert_interval(), Duration::from_secs(30));
        assert_eq!(config.stats_window(), Duration::from_secs(3600));
    }
}
