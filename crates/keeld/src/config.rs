//! TOML configuration for the Keel daemon.
//!
//! Every field is optional; the accessors on [`KeelConfig`] return the
//! effective value, falling back to a default when a field is absent.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use keel_alerts::AlertIds;
use keel_types::MigratorConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Migration scheduler tuning.
    pub migrator: MigratorSection,
    /// Autopilot loop settings.
    pub autopilot: AutopilotSection,
    /// Simulated network used by `keeld simulate`.
    pub simulation: SimulationSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[migrator]` section.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorSection {
    /// Slabs with a health below this value are migrated.
    pub health_cutoff: Option<f64>,
    /// Concurrent migrations per worker.
    pub parallel_slabs_per_worker: Option<u64>,
    /// Maximum number of unhealthy slabs fetched per refresh.
    pub batch_size: Option<usize>,
    /// Seconds between updates of the ongoing migrations alert.
    pub alert_interval_secs: Option<u64>,
    /// Trailing window, in seconds, of the migration speed estimate.
    pub stats_window_secs: Option<u64>,
}

/// `[autopilot]` section.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotSection {
    /// Milliseconds between autopilot iterations.
    pub interval_ms: Option<u64>,
    /// Seed for alert identities. Random per process when absent.
    pub alert_seed: Option<String>,
}

/// `[simulation]` section.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Number of slabs in the simulated network.
    pub slabs: Option<usize>,
    /// Number of simulated workers.
    pub workers: Option<usize>,
    /// Number of autopilot iterations to run.
    pub rounds: Option<usize>,
    /// Share of migrations that fail, in `[0, 1]`.
    pub failure_rate: Option<f64>,
    /// Lower bound of the per-migration latency.
    pub min_latency_ms: Option<u64>,
    /// Upper bound of the per-migration latency.
    pub max_latency_ms: Option<u64>,
    /// Slabs below this health are migrated with a surcharge.
    pub surcharge_below: Option<f64>,
    /// RNG seed for slab layout, latencies and failures.
    pub seed: Option<u64>,
    /// Simulated wallet.
    pub wallet: WalletSection,
}

/// `[simulation.wallet]` section.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSection {
    /// Wallet address shown in alerts.
    pub address: Option<String>,
    /// Confirmed balance.
    pub balance: Option<u64>,
    /// Configured allowance.
    pub allowance: Option<u64>,
    /// Block height at the start of the simulation.
    pub block_height: Option<u64>,
    /// Renew window in blocks.
    pub renew_window: Option<u64>,
    /// Height at which the current period ends.
    pub end_height: Option<u64>,
    /// Blocks mined per autopilot iteration.
    pub blocks_per_round: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Effective wallet figures of the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletParams {
    pub address: String,
    pub balance: u64,
    pub allowance: u64,
    pub block_height: u64,
    pub renew_window: u64,
    pub end_height: u64,
    pub blocks_per_round: u64,
}

impl KeelConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let cutoff = self.migrator_config().health_cutoff;
        if !(cutoff > 0.0 && cutoff <= 1.0) {
            bail!("migrator.health_cutoff must be in (0, 1], got {cutoff}");
        }
        if self.migrator.parallel_slabs_per_worker == Some(0) {
            bail!("migrator.parallel_slabs_per_worker must be at least 1");
        }
        if self.migrator.batch_size == Some(0) {
            bail!("migrator.batch_size must be at least 1");
        }
        let rate = self.sim_failure_rate();
        if !(0.0..=1.0).contains(&rate) {
            bail!("simulation.failure_rate must be in [0, 1], got {rate}");
        }
        let (min, max) = self.sim_latency_ms();
        if min > max {
            bail!("simulation.min_latency_ms ({min}) exceeds max_latency_ms ({max})");
        }
        Ok(())
    }

    /// Effective scheduler configuration.
    pub fn migrator_config(&self) -> MigratorConfig {
        let defaults = MigratorConfig::default();
        let m = &self.migrator;
        MigratorConfig {
            health_cutoff: m.health_cutoff.unwrap_or(defaults.health_cutoff),
            parallel_slabs_per_worker: m
                .parallel_slabs_per_worker
                .unwrap_or(defaults.parallel_slabs_per_worker),
            batch_size: m.batch_size.unwrap_or(defaults.batch_size),
            alert_interval_ms: m
                .alert_interval_secs
                .map_or(defaults.alert_interval_ms, |s| s * 1_000),
            stats_window_ms: m
                .stats_window_secs
                .map_or(defaults.stats_window_ms, |s| s * 1_000),
        }
    }

    /// Effective autopilot interval. Defaults to 500 ms.
    pub fn autopilot_interval(&self) -> Duration {
        Duration::from_millis(self.autopilot.interval_ms.unwrap_or(500))
    }

    /// Alert identities: seeded when `alert_seed` is set, random otherwise.
    pub fn alert_ids(&self) -> AlertIds {
        match &self.autopilot.alert_seed {
            Some(seed) => AlertIds::from_seed(seed.as_bytes()),
            None => AlertIds::random(),
        }
    }

    /// Effective number of simulated slabs. Defaults to 200.
    pub fn sim_slabs(&self) -> usize {
        self.simulation.slabs.unwrap_or(200)
    }

    /// Effective number of simulated workers. Defaults to 4.
    pub fn sim_workers(&self) -> usize {
        self.simulation.workers.unwrap_or(4)
    }

    /// Effective number of autopilot iterations. Defaults to 20.
    pub fn sim_rounds(&self) -> usize {
        self.simulation.rounds.unwrap_or(20)
    }

    /// Effective failure rate. Defaults to 5%.
    pub fn sim_failure_rate(&self) -> f64 {
        self.simulation.failure_rate.unwrap_or(0.05)
    }

    /// Effective latency range in milliseconds. Defaults to 5-25 ms.
    pub fn sim_latency_ms(&self) -> (u64, u64) {
        (
            self.simulation.min_latency_ms.unwrap_or(5),
            self.simulation.max_latency_ms.unwrap_or(25),
        )
    }

    /// Effective surcharge threshold. Defaults to 0.25.
    pub fn sim_surcharge_below(&self) -> f64 {
        self.simulation.surcharge_below.unwrap_or(0.25)
    }

    /// Effective RNG seed. Defaults to 42.
    pub fn sim_seed(&self) -> u64 {
        self.simulation.seed.unwrap_or(42)
    }

    /// Effective wallet figures.
    ///
    /// The defaults start with a balance below the allowance and reach the
    /// renew window after a few rounds, so every low balance severity shows
    /// up in a default simulation.
    pub fn sim_wallet(&self) -> WalletParams {
        let w = &self.simulation.wallet;
        WalletParams {
            address: w
                .address
                .clone()
                .unwrap_or_else(|| "addr:keel-simulated-wallet".to_string()),
            balance: w.balance.unwrap_or(500),
            allowance: w.allowance.unwrap_or(1_000),
            block_height: w.block_height.unwrap_or(1_000),
            renew_window: w.renew_window.unwrap_or(144),
            end_height: w.end_height.unwrap_or(1_200),
            blocks_per_round: w.blocks_per_round.unwrap_or(10),
        }
    }

    /// A copy with every optional field filled in with its effective value.
    pub fn resolved(&self) -> Self {
        let migrator = self.migrator_config();
        let (min_latency_ms, max_latency_ms) = self.sim_latency_ms();
        let wallet = self.sim_wallet();
        Self {
            migrator: MigratorSection {
                health_cutoff: Some(migrator.health_cutoff),
                parallel_slabs_per_worker: Some(migrator.parallel_slabs_per_worker),
                batch_size: Some(migrator.batch_size),
                alert_interval_secs: Some(migrator.alert_interval_ms / 1_000),
                stats_window_secs: Some(migrator.stats_window_ms / 1_000),
            },
            autopilot: AutopilotSection {
                interval_ms: Some(self.autopilot_interval().as_millis() as u64),
                alert_seed: self.autopilot.alert_seed.clone(),
            },
            simulation: SimulationSection {
                slabs: Some(self.sim_slabs()),
                workers: Some(self.sim_workers()),
                rounds: Some(self.sim_rounds()),
                failure_rate: Some(self.sim_failure_rate()),
                min_latency_ms: Some(min_latency_ms),
                max_latency_ms: Some(max_latency_ms),
                surcharge_below: Some(self.sim_surcharge_below()),
                seed: Some(self.sim_seed()),
                wallet: WalletSection {
                    address: Some(wallet.address),
                    balance: Some(wallet.balance),
                    allowance: Some(wallet.allowance),
                    block_height: Some(wallet.block_height),
                    renew_window: Some(wallet.renew_window),
                    end_height: Some(wallet.end_height),
                    blocks_per_round: Some(wallet.blocks_per_round),
                },
            },
            log: self.log.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[migrator]
health_cutoff = 0.5
parallel_slabs_per_worker = 2
batch_size = 5000
alert_interval_secs = 10
stats_window_secs = 600

[autopilot]
interval_ms = 100
alert_seed = "node-1"

[simulation]
slabs = 50
workers = 2
rounds = 5
failure_rate = 0.0
min_latency_ms = 1
max_latency_ms = 2
surcharge_below = 0.1
seed = 7

[simulation.wallet]
balance = 2000
allowance = 1000
end_height = 5000

[log]
level = "debug"
"#;

        let config = KeelConfig::from_toml(toml).unwrap();
        let migrator = config.migrator_config();
        assert_eq!(migrator.health_cutoff, 0.5);
        assert_eq!(migrator.parallel_slabs_per_worker, 2);
        assert_eq!(migrator.batch_size, 5000);
        assert_eq!(migrator.alert_interval(), Duration::from_secs(10));
        assert_eq!(migrator.stats_window(), Duration::from_secs(600));
        assert_eq!(config.autopilot_interval(), Duration::from_millis(100));
        assert_eq!(config.alert_ids(), AlertIds::from_seed(b"node-1"));
        assert_eq!(config.sim_slabs(), 50);
        assert_eq!(config.sim_workers(), 2);
        assert_eq!(config.sim_rounds(), 5);
        assert_eq!(config.sim_failure_rate(), 0.0);
        assert_eq!(config.sim_latency_ms(), (1, 2));
        assert_eq!(config.sim_surcharge_below(), 0.1);
        assert_eq!(config.sim_seed(), 7);
        let wallet = config.sim_wallet();
        assert_eq!(wallet.balance, 2000);
        assert_eq!(wallet.end_height, 5000);
        // Unset wallet fields fall back to defaults.
        assert_eq!(wallet.renew_window, 144);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = KeelConfig::from_toml("").unwrap();
        assert_eq!(config.migrator_config(), MigratorConfig::default());
        assert_eq!(config.autopilot_interval(), Duration::from_millis(500));
        assert_eq!(config.sim_workers(), 4);
        assert_eq!(config.log.level, "info");
        assert_ne!(config.alert_ids(), config.alert_ids());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(KeelConfig::from_toml("[migrator]\nhealth_cutoff = 1.5").is_err());
        assert!(KeelConfig::from_toml("[migrator]\nhealth_cutoff = 0.0").is_err());
        assert!(KeelConfig::from_toml("[migrator]\nparallel_slabs_per_worker = 0").is_err());
        assert!(KeelConfig::from_toml("[simulation]\nfailure_rate = 2.0").is_err());
        assert!(
            KeelConfig::from_toml("[simulation]\nmin_latency_ms = 10\nmax_latency_ms = 5")
                .is_err()
        );
    }

    #[test]
    fn test_resolved_round_trips_through_toml() {
        let config = KeelConfig::from_toml("[simulation]\nslabs = 12").unwrap();
        let text = toml::to_string_pretty(&config.resolved()).unwrap();
        let parsed = KeelConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.simulation.slabs, Some(12));
        assert_eq!(parsed.migrator.batch_size, Some(1_000_000));
        assert_eq!(parsed.migrator_config(), config.migrator_config());
        assert_eq!(parsed.sim_wallet(), config.sim_wallet());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(
            &path,
            r#"
[simulation]
workers = 9

[log]
level = "warn"
"#,
        )
        .unwrap();

        let config = KeelConfig::load(Some(&path)).unwrap();
        assert_eq!(config.sim_workers(), 9);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeelConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = KeelConfig::load(None).unwrap();
        assert_eq!(config.sim_rounds(), 20);
    }
}
