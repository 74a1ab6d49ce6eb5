//! A simulated storage network driven by an autopilot-style loop.
//!
//! Each round the loop checks the wallet, lets a few slabs degrade, tells
//! the migrator that maintenance finished and triggers a migration run.
//! Runs outlive rounds: a round that finds a run in progress only signals
//! it, exactly as the autopilot does against a real bus.

use std::sync::Arc;

use anyhow::Context;
use keel_alerts::catalog::{self, LowBalance};
use keel_alerts::{AlertIds, MemoryAlertStore};
use keel_migrate::{MemoryCoordinator, Migrator, RunOutcome, SimulatedWorker, Worker, WorkerPool};
use keel_types::{ContractId, ObjectRef, Sector, SectorRoot, Severity, Slab, SlabKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{KeelConfig, WalletParams};

const CONTRACT_SET: &str = "autopilot";
const TOTAL_SHARDS: usize = 30;
const MIN_SHARDS: usize = 10;
const BUCKETS: [&str; 3] = ["default", "backups", "media"];

/// What a simulation did.
#[derive(Debug, Default)]
pub struct Summary {
    /// Autopilot rounds completed.
    pub rounds: usize,
    /// How every migration run ended, in start order.
    pub outcomes: Vec<RunOutcome>,
    /// Migrations attempted by all workers.
    pub attempted: usize,
    /// Slabs still below the health cutoff at the end.
    pub unhealthy_left: usize,
}

/// The simulated network and the migrator driving it.
pub struct Simulation {
    config: KeelConfig,
    coordinator: Arc<MemoryCoordinator>,
    alerts: Arc<MemoryAlertStore>,
    alert_ids: AlertIds,
    migrator: Arc<Migrator>,
    workers: Vec<Arc<SimulatedWorker>>,
    pool: WorkerPool,
    keys: Vec<SlabKey>,
    wallet: WalletParams,
    rng: StdRng,
    shutdown: CancellationToken,
}

impl Simulation {
    /// Build the network described by `config`.
    pub fn new(config: KeelConfig, shutdown: CancellationToken) -> Self {
        let mut rng = StdRng::seed_from_u64(config.sim_seed());

        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_contract_set(CONTRACT_SET);

        let mut keys = Vec::with_capacity(config.sim_slabs());
        for i in 0..config.sim_slabs() {
            let (slab, health) = random_slab(&mut rng, i);
            let object = ObjectRef {
                name: format!("obj-{i:05}"),
                size: rng.random_range(1..=40) * (1 << 20),
            };
            coordinator.add_object(BUCKETS[i % BUCKETS.len()], object, &[slab.key]);
            keys.push(slab.key);
            coordinator.add_slab(slab, health);
        }

        let (min_ms, max_ms) = config.sim_latency_ms();
        let workers: Vec<Arc<SimulatedWorker>> = (0..config.sim_workers())
            .map(|n| {
                Arc::new(
                    SimulatedWorker::new(format!("worker-{n}"), coordinator.clone())
                        .latency(min_ms, max_ms)
                        .failure_rate(config.sim_failure_rate())
                        .surcharge_below(config.sim_surcharge_below())
                        .seed(config.sim_seed().wrapping_add(n as u64 + 1)),
                )
            })
            .collect();
        let pool = WorkerPool::new(
            workers
                .iter()
                .map(|w| w.clone() as Arc<dyn Worker>)
                .collect(),
        );

        let alerts = Arc::new(MemoryAlertStore::new());
        let alert_ids = config.alert_ids();
        let migrator = Migrator::new(
            coordinator.clone(),
            alerts.clone(),
            alert_ids,
            config.migrator_config(),
            shutdown.clone(),
        );

        let wallet = config.sim_wallet();
        Self {
            config,
            coordinator,
            alerts,
            alert_ids,
            migrator,
            workers,
            pool,
            keys,
            wallet,
            rng,
            shutdown,
        }
    }

    /// The alert store the migrator writes to.
    pub fn alerts(&self) -> &MemoryAlertStore {
        &self.alerts
    }

    /// Number of slabs currently below the health cutoff.
    pub fn unhealthy(&self) -> usize {
        let cutoff = self.migrator.config().health_cutoff;
        self.keys
            .iter()
            .filter(|k| self.coordinator.health(k).is_some_and(|h| h < cutoff))
            .count()
    }

    /// Run the configured number of rounds, then wait for the last
    /// migration run to finish.
    pub async fn run(&mut self) -> anyhow::Result<Summary> {
        let rounds = self.config.sim_rounds();
        info!(
            slabs = self.keys.len(),
            unhealthy = self.unhealthy(),
            workers = self.workers.len(),
            rounds,
            "starting simulation"
        );

        let mut summary = Summary::default();
        let mut tick = tokio::time::interval(self.config.autopilot_interval());
        let mut current: Option<JoinHandle<RunOutcome>> = None;

        for round in 0..rounds {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(round, "shutdown requested, stopping simulation");
                    break;
                }
                _ = tick.tick() => {}
            }

            self.check_wallet().await;
            self.degrade_slabs();
            self.migrator.signal_maintenance_finished();

            if let Some(handle) = self.migrator.try_perform_migrations(&self.pool) {
                debug!(round, "migration run started");
                if let Some(previous) = current.replace(handle) {
                    summary
                        .outcomes
                        .push(previous.await.context("migration run panicked")?);
                }
            }

            self.wallet.block_height += self.wallet.blocks_per_round;
            summary.rounds += 1;
        }

        if let Some(last) = current.take() {
            summary
                .outcomes
                .push(last.await.context("migration run panicked")?);
        }

        summary.attempted = self.workers.iter().map(|w| w.migrations()).sum();
        summary.unhealthy_left = self.unhealthy();
        info!(
            rounds = summary.rounds,
            runs = summary.outcomes.len(),
            attempted = summary.attempted,
            unhealthy_left = summary.unhealthy_left,
            "simulation finished"
        );
        Ok(summary)
    }

    /// Raise the low balance alert while the wallet holds less than the
    /// allowance, dismiss it otherwise.
    async fn check_wallet(&self) {
        let w = &self.wallet;
        if w.balance < w.allowance {
            let wallet = LowBalance {
                address: w.address.clone(),
                balance: u128::from(w.balance),
                allowance: u128::from(w.allowance),
                block_height: w.block_height,
                renew_window: w.renew_window,
                end_height: w.end_height,
            };
            let alert = catalog::low_balance(&self.alert_ids, &wallet);
            if alert.severity > Severity::Info {
                warn!(severity = %alert.severity, height = w.block_height, "wallet is low on funds");
            }
            self.migrator.register_alert(alert).await;
        } else {
            self.migrator
                .dismiss_alerts(&[self.alert_ids.low_balance])
                .await;
        }
    }

    /// Knock a few random slabs below full health.
    fn degrade_slabs(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let count = (self.keys.len() / 50).max(1);
        for _ in 0..count {
            let key = self.keys[self.rng.random_range(0..self.keys.len())];
            let health = self.rng.random_range(0.0..0.9);
            self.coordinator.set_health(&key, health);
        }
    }
}

/// A slab with a random number of shards on lost hosts, and its health.
///
/// Health is the share of redundant shards still available: 1 with every
/// shard in place, 0 with exactly `MIN_SHARDS` left.
fn random_slab(rng: &mut StdRng, index: usize) -> (Slab, f64) {
    let lost = if rng.random_bool(0.7) {
        rng.random_range(0..=3)
    } else {
        rng.random_range(4..=TOTAL_SHARDS - MIN_SHARDS)
    };

    let key = SlabKey::from_data(format!("sim-slab-{index}").as_bytes());
    let shards = (0..TOTAL_SHARDS)
        .map(|i| Sector {
            root: SectorRoot::from_data(format!("{key}-{i}").as_bytes()),
            contracts: if i < lost {
                Vec::new()
            } else {
                vec![ContractId::from_data(format!("host-{}", i % 12).as_bytes())]
            },
        })
        .collect();

    let redundant = (TOTAL_SHARDS - MIN_SHARDS) as f64;
    let health = (redundant - lost as f64) / redundant;
    let slab = Slab {
        key,
        min_shards: MIN_SHARDS as u8,
        shards,
    };
    (slab, health)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> KeelConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_random_slab_health_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..100 {
            let (slab, health) = random_slab(&mut rng, i);
            assert_eq!(slab.shards.len(), TOTAL_SHARDS);
            assert!((0.0..=1.0).contains(&health));
            let lost = slab.shards.iter().filter(|s| s.contracts.is_empty()).count();
            assert_eq!(health, 1.0 - lost as f64 / 20.0);
        }
    }

    #[tokio::test]
    async fn test_simulation_repairs_network() {
        let mut sim = Simulation::new(
            config(
                r#"
[autopilot]
interval_ms = 1
alert_seed = "sim"

[simulation]
slabs = 40
workers = 2
rounds = 3
failure_rate = 0.0
min_latency_ms = 0
max_latency_ms = 0
"#,
            ),
            CancellationToken::new(),
        );
        let unhealthy = sim.unhealthy();
        assert!(unhealthy > 0);

        let summary = sim.run().await.unwrap();
        assert_eq!(summary.rounds, 3);
        assert!(!summary.outcomes.is_empty());
        assert!(summary.attempted >= unhealthy);

        // Nothing fails, so the only slabs left are ones degraded in a round
        // whose signal reached a run that had already dispatched everything.
        assert!(summary.unhealthy_left < summary.rounds);
        assert!(!sim.alerts().contains(&sim.alert_ids.migration));
        assert_eq!(sim.alerts().count_severity(Severity::Error), 0);
    }

    #[tokio::test]
    async fn test_low_balance_alert_escalates() {
        let mut sim = Simulation::new(
            config(
                r#"
[autopilot]
interval_ms = 1

[simulation]
slabs = 0
workers = 1
rounds = 1

[simulation.wallet]
balance = 10
allowance = 100
block_height = 100
renew_window = 20
end_height = 105
"#,
            ),
            CancellationToken::new(),
        );

        sim.run().await.unwrap();
        let alert = sim.alerts().get(&sim.alert_ids.low_balance).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.data["balance"], "10");
    }

    #[tokio::test]
    async fn test_funded_wallet_has_no_alert() {
        let mut sim = Simulation::new(
            config(
                r#"
[autopilot]
interval_ms = 1

[simulation]
slabs = 0
rounds = 2

[simulation.wallet]
balance = 1000
allowance = 100
"#,
            ),
            CancellationToken::new(),
        );

        sim.run().await.unwrap();
        assert!(!sim.alerts().contains(&sim.alert_ids.low_balance));
    }

    #[tokio::test]
    async fn test_cancelled_simulation_stops() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sim = Simulation::new(config("[simulation]\nslabs = 5"), token);

        let summary = sim.run().await.unwrap();
        assert_eq!(summary.rounds, 0);
        assert!(summary.outcomes.is_empty());
    }
}
