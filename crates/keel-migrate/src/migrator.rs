//! The migration scheduler.
//!
//! A run refreshes slab health, merges the coordinator's list of unhealthy
//! slabs into a [`WorkQueue`] and hands the queue out, one [`Job`] at a
//! time, to `workers x parallel_slabs_per_worker` tasks over a zero-capacity
//! channel. The dispatcher can only run ahead of the workers by one slab,
//! so the number of migrations in flight never exceeds the number of tasks.
//!
//! Between dispatches the run reacts to three interrupts, in order of
//! precedence: shutdown and consensus loss end the run, a finished
//! maintenance pass restarts it from the health refresh.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use keel_alerts::catalog::{self, ObjectIds};
use keel_alerts::{Alert, AlertIds, AlertSink};
use keel_types::{AlertId, MigrationResult, MigratorConfig, SlabKey};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{JobError, MigrateError};
use crate::handoff::{self, HandoffReceiver, HandoffSender};
use crate::job::Job;
use crate::queue::WorkQueue;
use crate::signal::Signal;
use crate::stats::RollingSample;
use crate::worker::{Worker, WorkerPool};

/// How a migration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every queued slab was handed to a worker.
    Completed {
        /// Jobs handed out over the whole run, restarts included.
        dispatched: usize,
    },
    /// The queue was empty after the refresh.
    NothingToMigrate,
    /// Recomputing slab health failed.
    HealthRefreshFailed,
    /// No contract set is configured.
    NoContractSet,
    /// The contract set or the unhealthy slabs could not be fetched.
    FetchFailed,
    /// A worker reported that consensus is not synced.
    ConsensusNotSynced,
    /// The process is shutting down.
    Shutdown,
    /// No worker task was left to take jobs.
    NoWorkers,
}

/// Snapshot of the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Whether a run is active.
    pub migrating: bool,
    /// When the most recent run started.
    pub last_start: Option<SystemTime>,
}

/// Migration scheduler. At most one run is active at a time.
pub struct Migrator {
    coordinator: Arc<dyn Coordinator>,
    alerts: Arc<dyn AlertSink>,
    alert_ids: AlertIds,
    config: MigratorConfig,
    shutdown: CancellationToken,

    running: AtomicBool,
    last_start: Mutex<Option<SystemTime>>,

    maintenance_finished: Signal,
    consensus_not_synced: Signal,

    /// Migration durations in milliseconds.
    speed_ms: RollingSample,
}

/// Clears the running flag when the run task ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Migrator {
    /// Create a scheduler. `shutdown` is the process-wide cancellation root.
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        alerts: Arc<dyn AlertSink>,
        alert_ids: AlertIds,
        config: MigratorConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let speed_ms = RollingSample::new(config.stats_window());
        Arc::new(Self {
            coordinator,
            alerts,
            alert_ids,
            config,
            shutdown,
            running: AtomicBool::new(false),
            last_start: Mutex::new(None),
            maintenance_finished: Signal::new(),
            consensus_not_synced: Signal::new(),
            speed_ms,
        })
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Whether a run is active and when the last one started.
    pub fn status(&self) -> MigrationStatus {
        MigrationStatus {
            migrating: self.running.load(Ordering::Acquire),
            last_start: *self.last_start.lock().expect("lock poisoned"),
        }
    }

    /// Tell an active run that a maintenance pass finished, so it refreshes
    /// its queue before dispatching the next slab. Never blocks.
    pub fn signal_maintenance_finished(&self) {
        self.maintenance_finished.raise();
    }

    /// Estimated time to migrate `remaining` slabs, based on the p90 of
    /// recent migration durations. Zero when no duration was recorded
    /// within the stats window.
    pub fn slab_migration_estimate(&self, remaining: usize) -> Duration {
        self.speed_ms.recompute();
        let p90 = self.speed_ms.p90();
        if p90 == 0.0 {
            return Duration::ZERO;
        }
        let parallel = self.config.parallel_slabs_per_worker.max(1) as f64;
        Duration::from_secs_f64(remaining as f64 * p90 / parallel / 1_000.0)
    }

    /// Start a run over a snapshot of `pool`, unless one is already active
    /// or the process is shutting down.
    ///
    /// Returns the run's handle when a run was started.
    pub fn try_perform_migrations(
        self: &Arc<Self>,
        pool: &WorkerPool,
    ) -> Option<JoinHandle<RunOutcome>> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("migrations already in progress");
            return None;
        }
        *self.last_start.lock().expect("lock poisoned") = Some(SystemTime::now());

        let workers = pool.workers();
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _running = RunGuard(&this.running);
            this.perform_migrations(workers).await
        }))
    }

    async fn perform_migrations(self: &Arc<Self>, workers: Vec<Arc<dyn Worker>>) -> RunOutcome {
        info!(workers = workers.len(), "performing migrations");

        // Interrupts raised before this run started are stale.
        self.maintenance_finished.clear();
        self.consensus_not_synced.clear();

        let (mut jobs_tx, jobs_rx) = handoff::channel::<Job>();
        let mut tasks = JoinSet::new();
        let parallel = self.config.parallel_slabs_per_worker.max(1);
        for worker in &workers {
            for _ in 0..parallel {
                tasks.spawn(Arc::clone(self).run_worker(Arc::clone(worker), jobs_rx.clone()));
            }
        }
        // Only worker tasks may hold receivers, or a send could wait forever.
        drop(jobs_rx);

        let outcome = self.dispatch(&mut jobs_tx).await;

        self.dismiss_alerts(&[self.alert_ids.migration]).await;

        drop(jobs_tx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "migration worker task failed");
            }
        }

        info!(?outcome, "migrations finished");
        outcome
    }

    /// The dispatch side of a run: refresh, merge, hand out jobs.
    async fn dispatch(&self, jobs: &mut HandoffSender<Job>) -> RunOutcome {
        let mut queue = WorkQueue::new();
        let mut dispatched = 0usize;

        'outer: loop {
            let started = Instant::now();
            match self.or_shutdown(self.coordinator.refresh_health()).await {
                None => return RunOutcome::Shutdown,
                Some(Err(e)) => {
                    self.register_alert(catalog::health_refresh_failed(&self.alert_ids, &e))
                        .await;
                    error!(error = %e, "failed to recompute cached health before migration");
                    return RunOutcome::HealthRefreshFailed;
                }
                Some(Ok(())) => {
                    self.dismiss_alerts(&[self.alert_ids.health_refresh]).await;
                    info!(elapsed = ?started.elapsed(), "recomputed slab health");
                }
            }

            let set = match self.or_shutdown(self.coordinator.contract_set()).await {
                None => return RunOutcome::Shutdown,
                Some(Ok(set)) if !set.is_empty() => set,
                Some(Ok(_)) => {
                    error!("could not perform migrations, no contract set configured");
                    return RunOutcome::NoContractSet;
                }
                Some(Err(e)) => {
                    error!(error = %e, "failed to fetch contract set");
                    return RunOutcome::FetchFailed;
                }
            };

            let fetched = match self
                .or_shutdown(self.coordinator.slabs_for_migration(
                    self.config.health_cutoff,
                    &set,
                    self.config.batch_size,
                ))
                .await
            {
                None => return RunOutcome::Shutdown,
                Some(Ok(fetched)) => fetched,
                Some(Err(e)) => {
                    error!(error = %e, "failed to fetch slabs for migration");
                    return RunOutcome::FetchFailed;
                }
            };

            let merged = queue.merge(fetched);
            info!(
                kept = merged.kept,
                removed = merged.removed,
                added = merged.added,
                total = queue.len(),
                %set,
                "slabs to migrate"
            );

            if queue.is_empty() {
                return match dispatched {
                    0 => RunOutcome::NothingToMigrate,
                    dispatched => RunOutcome::Completed { dispatched },
                };
            }

            let total = queue.len();
            let mut last_register: Option<Instant> = None;
            for (index, slab) in queue.as_slice().iter().enumerate() {
                if last_register.is_none_or(|at| at.elapsed() >= self.config.alert_interval()) {
                    let remaining = total - index;
                    let estimate = self.slab_migration_estimate(remaining);
                    self.register_alert(catalog::ongoing_migrations(
                        &self.alert_ids,
                        remaining,
                        estimate,
                    ))
                    .await;
                    last_register = Some(Instant::now());
                }

                let job = Job::new(
                    *slab,
                    index,
                    total,
                    set.clone(),
                    Arc::clone(&self.coordinator),
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return RunOutcome::Shutdown,
                    _ = self.consensus_not_synced.wait() => {
                        info!("migrations interrupted, consensus is not synced");
                        return RunOutcome::ConsensusNotSynced;
                    }
                    _ = self.maintenance_finished.wait() => {
                        info!("migrations interrupted, updating slabs for migration");
                        continue 'outer;
                    }
                    sent = jobs.send(job) => {
                        if sent.is_err() {
                            warn!(remaining = total - index, "no migration workers left, aborting run");
                            return RunOutcome::NoWorkers;
                        }
                        dispatched += 1;
                    }
                }
            }

            return RunOutcome::Completed { dispatched };
        }
    }

    /// One worker task: resolve the worker's id once, then execute jobs
    /// until the channel closes or the task is told to stop.
    async fn run_worker(self: Arc<Self>, worker: Arc<dyn Worker>, jobs: HandoffReceiver<Job>) {
        let token = self.shutdown.child_token();
        let _cancel_on_exit = token.clone().drop_guard();

        let id = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            id = worker.id() => match id {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, "failed to reach worker");
                    return;
                }
            },
        };
        debug!(worker = %id, "migration worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                job = jobs.recv() => job,
            };
            let Some(job) = job else { break };

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = job.execute(worker.as_ref()) => result,
            };
            self.speed_ms.track(started.elapsed().as_millis() as f64);

            if self.handle_result(&id, &job, result).await.is_break() {
                break;
            }
        }
        debug!(worker = %id, "migration worker stopped");
    }

    /// React to a job's outcome. Breaks when the worker task should stop.
    async fn handle_result(
        &self,
        worker: &str,
        job: &Job,
        result: Result<MigrationResult, JobError>,
    ) -> ControlFlow<()> {
        let key = job.slab.key;
        match result {
            Ok(res) => {
                info!(
                    worker,
                    progress = %job.progress(),
                    %key,
                    health = job.slab.health,
                    overpaid = res.surcharge_applied,
                    shards_migrated = res.shards_migrated,
                    "migration succeeded"
                );
                self.dismiss_alerts(&[self.alert_ids.for_slab(&key)]).await;
                if res.surcharge_applied {
                    self.register_alert(catalog::critical_migration_succeeded(&self.alert_ids, &key))
                        .await;
                }
            }
            Err(JobError { source, result }) => {
                error!(
                    worker,
                    progress = %job.progress(),
                    %key,
                    health = job.slab.health,
                    overpaid = result.surcharge_applied,
                    error = %source,
                    "migration failed"
                );

                if source.is_consensus_not_synced() {
                    self.consensus_not_synced.raise();
                    return ControlFlow::Break(());
                }
                if source.is_slab_lookup() || source.is_slab_not_found() {
                    return ControlFlow::Continue(());
                }

                let object_ids = match self.object_ids_for_slab_key(&key).await {
                    Ok(ids) => Some(ids),
                    Err(e) => {
                        error!(%key, error = %e, "failed to fetch object ids for slab key");
                        None
                    }
                };

                let alert = if result.surcharge_applied {
                    catalog::critical_migration_failed(
                        &self.alert_ids,
                        &key,
                        job.slab.health,
                        object_ids.as_ref(),
                        &source,
                    )
                } else {
                    catalog::migration_failed(
                        &self.alert_ids,
                        &key,
                        job.slab.health,
                        object_ids.as_ref(),
                        &source,
                    )
                };
                self.register_alert(alert).await;
            }
        }
        ControlFlow::Continue(())
    }

    /// Names of the objects referencing `key`, per bucket.
    ///
    /// Buckets whose listing fails are skipped; buckets without matching
    /// objects are left out.
    pub async fn object_ids_for_slab_key(&self, key: &SlabKey) -> Result<ObjectIds, MigrateError> {
        let buckets = self.coordinator.list_buckets().await?;

        let mut ids = BTreeMap::new();
        for bucket in buckets {
            match self.coordinator.objects_by_slab_key(&bucket.name, key).await {
                Ok(objects) if objects.is_empty() => {}
                Ok(objects) => {
                    ids.insert(bucket.name, objects.into_iter().map(|o| o.name).collect());
                }
                Err(e) => {
                    error!(bucket = %bucket.name, %key, error = %e, "failed to fetch objects for slab key");
                }
            }
        }
        Ok(ids)
    }

    /// Register an alert. Failures are logged, never returned.
    pub async fn register_alert(&self, alert: Alert) {
        let id = alert.id;
        if let Err(e) = self.alerts.register_alert(alert).await {
            warn!(%id, error = %e, "failed to register alert");
        }
    }

    /// Dismiss alerts. Failures are logged, never returned.
    pub async fn dismiss_alerts(&self, ids: &[AlertId]) {
        if let Err(e) = self.alerts.dismiss_alerts(ids).await {
            warn!(count = ids.len(), error = %e, "failed to dismiss alerts");
        }
    }

    async fn or_shutdown<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use keel_alerts::MemoryAlertStore;

    use super::*;
    use crate::memory::MemoryCoordinator;

    fn migrator(parallel: u64) -> Arc<Migrator> {
        let config = MigratorConfig {
            parallel_slabs_per_worker: parallel,
            ..Default::default()
        };
        Migrator::new(
            Arc::new(MemoryCoordinator::new()),
            Arc::new(MemoryAlertStore::new()),
            AlertIds::random(),
            config,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_estimate_zero_without_samples() {
        let m = migrator(1);
        assert_eq!(m.slab_migration_estimate(100), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_estimate_scales_with_parallelism() {
        let m = migrator(2);
        for _ in 0..10 {
            m.speed_ms.track(1_000.0);
        }
        assert_eq!(m.slab_migration_estimate(6), Duration::from_secs(3));
        assert_eq!(m.slab_migration_estimate(0), Duration::ZERO);
    }
}
