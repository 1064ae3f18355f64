//! Distributed execution coordinator.
//!
//! Each round enumerates tenants and, for every tenant whose lock
//! (`rollout-tick/<tenant>`) it can take, runs the rollout evaluator and
//! then auto cleanup. Tenants locked by another node are skipped, and a
//! failing tenant does not hold up the others.
//!
//! ```text
//! Coordinator::run  (fixed interval, until shutdown)
//!   └── run_once
//!       └── per tenant
//!           ├── LockService::try_lock
//!           ├── RolloutEvaluator::tick_with   (lease renewed as it goes)
//!           ├── LockService::extend
//!           ├── AutoCleanup::run_with         (lease renewed as it goes)
//!           └── LockService::release
//! ```
//!
//! While a tenant is processed the lease is renewed whenever a third of it
//! has elapsed. A failed renewal aborts the tenant with `LockLost`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_core::TenantContext;
use fleetgrid_rollout::keep_alive::aborted;
use fleetgrid_rollout::{EvaluationReport, KeepAlive, RolloutEvaluator, RolloutResult, epoch_secs};
use fleetgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cleanup::{AutoCleanup, CleanupReport};
use crate::error::{SchedulerError, SchedulerResult};
use crate::lock::{LockHandle, LockService};

/// Lists the tenants the coordinator works on.
pub trait TenantSource: Send + Sync {
    fn tenants(&self) -> SchedulerResult<Vec<String>>;
}

impl TenantSource for StateStore {
    fn tenants(&self) -> SchedulerResult<Vec<String>> {
        Ok(self.list_tenants()?)
    }
}

/// Name of the per-tenant lock guarding evaluation and cleanup.
pub fn tick_lock_name(tenant: &str) -> String {
    format!("rollout-tick/{tenant}")
}

/// Summary of one coordinator round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tenants_processed: u32,
    /// Tenants locked by another node.
    pub tenants_skipped: u32,
    pub tenants_failed: u32,
    pub evaluation: EvaluationReport,
    pub actions_deleted: u32,
}

/// Renews a held tick lock while a tenant is being processed.
struct LeaseKeeper<'a> {
    locks: &'a dyn LockService,
    handle: &'a mut LockHandle,
    lease: Duration,
    renewed_at: Instant,
    lost: Option<SchedulerError>,
}

impl<'a> LeaseKeeper<'a> {
    fn new(locks: &'a dyn LockService, handle: &'a mut LockHandle, lease: Duration) -> Self {
        Self {
            locks,
            handle,
            lease,
            renewed_at: Instant::now(),
            lost: None,
        }
    }

    /// Extend the lease now.
    fn renew(&mut self) -> SchedulerResult<()> {
        self.locks.extend(&mut *self.handle, self.lease)?;
        self.renewed_at = Instant::now();
        Ok(())
    }

    fn take_lost(&mut self) -> Option<SchedulerError> {
        self.lost.take()
    }
}

impl KeepAlive for LeaseKeeper<'_> {
    fn keep_alive(&mut self) -> RolloutResult<()> {
        if let Some(lost) = &self.lost {
            return Err(aborted(lost));
        }
        if self.renewed_at.elapsed() < self.lease / 3 {
            return Ok(());
        }
        if let Err(e) = self.renew() {
            warn!(lock = %self.handle.name, error = %e, "tick lock renewal failed");
            let err = aborted(&e);
            self.lost = Some(e);
            return Err(err);
        }
        debug!(lock = %self.handle.name, "tick lock renewed");
        Ok(())
    }
}

/// Runs evaluation and cleanup for every tenant under its cluster lock.
pub struct Coordinator {
    tenants: Arc<dyn TenantSource>,
    locks: Arc<dyn LockService>,
    evaluator: RolloutEvaluator,
    cleanup: AutoCleanup,
    lease: Duration,
}

impl Coordinator {
    pub fn new(
        tenants: Arc<dyn TenantSource>,
        locks: Arc<dyn LockService>,
        evaluator: RolloutEvaluator,
        cleanup: AutoCleanup,
        lease: Duration,
    ) -> Self {
        Self {
            tenants,
            locks,
            evaluator,
            cleanup,
            lease,
        }
    }

    /// One round over all tenants.
    pub fn run_once(&self) -> SchedulerResult<TickReport> {
        let mut report = TickReport::default();
        for tenant in self.tenants.tenants()? {
            let lock_name = tick_lock_name(&tenant);
            let handle = match self.locks.try_lock(&lock_name, self.lease) {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    debug!(%tenant, "tenant locked elsewhere, skipping");
                    report.tenants_skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(%tenant, error = %e, "lock acquisition failed");
                    report.tenants_failed += 1;
                    continue;
                }
            };

            let ctx = TenantContext::new(tenant.clone());
            match self.process_tenant(&ctx, handle) {
                Ok((evaluation, cleanup)) => {
                    report.tenants_processed += 1;
                    report.evaluation.merge(&evaluation);
                    report.actions_deleted += cleanup.total_deleted();
                }
                Err(e) => {
                    error!(tenant = %ctx.tenant, correlation_id = %ctx.correlation_id, error = %e, "tenant tick failed");
                    report.tenants_failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn process_tenant(
        &self,
        ctx: &TenantContext,
        mut handle: LockHandle,
    ) -> SchedulerResult<(EvaluationReport, CleanupReport)> {
        let result = self.tick_tenant(ctx, &mut handle);
        match self.locks.release(handle) {
            Ok(true) => {}
            Ok(false) => warn!(tenant = %ctx.tenant, "tick lock expired before release"),
            Err(e) => warn!(tenant = %ctx.tenant, error = %e, "tick lock release failed"),
        }
        result
    }

    fn tick_tenant(
        &self,
        ctx: &TenantContext,
        handle: &mut LockHandle,
    ) -> SchedulerResult<(EvaluationReport, CleanupReport)> {
        let now = epoch_secs();
        let mut keeper = LeaseKeeper::new(&*self.locks, handle, self.lease);
        let evaluation = match self.evaluator.tick_with(ctx, now, &mut keeper) {
            Ok(evaluation) => evaluation,
            Err(e) => return Err(keeper.take_lost().unwrap_or(e.into())),
        };
        keeper.renew()?;
        let cleanup = match self.cleanup.run_with(ctx, now, &mut keeper) {
            Ok(cleanup) => cleanup,
            Err(e) => return Err(keeper.take_lost().unwrap_or(e)),
        };
        Ok((evaluation, cleanup))
    }

    /// Run rounds on a fixed interval until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "coordinator started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once() {
                        Ok(report) => debug!(?report, "coordinator round complete"),
                        Err(e) => error!(error = %e, "coordinator round failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("coordinator shutting down");
                    break;
                }
            }
        }
    }
}
