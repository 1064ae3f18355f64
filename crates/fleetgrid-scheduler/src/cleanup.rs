//! Auto cleanup of aged terminal actions.
//!
//! Per tenant, actions in a configured terminal status whose last change is
//! older than that status's expiry are hard-deleted together with their
//! status log. Actions of a group that is still running are kept so the
//! evaluator's counts stay stable.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::{CleanupStatus, TenantContext, TenantSettingsLookup};
use fleetgrid_rollout::{KeepAlive, NoKeepAlive};
use fleetgrid_state::{ActionStatus, GroupId, RolloutGroupStatus, StateStore};
use tracing::{debug, info};

use crate::error::SchedulerResult;

/// Actions deleted by one cleanup pass, per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: HashMap<CleanupStatus, u32>,
    /// Expired actions kept because their group is still running.
    pub retained: u32,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> u32 {
        self.deleted.values().sum()
    }
}

/// Deletes expired terminal actions according to tenant settings.
#[derive(Clone)]
pub struct AutoCleanup {
    store: StateStore,
    settings: Arc<dyn TenantSettingsLookup>,
}

impl AutoCleanup {
    pub fn new(store: StateStore, settings: Arc<dyn TenantSettingsLookup>) -> Self {
        Self { store, settings }
    }

    /// Run one cleanup pass for the context's tenant at unix time `now`.
    pub fn run(&self, ctx: &TenantContext, now: u64) -> SchedulerResult<CleanupReport> {
        self.run_with(ctx, now, &mut NoKeepAlive)
    }

    /// [`run`](Self::run), calling `keep_alive` before each status sweep.
    pub fn run_with(
        &self,
        ctx: &TenantContext,
        now: u64,
        keep_alive: &mut dyn KeepAlive,
    ) -> SchedulerResult<CleanupReport> {
        let policy = self.settings.settings(&ctx.tenant).cleanup;
        let mut report = CleanupReport::default();
        if !policy.enabled {
            debug!(tenant = %ctx.tenant, "auto cleanup disabled");
            return Ok(report);
        }

        let mut running_groups: HashMap<GroupId, bool> = HashMap::new();
        for (status, expiry) in policy.expiries() {
            keep_alive.keep_alive()?;
            let cutoff = now.saturating_sub(expiry.as_secs());
            let candidates = self.store.list_actions_modified_before(
                &ctx.tenant,
                ActionStatus::from(status),
                cutoff,
            )?;
            let mut ids = Vec::with_capacity(candidates.len());
            for action in candidates {
                if let Some(group_id) = action.rollout_group_id
                    && self.group_running(ctx, group_id, &mut running_groups)?
                {
                    report.retained += 1;
                    continue;
                }
                ids.push(action.id);
            }
            if ids.is_empty() {
                continue;
            }
            let deleted = self.store.delete_actions(&ctx.tenant, &ids)?;
            info!(tenant = %ctx.tenant, ?status, deleted, cutoff, "expired actions deleted");
            report.deleted.insert(status, deleted);
        }
        Ok(report)
    }

    fn group_running(
        &self,
        ctx: &TenantContext,
        group_id: GroupId,
        seen: &mut HashMap<GroupId, bool>,
    ) -> SchedulerResult<bool> {
        if let Some(running) = seen.get(&group_id) {
            return Ok(*running);
        }
        let running = self
            .store
            .get_group(&ctx.tenant, group_id)?
            .is_some_and(|g| g.status == RolloutGroupStatus::Running);
        seen.insert(group_id, running);
        Ok(running)
    }
}
