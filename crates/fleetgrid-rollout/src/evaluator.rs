//! Group threshold evaluator: one reconciliation pass per tenant.
//!
//! For every rollout that is due (scheduled start reached, `Starting` or
//! `Running`) the evaluator:
//!
//! 1. activates the first group of a starting rollout and creates its actions;
//! 2. recomputes the running group's action counts from one store snapshot;
//! 3. applies the error condition, then the success condition;
//! 4. writes group transitions and the rollout's counters in one
//!    revision-checked transaction.
//!
//! Every decision is derived from stored state, so a pass that dies halfway
//! is finished by the next one. A conflicting write skips the rollout until
//! the next pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_core::TenantContext;
use fleetgrid_state::{
    ActionCounts, ActionStatus, ErrorAction, GroupActionCounts, GroupId, Rollout, RolloutGroup,
    RolloutGroupStatus, RolloutStatus, StateStore, SuccessAction, TotalTargetCountStatus,
};
use tracing::{debug, error, info, warn};

use crate::assignment::DeploymentManager;
use crate::condition::{self, Condition};
use crate::error::{RolloutError, RolloutResult};
use crate::events::{EventPublisher, RolloutEvent};
use crate::keep_alive::{KeepAlive, NoKeepAlive};

/// Summary of one evaluation pass over a tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub rollouts_evaluated: u32,
    pub rollouts_started: u32,
    pub groups_finished: u32,
    pub groups_errored: u32,
    pub rollouts_finished: u32,
    pub rollouts_stopped: u32,
    pub actions_created: u32,
    /// Rollouts skipped because a concurrent writer won.
    pub conflicts: u32,
    pub failures: u32,
}

impl EvaluationReport {
    pub fn merge(&mut self, other: &EvaluationReport) {
        self.rollouts_evaluated += other.rollouts_evaluated;
        self.rollouts_started += other.rollouts_started;
        self.groups_finished += other.groups_finished;
        self.groups_errored += other.groups_errored;
        self.rollouts_finished += other.rollouts_finished;
        self.rollouts_stopped += other.rollouts_stopped;
        self.actions_created += other.actions_created;
        self.conflicts += other.conflicts;
        self.failures += other.failures;
    }
}

/// Drives running rollouts from group to group.
#[derive(Clone)]
pub struct RolloutEvaluator {
    store: StateStore,
    deployments: DeploymentManager,
    events: Arc<dyn EventPublisher>,
}

impl RolloutEvaluator {
    pub fn new(store: StateStore, deployments: DeploymentManager, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            deployments,
            events,
        }
    }

    /// Evaluate every due rollout of the context's tenant at time `now`.
    ///
    /// Failures are isolated per rollout and counted in the report; only a
    /// failure to list the rollouts is returned.
    pub fn tick(&self, ctx: &TenantContext, now: u64) -> RolloutResult<EvaluationReport> {
        self.tick_with(ctx, now, &mut NoKeepAlive)
    }

    /// [`tick`](Self::tick), calling `keep_alive` before every rollout and
    /// every action creation. A keep-alive failure ends the pass with
    /// [`RolloutError::Aborted`].
    pub fn tick_with(
        &self,
        ctx: &TenantContext,
        now: u64,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<EvaluationReport> {
        let rollouts = self.store.list_rollouts_by_status(
            &ctx.tenant,
            &[RolloutStatus::Ready, RolloutStatus::Starting, RolloutStatus::Running],
        )?;
        let mut report = EvaluationReport::default();
        for rollout in rollouts {
            if rollout.status == RolloutStatus::Ready && !rollout.start_at.is_some_and(|at| at <= now) {
                continue;
            }
            keep_alive.keep_alive()?;
            let id = rollout.id;
            report.rollouts_evaluated += 1;
            match self.evaluate(ctx, rollout, now, &mut report, keep_alive) {
                Ok(()) => {}
                Err(e) if e.is_aborted() => {
                    warn!(tenant = %ctx.tenant, rollout = id, error = %e, "evaluation pass aborted");
                    return Err(e);
                }
                Err(e) if e.is_conflict() => {
                    report.conflicts += 1;
                    warn!(tenant = %ctx.tenant, rollout = id, error = %e, "rollout skipped this tick");
                }
                Err(e) if e.is_rollout_inactive() => {
                    info!(tenant = %ctx.tenant, rollout = id, error = %e, "rollout changed state during evaluation");
                }
                Err(e) => {
                    report.failures += 1;
                    error!(tenant = %ctx.tenant, rollout = id, error = %e, "rollout evaluation failed");
                }
            }
        }
        debug!(tenant = %ctx.tenant, ?report, "evaluation pass complete");
        Ok(report)
    }

    fn evaluate(
        &self,
        ctx: &TenantContext,
        mut rollout: Rollout,
        now: u64,
        report: &mut EvaluationReport,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<()> {
        if rollout.status == RolloutStatus::Ready {
            let from = rollout.status;
            rollout.status = RolloutStatus::Starting;
            rollout.updated_at = now;
            rollout = self.store.update_rollout(&rollout)?;
            info!(tenant = %ctx.tenant, rollout = rollout.id, "scheduled start reached");
            self.publish_rollout(ctx, &rollout, from);
        }

        if rollout.status == RolloutStatus::Starting {
            rollout = self.start(ctx, rollout, now, report, keep_alive)?;
        }

        self.evaluate_running(ctx, rollout, now, report, keep_alive)
    }

    /// Activate group 0 and create its actions.
    fn start(
        &self,
        ctx: &TenantContext,
        rollout: Rollout,
        now: u64,
        report: &mut EvaluationReport,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<Rollout> {
        let groups = self.store.list_groups(&ctx.tenant, rollout.id)?;
        let first = groups
            .first()
            .ok_or_else(|| RolloutError::Validation(format!("rollout {} has no groups", rollout.id)))?;

        let mut group = first.clone();
        group.status = RolloutGroupStatus::Running;
        group.updated_at = now;
        let mut next = rollout.clone();
        next.status = RolloutStatus::Running;
        next.updated_at = now;
        let (stored, mut stored_groups) = self.store.update_rollout_and_groups(&next, &[group])?;
        let group = stored_groups.remove(0);

        info!(tenant = %ctx.tenant, rollout = stored.id, group = group.id, "rollout started");
        self.publish_rollout(ctx, &stored, rollout.status);
        self.publish_group(ctx, &group, first.status);
        report.rollouts_started += 1;

        report.actions_created += self
            .deployments
            .ensure_group_actions(ctx, &stored, &group, keep_alive)?;
        Ok(stored)
    }

    fn evaluate_running(
        &self,
        ctx: &TenantContext,
        rollout: Rollout,
        now: u64,
        report: &mut EvaluationReport,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<()> {
        let mut groups = self.store.list_groups(&ctx.tenant, rollout.id)?;
        let Some(index) = groups.iter().position(|g| g.status == RolloutGroupStatus::Running) else {
            warn!(tenant = %ctx.tenant, rollout = rollout.id, "running rollout has no running group");
            return Ok(());
        };

        // Resume an activation that did not get to create every action.
        if !groups[index].actions_created {
            report.actions_created += self
                .deployments
                .ensure_group_actions(ctx, &rollout, &groups[index], keep_alive)?;
            groups = self.store.list_groups(&ctx.tenant, rollout.id)?;
        }

        let counts = self.store.group_action_counts(&ctx.tenant, &rollout.group_ids)?;
        let current = &groups[index];
        let mut updated = current.clone();
        updated.counts = group_counts(counts.get(&current.id));

        let total = current.target_count();
        let success = Condition::success(&current.conditions)?;
        let error = Condition::error(&current.conditions)?;

        let mut next_rollout = rollout.clone();
        let mut activated = None;
        if condition::error_met(&error, updated.counts.error, total) {
            updated.status = RolloutGroupStatus::Error;
            updated.updated_at = now;
            match current.conditions.error_action {
                ErrorAction::Pause => next_rollout.status = RolloutStatus::Stopped,
            }
        } else if success.is_met(updated.counts.finished, total) {
            updated.status = RolloutGroupStatus::Finished;
            updated.updated_at = now;
            match current.conditions.success_action {
                SuccessAction::NextGroup => match groups.get(index + 1) {
                    Some(next) => {
                        let mut next = next.clone();
                        next.status = RolloutGroupStatus::Running;
                        next.updated_at = now;
                        activated = Some(next);
                    }
                    None => next_rollout.status = RolloutStatus::Finished,
                },
            }
        }
        if next_rollout.status != rollout.status {
            next_rollout.updated_at = now;
        }

        let mut changed = vec![updated];
        changed.extend(activated);
        next_rollout.counters = target_counters(&groups, &changed, &counts);

        let group_unchanged = changed.len() == 1 && changed[0] == *current;
        if group_unchanged && next_rollout == rollout {
            return Ok(());
        }

        let (stored, stored_groups) = self.store.update_rollout_and_groups(&next_rollout, &changed)?;

        let decided = &stored_groups[0];
        if decided.status != current.status {
            info!(
                tenant = %ctx.tenant,
                rollout = stored.id,
                group = decided.id,
                status = ?decided.status,
                finished = decided.counts.finished,
                errors = decided.counts.error,
                total,
                "group decided"
            );
            self.publish_group(ctx, decided, current.status);
            match decided.status {
                RolloutGroupStatus::Finished => report.groups_finished += 1,
                RolloutGroupStatus::Error => report.groups_errored += 1,
                _ => {}
            }
        }
        if stored.status != rollout.status {
            self.publish_rollout(ctx, &stored, rollout.status);
            match stored.status {
                RolloutStatus::Finished => report.rollouts_finished += 1,
                RolloutStatus::Stopped => report.rollouts_stopped += 1,
                _ => {}
            }
        }
        if let Some(next) = stored_groups.get(1) {
            self.publish_group(ctx, next, RolloutGroupStatus::Scheduled);
            report.actions_created += self
                .deployments
                .ensure_group_actions(ctx, &stored, next, keep_alive)?;
        }
        Ok(())
    }

    fn publish_rollout(&self, ctx: &TenantContext, rollout: &Rollout, from: RolloutStatus) {
        self.events.publish(
            ctx,
            RolloutEvent::RolloutStatusChanged {
                rollout_id: rollout.id,
                from: Some(from),
                to: rollout.status,
            },
        );
    }

    fn publish_group(&self, ctx: &TenantContext, group: &RolloutGroup, from: RolloutGroupStatus) {
        self.events.publish(
            ctx,
            RolloutEvent::RolloutGroupStatusChanged {
                rollout_id: group.rollout_id,
                group_id: group.id,
                from,
                to: group.status,
            },
        );
    }
}

fn group_counts(counts: Option<&ActionCounts>) -> GroupActionCounts {
    let Some(counts) = counts else {
        return GroupActionCounts::default();
    };
    GroupActionCounts {
        running: counts.active(),
        finished: counts.get(ActionStatus::Finished),
        error: counts.get(ActionStatus::Error),
        canceled: counts.get(ActionStatus::Canceled),
    }
}

/// Rollout counters over all groups, with `changed` taking precedence over
/// the stored copies.
fn target_counters(
    groups: &[RolloutGroup],
    changed: &[RolloutGroup],
    counts: &BTreeMap<GroupId, ActionCounts>,
) -> TotalTargetCountStatus {
    let mut totals = TotalTargetCountStatus::default();
    for stored in groups {
        let group = changed.iter().find(|g| g.id == stored.id).unwrap_or(stored);
        let members = group.target_count();
        if group.status == RolloutGroupStatus::Scheduled {
            totals.scheduled += members;
            continue;
        }
        let c = counts.get(&group.id).cloned().unwrap_or_default();
        totals.running += c.active();
        totals.finished += c.get(ActionStatus::Finished);
        totals.error += c.get(ActionStatus::Error);
        totals.canceled += c.get(ActionStatus::Canceled);
        totals.not_started += members.saturating_sub(c.targets_with_action);
    }
    totals
}
