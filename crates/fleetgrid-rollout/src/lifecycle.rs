//! Rollout lifecycle: create, start, pause, resume, delete.
//!
//! ```text
//! Creating ──► Ready ──► Starting ──► Running ──► Finished
//!                                      │  ▲  │
//!                                      ▼  │  └──► Stopped ──► Running
//!                                     Paused
//! ```
//!
//! Any non-terminal status may move to `Deleted`. The scheduler tick does
//! the actual group activation; the manager only records intent.

use std::sync::Arc;

use fleet_core::{TenantContext, TenantSettingsLookup};
use fleetgrid_state::{
    ActionType, DistributionSetId, GroupActionCounts, GroupConditions, Rollout, RolloutGroup,
    RolloutGroupStatus, RolloutId, RolloutStatus, StateStore, TotalTargetCountStatus,
};
use tracing::info;

use crate::assignment::{DeploymentManager, validate_action_type};
use crate::condition;
use crate::epoch_secs;
use crate::error::{RolloutError, RolloutResult, retry_on_conflict};
use crate::events::{EventPublisher, RolloutEvent};
use crate::filter::TargetFilter;
use crate::keep_alive::NoKeepAlive;
use crate::partition::{self, GroupDefinition};

/// Parameters for a new rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRollout {
    pub name: String,
    pub description: Option<String>,
    pub target_filter: String,
    pub distribution_set_id: DistributionSetId,
    pub groups: Vec<GroupDefinition>,
    /// Conditions for groups that do not bring their own.
    pub conditions: GroupConditions,
    pub action_type: ActionType,
    pub forced_time: Option<u64>,
    /// Start automatically once this unix timestamp has passed.
    pub start_at: Option<u64>,
    pub weight: Option<u32>,
}

impl CreateRollout {
    pub fn new(
        name: impl Into<String>,
        target_filter: impl Into<String>,
        distribution_set_id: DistributionSetId,
        groups: Vec<GroupDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            target_filter: target_filter.into(),
            distribution_set_id,
            groups,
            conditions: GroupConditions::default(),
            action_type: ActionType::Forced,
            forced_time: None,
            start_at: None,
            weight: None,
        }
    }

    pub fn with_conditions(mut self, conditions: GroupConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_action_type(mut self, action_type: ActionType, forced_time: Option<u64>) -> Self {
        self.action_type = action_type;
        self.forced_time = forced_time;
        self
    }

    pub fn with_start_at(mut self, start_at: u64) -> Self {
        self.start_at = Some(start_at);
        self
    }
}

/// Request-path operations on rollouts.
#[derive(Clone)]
pub struct RolloutManager {
    store: StateStore,
    filter: Arc<dyn TargetFilter>,
    settings: Arc<dyn TenantSettingsLookup>,
    events: Arc<dyn EventPublisher>,
    deployments: DeploymentManager,
}

impl RolloutManager {
    pub fn new(
        store: StateStore,
        filter: Arc<dyn TargetFilter>,
        settings: Arc<dyn TenantSettingsLookup>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let deployments = DeploymentManager::new(store.clone(), settings.clone(), events.clone());
        Self {
            store,
            filter,
            settings,
            events,
            deployments,
        }
    }

    pub fn deployments(&self) -> &DeploymentManager {
        &self.deployments
    }

    /// Validate and persist a rollout with its groups, leaving it `Ready`.
    pub fn create(&self, ctx: &TenantContext, request: CreateRollout) -> RolloutResult<Rollout> {
        if request.name.trim().is_empty() {
            return Err(RolloutError::Validation("rollout name must not be empty".into()));
        }
        validate_action_type(request.action_type, request.forced_time)?;
        self.deployments
            .load_distribution_set(ctx, request.distribution_set_id)?;

        let population = self.filter.resolve(&ctx.tenant, &request.target_filter)?;
        if population.is_empty() {
            return Err(RolloutError::Validation(format!(
                "target filter {:?} matched no targets",
                request.target_filter
            )));
        }
        let members = partition::split(&population, &request.groups)?;
        partition::check_quotas(&members, &self.settings.settings(&ctx.tenant).quotas)?;

        let now = epoch_secs();
        let mut groups = Vec::with_capacity(members.len());
        for (index, (definition, target_ids)) in request.groups.iter().zip(members).enumerate() {
            let conditions = definition
                .conditions
                .clone()
                .unwrap_or_else(|| request.conditions.clone());
            condition::validate(&conditions)?;
            groups.push(RolloutGroup {
                id: 0,
                tenant: ctx.tenant.clone(),
                rollout_id: 0,
                ordinal: index as u32,
                name: definition
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("group-{}", index + 1)),
                status: RolloutGroupStatus::Scheduled,
                target_ids,
                conditions,
                counts: GroupActionCounts::default(),
                actions_created: false,
                created_at: now,
                updated_at: now,
                revision: 0,
            });
        }

        let total_targets: u32 = groups.iter().map(RolloutGroup::target_count).sum();
        let rollout = Rollout {
            id: 0,
            tenant: ctx.tenant.clone(),
            name: request.name,
            description: request.description,
            distribution_set_id: request.distribution_set_id,
            target_filter: request.target_filter,
            group_ids: Vec::new(),
            status: RolloutStatus::Creating,
            total_targets,
            counters: TotalTargetCountStatus {
                scheduled: total_targets,
                ..TotalTargetCountStatus::default()
            },
            action_type: request.action_type,
            forced_time: request.forced_time,
            start_at: request.start_at,
            weight: request.weight,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        self.store.register_tenant(&ctx.tenant, now)?;
        let (rollout, groups) = self.store.create_rollout(rollout, groups)?;
        self.publish_status(ctx, rollout.id, None, RolloutStatus::Creating);

        let mut ready = rollout;
        ready.status = RolloutStatus::Ready;
        let ready = self.store.update_rollout(&ready)?;
        self.publish_status(ctx, ready.id, Some(RolloutStatus::Creating), RolloutStatus::Ready);

        info!(
            tenant = %ctx.tenant,
            rollout = ready.id,
            name = %ready.name,
            groups = groups.len(),
            targets = total_targets,
            "rollout created"
        );
        Ok(ready)
    }

    /// Request activation; the next tick starts the first group.
    pub fn start(&self, ctx: &TenantContext, id: RolloutId, force: bool) -> RolloutResult<Rollout> {
        if force {
            info!(tenant = %ctx.tenant, rollout = id, "forced start requested");
        }
        self.transition(ctx, id, "start", |status| match status {
            RolloutStatus::Ready | RolloutStatus::Creating => Ok(RolloutStatus::Starting),
            other => Err(invalid(id, other, "start")),
        })
    }

    pub fn pause(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        self.transition(ctx, id, "pause", |status| match status {
            RolloutStatus::Running => Ok(RolloutStatus::Paused),
            other => Err(invalid(id, other, "pause")),
        })
    }

    /// Resume a paused rollout, or continue a stopped one with its next
    /// scheduled group.
    ///
    /// A stopped rollout without scheduled groups left becomes `Finished`.
    pub fn resume(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        let (from, rollout, activated) = retry_on_conflict("resume", || {
            let rollout = self.load(ctx, id)?;
            let now = epoch_secs();
            let mut next = rollout.clone();
            next.updated_at = now;
            match rollout.status {
                RolloutStatus::Paused => {
                    next.status = RolloutStatus::Running;
                    Ok((rollout.status, self.store.update_rollout(&next)?, None))
                }
                RolloutStatus::Stopped => {
                    let groups = self.store.list_groups(&ctx.tenant, id)?;
                    match groups.iter().find(|g| g.status == RolloutGroupStatus::Scheduled) {
                        Some(group) => {
                            let mut group = group.clone();
                            group.status = RolloutGroupStatus::Running;
                            group.updated_at = now;
                            next.status = RolloutStatus::Running;
                            let (stored, mut groups) =
                                self.store.update_rollout_and_groups(&next, &[group])?;
                            Ok((rollout.status, stored, groups.pop()))
                        }
                        None => {
                            next.status = RolloutStatus::Finished;
                            Ok((rollout.status, self.store.update_rollout(&next)?, None))
                        }
                    }
                }
                other => Err(invalid(id, other, "resume")),
            }
        })?;

        self.publish_status(ctx, id, Some(from), rollout.status);
        info!(tenant = %ctx.tenant, rollout = id, status = ?rollout.status, "rollout resumed");
        if let Some(group) = activated {
            self.publish_group(ctx, &group, RolloutGroupStatus::Scheduled);
            self.deployments
                .ensure_group_actions(ctx, &rollout, &group, &mut NoKeepAlive)?;
        }
        Ok(rollout)
    }

    /// Soft-delete a rollout and force-cancel its active actions.
    pub fn delete(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        let rollout = self.transition(ctx, id, "delete", |status| {
            if status.is_terminal() {
                Err(invalid(id, status, "delete"))
            } else {
                Ok(RolloutStatus::Deleted)
            }
        })?;
        let canceled = self
            .deployments
            .cancel_group_actions(ctx, &rollout.group_ids)?;
        info!(tenant = %ctx.tenant, rollout = id, canceled, "rollout deleted");
        Ok(rollout)
    }

    /// Finish the running group regardless of its thresholds and start the
    /// next one.
    pub fn trigger_next_group(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        let (rollout, groups) = retry_on_conflict("trigger next group", || {
            let rollout = self.load(ctx, id)?;
            if rollout.status != RolloutStatus::Running {
                return Err(invalid(id, rollout.status, "trigger next group"));
            }
            let groups = self.store.list_groups(&ctx.tenant, id)?;
            let index = groups
                .iter()
                .position(|g| g.status == RolloutGroupStatus::Running)
                .ok_or_else(|| {
                    RolloutError::InvalidStateTransition(format!("rollout {id} has no running group"))
                })?;
            let Some(next) = groups.get(index + 1) else {
                return Err(RolloutError::InvalidStateTransition(format!(
                    "rollout {id} is already on its last group"
                )));
            };
            let now = epoch_secs();
            let mut current = groups[index].clone();
            current.status = RolloutGroupStatus::Finished;
            current.updated_at = now;
            let mut next = next.clone();
            next.status = RolloutGroupStatus::Running;
            next.updated_at = now;
            let mut updated = rollout.clone();
            updated.updated_at = now;
            Ok(self.store.update_rollout_and_groups(&updated, &[current, next])?)
        })?;

        self.publish_group(ctx, &groups[0], RolloutGroupStatus::Running);
        self.publish_group(ctx, &groups[1], RolloutGroupStatus::Scheduled);
        info!(
            tenant = %ctx.tenant,
            rollout = id,
            group = groups[1].id,
            "next group triggered manually"
        );
        self.deployments
            .ensure_group_actions(ctx, &rollout, &groups[1], &mut NoKeepAlive)?;
        Ok(rollout)
    }

    pub fn get(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        self.load(ctx, id)
    }

    pub fn list(&self, ctx: &TenantContext) -> RolloutResult<Vec<Rollout>> {
        Ok(self.store.list_rollouts(&ctx.tenant)?)
    }

    /// Groups in ordinal order.
    pub fn groups(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Vec<RolloutGroup>> {
        Ok(self.store.list_groups(&ctx.tenant, id)?)
    }

    fn load(&self, ctx: &TenantContext, id: RolloutId) -> RolloutResult<Rollout> {
        self.store
            .get_rollout(&ctx.tenant, id)?
            .ok_or_else(|| RolloutError::NotFound(format!("rollout {id}")))
    }

    fn transition(
        &self,
        ctx: &TenantContext,
        id: RolloutId,
        what: &str,
        decide: impl Fn(RolloutStatus) -> RolloutResult<RolloutStatus>,
    ) -> RolloutResult<Rollout> {
        let (from, stored) = retry_on_conflict(what, || {
            let rollout = self.load(ctx, id)?;
            let mut next = rollout.clone();
            next.status = decide(rollout.status)?;
            next.updated_at = epoch_secs();
            Ok((rollout.status, self.store.update_rollout(&next)?))
        })?;
        self.publish_status(ctx, id, Some(from), stored.status);
        info!(tenant = %ctx.tenant, rollout = id, ?from, to = ?stored.status, "rollout {what}");
        Ok(stored)
    }

    fn publish_status(
        &self,
        ctx: &TenantContext,
        rollout_id: RolloutId,
        from: Option<RolloutStatus>,
        to: RolloutStatus,
    ) {
        if from != Some(to) {
            self.events
                .publish(ctx, RolloutEvent::RolloutStatusChanged { rollout_id, from, to });
        }
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

fn invalid(id: RolloutId, status: RolloutStatus, operation: &str) -> RolloutError {
    RolloutError::InvalidStateTransition(format!("cannot {operation} rollout {id} in status {status:?}"))
}

#[cfg(test)]
mod tests {
    use fleet_core::TenantSettings;
    use fleetgrid_state::{ActionStatus, Target};

    use super::*;
    use crate::events::TracingPublisher;
    use crate::filter::StaticTargetFilter;

    const TENANT: &str = "acme";

    fn setup(targets: usize) -> (StateStore, RolloutManager, u64) {
        let store = StateStore::open_in_memory().unwrap();
        let ids: Vec<String> = (0..targets).map(|i| format!("dev-{i:02}")).collect();
        for id in &ids {
            store.put_target(&Target::new(TENANT, id, 1)).unwrap();
        }
        let ds = store
            .create_distribution_set(TENANT, "fw", "1.0", vec![7], true, 1)
            .unwrap();
        let filter = StaticTargetFilter::new().with_expression("all", ids);
        let manager = RolloutManager::new(
            store.clone(),
            Arc::new(filter),
            Arc::new(TenantSettings::default()),
            Arc::new(TracingPublisher),
        );
        (store, manager, ds.id)
    }

    fn halves(ds: u64) -> CreateRollout {
        CreateRollout::new(
            "fw-1.0",
            "all",
            ds,
            vec![GroupDefinition::percentage(50), GroupDefinition::percentage(50)],
        )
    }

    fn ctx() -> TenantContext {
        TenantContext::new(TENANT)
    }

    #[test]
    fn create_persists_ready_rollout_with_groups() {
        let (store, manager, ds) = setup(10);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();
        assert_eq!(rollout.status, RolloutStatus::Ready);
        assert_eq!(rollout.total_targets, 10);
        assert_eq!(rollout.counters.scheduled, 10);

        let groups = manager.groups(&ctx(), rollout.id).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "group-1");
        assert!(groups.iter().all(|g| g.status == RolloutGroupStatus::Scheduled));
        let sum: u32 = groups.iter().map(RolloutGroup::target_count).sum();
        assert_eq!(sum, rollout.total_targets);
        // The tenant becomes visible to the scheduler.
        assert_eq!(store.list_tenants().unwrap(), vec![TENANT]);
    }

    #[test]
    fn create_rejects_invalid_requests() {
        let (store, manager, ds) = setup(4);
        assert!(matches!(
            manager.create(&ctx(), CreateRollout::new("x", "all", 99, vec![GroupDefinition::percentage(100)])),
            Err(RolloutError::NotFound(_))
        ));
        assert!(matches!(
            manager.create(&ctx(), halves(ds).with_action_type(ActionType::TimeForced, None)),
            Err(RolloutError::Validation(_))
        ));
        let bad_threshold = GroupConditions {
            success_expression: "0".into(),
            ..GroupConditions::default()
        };
        assert!(matches!(
            manager.create(&ctx(), halves(ds).with_conditions(bad_threshold)),
            Err(RolloutError::Validation(_))
        ));
        assert!(matches!(
            manager.create(&ctx(), CreateRollout::new("x", "none", ds, vec![GroupDefinition::percentage(100)])),
            Err(RolloutError::Validation(_))
        ));
        // Nothing was stored.
        assert!(store.list_rollouts(TENANT).unwrap().is_empty());
    }

    #[test]
    fn create_enforces_quotas() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.put_target(&Target::new(TENANT, id, 1)).unwrap();
        }
        let ds = store.create_distribution_set(TENANT, "fw", "1", vec![], true, 1).unwrap();
        let settings = TenantSettings {
            quotas: fleet_core::Quotas {
                max_groups_per_rollout: 10,
                max_targets_per_group: 2,
            },
            ..TenantSettings::default()
        };
        let manager = RolloutManager::new(
            store,
            Arc::new(StaticTargetFilter::new().with_expression("all", ["a", "b", "c"])),
            Arc::new(settings),
            Arc::new(TracingPublisher),
        );
        let request = CreateRollout::new("big", "all", ds.id, vec![GroupDefinition::percentage(100)]);
        assert!(matches!(manager.create(&ctx(), request), Err(RolloutError::Validation(_))));
    }

    #[test]
    fn state_machine_guards() {
        let (_, manager, ds) = setup(4);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();

        assert!(matches!(
            manager.pause(&ctx(), rollout.id),
            Err(RolloutError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            manager.resume(&ctx(), rollout.id),
            Err(RolloutError::InvalidStateTransition(_))
        ));
        let started = manager.start(&ctx(), rollout.id, false).unwrap();
        assert_eq!(started.status, RolloutStatus::Starting);
        assert!(matches!(
            manager.start(&ctx(), rollout.id, true),
            Err(RolloutError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            manager.trigger_next_group(&ctx(), rollout.id),
            Err(RolloutError::InvalidStateTransition(_))
        ));

        let deleted = manager.delete(&ctx(), rollout.id).unwrap();
        assert_eq!(deleted.status, RolloutStatus::Deleted);
        assert!(matches!(
            manager.delete(&ctx(), rollout.id),
            Err(RolloutError::InvalidStateTransition(_))
        ));
        assert!(matches!(manager.get(&ctx(), 404), Err(RolloutError::NotFound(_))));
    }

    /// Put the rollout into `Running` with its first group active, the way
    /// the scheduler tick does.
    fn run_first_group(store: &StateStore, manager: &RolloutManager, id: RolloutId) -> Rollout {
        let mut rollout = store.get_rollout(TENANT, id).unwrap().unwrap();
        let mut first = store.list_groups(TENANT, id).unwrap().remove(0);
        rollout.status = RolloutStatus::Running;
        first.status = RolloutGroupStatus::Running;
        let (rollout, groups) = store.update_rollout_and_groups(&rollout, &[first]).unwrap();
        manager
            .deployments()
            .ensure_group_actions(&ctx(), &rollout, &groups[0], &mut NoKeepAlive)
            .unwrap();
        rollout
    }

    #[test]
    fn pause_and_resume() {
        let (store, manager, ds) = setup(4);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();
        run_first_group(&store, &manager, rollout.id);

        assert_eq!(manager.pause(&ctx(), rollout.id).unwrap().status, RolloutStatus::Paused);
        assert_eq!(manager.resume(&ctx(), rollout.id).unwrap().status, RolloutStatus::Running);
    }

    #[test]
    fn trigger_next_group_advances_and_stops_at_last() {
        let (store, manager, ds) = setup(4);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();
        run_first_group(&store, &manager, rollout.id);

        manager.trigger_next_group(&ctx(), rollout.id).unwrap();
        let groups = store.list_groups(TENANT, rollout.id).unwrap();
        assert_eq!(groups[0].status, RolloutGroupStatus::Finished);
        assert_eq!(groups[1].status, RolloutGroupStatus::Running);
        assert!(groups[1].actions_created);
        assert_eq!(store.list_actions_for_group(TENANT, groups[1].id).unwrap().len(), 2);

        assert!(matches!(
            manager.trigger_next_group(&ctx(), rollout.id),
            Err(RolloutError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn resume_stopped_continues_with_next_group() {
        let (store, manager, ds) = setup(4);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();
        run_first_group(&store, &manager, rollout.id);

        // Halt the way the error action does.
        let mut stopped = store.get_rollout(TENANT, rollout.id).unwrap().unwrap();
        let mut first = store.list_groups(TENANT, rollout.id).unwrap().remove(0);
        stopped.status = RolloutStatus::Stopped;
        first.status = RolloutGroupStatus::Error;
        store.update_rollout_and_groups(&stopped, &[first]).unwrap();

        let resumed = manager.resume(&ctx(), rollout.id).unwrap();
        assert_eq!(resumed.status, RolloutStatus::Running);
        let groups = store.list_groups(TENANT, rollout.id).unwrap();
        assert_eq!(groups[0].status, RolloutGroupStatus::Error);
        assert_eq!(groups[1].status, RolloutGroupStatus::Running);
        assert!(groups[1].actions_created);
    }

    #[test]
    fn delete_cancels_active_actions() {
        let (store, manager, ds) = setup(4);
        let rollout = manager.create(&ctx(), halves(ds)).unwrap();
        run_first_group(&store, &manager, rollout.id);

        manager.delete(&ctx(), rollout.id).unwrap();
        let first = store.list_groups(TENANT, rollout.id).unwrap().remove(0);
        let actions = store.list_actions_for_group(TENANT, first.id).unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.status == ActionStatus::Canceled));
    }
}
