//! Action state machine and assignment.
//!
//! An assignment creates one action for one target. Unless the tenant allows
//! multi-assignment, every still-active action of that target is superseded
//! (moved straight to `Canceled`) in the same store transaction, so at most
//! one non-terminal action per target exists at any time.
//!
//! Device feedback appends to the action's status log; terminal codes also
//! move the action.
//!
//! ```text
//! Created ──► Running ──► Finished
//!               │  ▲  └──► Error
//!               ▼  │
//!            Canceling ──► Canceled
//! ```

use std::sync::Arc;

use fleet_core::{TenantContext, TenantSettingsLookup};
use fleetgrid_state::{
    Action, ActionId, ActionStatus, ActionType, AssignmentWrite, DistributionSet,
    DistributionSetId, GroupId, MaintenanceWindow, NewStatusEntry, Rollout, RolloutGroup,
    RolloutId, StateError, StateStore, StatusCode, TargetId,
};
use tracing::{debug, info, warn};

use crate::epoch_secs;
use crate::error::{RolloutError, RolloutResult, retry_on_conflict};
use crate::events::{EventPublisher, RolloutEvent};
use crate::keep_alive::KeepAlive;

/// Parameters of a single assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    pub target_id: TargetId,
    pub distribution_set_id: DistributionSetId,
    pub action_type: ActionType,
    /// Required for [`ActionType::TimeForced`].
    pub forced_time: Option<u64>,
    pub weight: Option<u32>,
    pub maintenance_window: Option<MaintenanceWindow>,
}

impl AssignRequest {
    /// A forced assignment without weight or maintenance window.
    pub fn new(target_id: impl Into<TargetId>, distribution_set_id: DistributionSetId) -> Self {
        Self {
            target_id: target_id.into(),
            distribution_set_id,
            action_type: ActionType::Forced,
            forced_time: None,
            weight: None,
            maintenance_window: None,
        }
    }

    pub fn with_action_type(mut self, action_type: ActionType, forced_time: Option<u64>) -> Self {
        self.action_type = action_type;
        self.forced_time = forced_time;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_maintenance_window(mut self, window: MaintenanceWindow) -> Self {
        self.maintenance_window = Some(window);
        self
    }
}

/// Result of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    Created {
        action: Action,
        superseded: Vec<ActionId>,
    },
    /// The rollout group already holds an action for this target.
    AlreadyAssigned,
}

/// Result of applying device feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The action is unknown or was cleaned up.
    Ignored,
    /// The entry was logged; the action status did not change.
    Appended,
    StatusChanged { from: ActionStatus, to: ActionStatus },
}

/// Creates, cancels and advances actions.
#[derive(Clone)]
pub struct DeploymentManager {
    store: StateStore,
    settings: Arc<dyn TenantSettingsLookup>,
    events: Arc<dyn EventPublisher>,
}

impl DeploymentManager {
    pub fn new(
        store: StateStore,
        settings: Arc<dyn TenantSettingsLookup>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            settings,
            events,
        }
    }

    /// Assign a distribution set to a target outside of any rollout.
    pub fn assign(&self, ctx: &TenantContext, request: AssignRequest) -> RolloutResult<AssignOutcome> {
        validate_action_type(request.action_type, request.forced_time)?;
        let ds = self.load_distribution_set(ctx, request.distribution_set_id)?;
        self.assign_with(ctx, &ds, &request, None)
    }

    /// Create the rollout actions of a group.
    ///
    /// Targets that already hold an action in the group are skipped, so this
    /// is safe to repeat after a crash. Targets that no longer exist are
    /// logged and skipped. Stops at the first target the store refuses
    /// because the rollout is no longer starting or running, or when
    /// `keep_alive` fails. Returns the number of actions created.
    pub fn assign_group(
        &self,
        ctx: &TenantContext,
        rollout: &Rollout,
        group: &RolloutGroup,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<u32> {
        let ds = self.load_distribution_set(ctx, rollout.distribution_set_id)?;
        let mut created = 0;
        for target_id in &group.target_ids {
            keep_alive.keep_alive()?;
            let request = AssignRequest {
                target_id: target_id.clone(),
                distribution_set_id: rollout.distribution_set_id,
                action_type: rollout.action_type,
                forced_time: rollout.forced_time,
                weight: rollout.weight,
                maintenance_window: None,
            };
            match self.assign_with(ctx, &ds, &request, Some((rollout.id, group.id))) {
                Ok(AssignOutcome::Created { .. }) => created += 1,
                Ok(AssignOutcome::AlreadyAssigned) => {}
                Err(RolloutError::NotFound(what)) => {
                    warn!(
                        tenant = %ctx.tenant,
                        rollout = rollout.id,
                        group = group.id,
                        target = %target_id,
                        %what,
                        "skipping rollout target"
                    );
                }
                Err(e) if e.is_rollout_inactive() => {
                    info!(
                        tenant = %ctx.tenant,
                        rollout = rollout.id,
                        group = group.id,
                        created,
                        "rollout left running state, group assignment stopped"
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// [`assign_group`](Self::assign_group), then mark the group's actions
    /// as created.
    pub fn ensure_group_actions(
        &self,
        ctx: &TenantContext,
        rollout: &Rollout,
        group: &RolloutGroup,
        keep_alive: &mut dyn KeepAlive,
    ) -> RolloutResult<u32> {
        let created = self.assign_group(ctx, rollout, group, keep_alive)?;
        retry_on_conflict("mark group actions created", || {
            let mut current = self
                .store
                .get_group(&ctx.tenant, group.id)?
                .ok_or_else(|| RolloutError::NotFound(format!("rollout group {}", group.id)))?;
            if current.actions_created {
                return Ok(());
            }
            current.actions_created = true;
            self.store.update_group(&current)?;
            Ok(())
        })?;
        debug!(
            tenant = %ctx.tenant,
            rollout = rollout.id,
            group = group.id,
            created,
            "group actions created"
        );
        Ok(created)
    }

    fn assign_with(
        &self,
        ctx: &TenantContext,
        ds: &DistributionSet,
        request: &AssignRequest,
        rollout: Option<(RolloutId, GroupId)>,
    ) -> RolloutResult<AssignOutcome> {
        if self.store.get_target(&ctx.tenant, &request.target_id)?.is_none() {
            return Err(RolloutError::NotFound(format!("target {}", request.target_id)));
        }
        let multi_assignment = self.settings.settings(&ctx.tenant).multi_assignment;

        let commit = retry_on_conflict("assign", || {
            let now = epoch_secs();
            let supersede = if multi_assignment {
                Vec::new()
            } else {
                self.store
                    .active_actions_for_target(&ctx.tenant, &request.target_id)?
                    .into_iter()
                    .map(|mut prior| {
                        prior.status = ActionStatus::Canceled;
                        prior.updated_at = now;
                        prior
                    })
                    .collect()
            };
            let action = Action {
                id: 0,
                tenant: ctx.tenant.clone(),
                target_id: request.target_id.clone(),
                rollout_id: rollout.map(|(id, _)| id),
                rollout_group_id: rollout.map(|(_, id)| id),
                distribution_set_id: ds.id,
                software_modules: ds.software_modules.clone(),
                status: ActionStatus::Running,
                action_type: request.action_type,
                forced_time: request.forced_time,
                weight: request.weight,
                maintenance_window: request.maintenance_window.clone(),
                created_at: now,
                updated_at: now,
                revision: 0,
            };
            let write = AssignmentWrite {
                action,
                initial_entry: NewStatusEntry::new(StatusCode::Running, now)
                    .with_message(format!("assigned distribution set {}", ds.id)),
                supersede,
                supersede_entry: Some(NewStatusEntry::new(StatusCode::Canceled, now)),
            };
            match self.store.commit_assignment(write) {
                Ok(commit) => Ok(Some(commit)),
                Err(StateError::Conflict(_)) if rollout.is_some() => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        let Some(commit) = commit else {
            debug!(
                tenant = %ctx.tenant,
                target = %request.target_id,
                "target already assigned in rollout group"
            );
            return Ok(AssignOutcome::AlreadyAssigned);
        };

        for prior in &commit.superseded {
            self.events.publish(
                ctx,
                RolloutEvent::ActionCanceled {
                    action_id: prior.id,
                    target_id: prior.target_id.clone(),
                    forced: true,
                },
            );
        }
        self.events.publish(
            ctx,
            RolloutEvent::ActionCreated {
                action_id: commit.action.id,
                target_id: commit.action.target_id.clone(),
                rollout_id: commit.action.rollout_id,
                group_id: commit.action.rollout_group_id,
            },
        );
        debug!(
            tenant = %ctx.tenant,
            action = commit.action.id,
            target = %commit.action.target_id,
            superseded = commit.superseded.len(),
            "action created"
        );
        Ok(AssignOutcome::Created {
            superseded: commit.superseded.iter().map(|a| a.id).collect(),
            action: commit.action,
        })
    }

    /// Apply device feedback. Unknown action ids are logged and ignored.
    pub fn apply_feedback(
        &self,
        ctx: &TenantContext,
        action_id: ActionId,
        code: StatusCode,
        messages: Vec<String>,
    ) -> RolloutResult<FeedbackOutcome> {
        match self.apply_feedback_strict(ctx, action_id, code, messages) {
            Err(RolloutError::NotFound(what)) => {
                warn!(
                    tenant = %ctx.tenant,
                    action = action_id,
                    ?code,
                    %what,
                    "feedback for unknown action ignored"
                );
                Ok(FeedbackOutcome::Ignored)
            }
            other => other,
        }
    }

    /// Like [`apply_feedback`](Self::apply_feedback) but fails with
    /// `NotFound` for unknown actions.
    pub fn apply_feedback_strict(
        &self,
        ctx: &TenantContext,
        action_id: ActionId,
        code: StatusCode,
        messages: Vec<String>,
    ) -> RolloutResult<FeedbackOutcome> {
        let (outcome, action) = retry_on_conflict("feedback", || {
            let action = self.load_action(ctx, action_id)?;
            let now = epoch_secs();
            let entry = NewStatusEntry::new(code, now).with_messages(messages.clone());
            match next_status(&action, code) {
                Some(to) => {
                    let mut updated = action.clone();
                    updated.status = to;
                    updated.updated_at = now;
                    let stored = self.store.update_action(&updated, Some(&entry))?;
                    Ok((
                        FeedbackOutcome::StatusChanged {
                            from: action.status,
                            to,
                        },
                        stored,
                    ))
                }
                None => {
                    self.store.append_action_status(&ctx.tenant, action_id, &entry)?;
                    Ok((FeedbackOutcome::Appended, action))
                }
            }
        })?;

        if let FeedbackOutcome::StatusChanged { from, to } = outcome {
            info!(
                tenant = %ctx.tenant,
                action = action_id,
                target = %action.target_id,
                ?from,
                ?to,
                "action status changed"
            );
            if to == ActionStatus::Finished {
                self.mark_installed(ctx, &action)?;
            }
            self.events
                .publish(ctx, RolloutEvent::ActionStatusChanged { action_id, from, to });
            if to == ActionStatus::Canceled {
                self.events.publish(
                    ctx,
                    RolloutEvent::ActionCanceled {
                        action_id,
                        target_id: action.target_id.clone(),
                        forced: false,
                    },
                );
            }
        }
        Ok(outcome)
    }

    /// Request cancellation of an action.
    ///
    /// A soft cancel moves the action to `Canceling` and waits for the
    /// device; `force` moves it straight to `Canceled`. Terminal actions are
    /// returned unchanged.
    pub fn cancel(&self, ctx: &TenantContext, action_id: ActionId, force: bool) -> RolloutResult<Action> {
        let (before, after) = retry_on_conflict("cancel", || {
            let action = self.load_action(ctx, action_id)?;
            if action.status.is_terminal() || (action.status == ActionStatus::Canceling && !force) {
                return Ok((action.status, action));
            }
            let now = epoch_secs();
            let (to, entry) = if force {
                (
                    ActionStatus::Canceled,
                    NewStatusEntry::new(StatusCode::Canceled, now).with_message("force quit"),
                )
            } else {
                (
                    ActionStatus::Canceling,
                    NewStatusEntry::new(StatusCode::Canceling, now)
                        .with_message("cancellation requested"),
                )
            };
            let mut updated = action.clone();
            updated.status = to;
            updated.updated_at = now;
            Ok((action.status, self.store.update_action(&updated, Some(&entry))?))
        })?;

        if before != after.status {
            info!(
                tenant = %ctx.tenant,
                action = action_id,
                target = %after.target_id,
                force,
                "action cancel"
            );
            self.events.publish(
                ctx,
                RolloutEvent::ActionStatusChanged {
                    action_id,
                    from: before,
                    to: after.status,
                },
            );
            if after.status == ActionStatus::Canceled {
                self.events.publish(
                    ctx,
                    RolloutEvent::ActionCanceled {
                        action_id,
                        target_id: after.target_id.clone(),
                        forced: true,
                    },
                );
            }
        }
        Ok(after)
    }

    /// Cancel without waiting for the device.
    pub fn force_quit(&self, ctx: &TenantContext, action_id: ActionId) -> RolloutResult<Action> {
        self.cancel(ctx, action_id, true)
    }

    /// Force-cancel every active action of the given groups.
    pub fn cancel_group_actions(&self, ctx: &TenantContext, group_ids: &[GroupId]) -> RolloutResult<u32> {
        let mut canceled = 0;
        for group_id in group_ids {
            for action in self.store.list_actions_for_group(&ctx.tenant, *group_id)? {
                if action.is_active() {
                    self.cancel(ctx, action.id, true)?;
                    canceled += 1;
                }
            }
        }
        Ok(canceled)
    }

    pub fn get_action(&self, ctx: &TenantContext, action_id: ActionId) -> RolloutResult<Action> {
        self.load_action(ctx, action_id)
    }

    pub fn actions_for_target(&self, ctx: &TenantContext, target_id: &str) -> RolloutResult<Vec<Action>> {
        Ok(self.store.list_actions_for_target(&ctx.tenant, target_id)?)
    }

    /// A distribution set that exists, is complete and is not deleted.
    pub(crate) fn load_distribution_set(
        &self,
        ctx: &TenantContext,
        id: DistributionSetId,
    ) -> RolloutResult<DistributionSet> {
        let ds = self
            .store
            .get_distribution_set(&ctx.tenant, id)?
            .ok_or_else(|| RolloutError::NotFound(format!("distribution set {id}")))?;
        if ds.deleted {
            return Err(RolloutError::Validation(format!("distribution set {id} is deleted")));
        }
        if !ds.complete {
            return Err(RolloutError::Validation(format!("distribution set {id} is incomplete")));
        }
        Ok(ds)
    }

    fn load_action(&self, ctx: &TenantContext, action_id: ActionId) -> RolloutResult<Action> {
        self.store
            .get_action(&ctx.tenant, action_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("action {action_id}")))
    }

    fn mark_installed(&self, ctx: &TenantContext, action: &Action) -> RolloutResult<()> {
        let Some(mut target) = self.store.get_target(&ctx.tenant, &action.target_id)? else {
            return Ok(());
        };
        target.installed_distribution_set = Some(action.distribution_set_id);
        target.updated_at = action.updated_at;
        self.store.put_target(&target)?;
        Ok(())
    }
}

/// `TimeForced` needs a point in time to become forced.
pub fn validate_action_type(action_type: ActionType, forced_time: Option<u64>) -> RolloutResult<()> {
    if action_type == ActionType::TimeForced && forced_time.is_none() {
        return Err(RolloutError::Validation(
            "time-forced actions require a forced time".into(),
        ));
    }
    Ok(())
}

/// Status an action moves to on receiving `code`, if any.
fn next_status(action: &Action, code: StatusCode) -> Option<ActionStatus> {
    if action.status.is_terminal() {
        return None;
    }
    match code {
        StatusCode::Finished => Some(ActionStatus::Finished),
        StatusCode::Error => Some(ActionStatus::Error),
        StatusCode::Canceled => Some(ActionStatus::Canceled),
        StatusCode::Downloaded if action.action_type == ActionType::DownloadOnly => {
            Some(ActionStatus::Finished)
        }
        StatusCode::CancelRejected if action.status == ActionStatus::Canceling => {
            Some(ActionStatus::Running)
        }
        StatusCode::Running | StatusCode::Retrieved | StatusCode::Download | StatusCode::Downloaded
            if action.status == ActionStatus::Created =>
        {
            Some(ActionStatus::Running)
        }
        _ => None,
    }
}
