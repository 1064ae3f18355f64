//! A rollout deleted while its group is being activated must not be left
//! with active actions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use fleet_core::{TenantContext, TenantSettings};
use fleetgrid_rollout::{
    CreateRollout, EventPublisher, GroupDefinition, RolloutEvaluator, RolloutEvent, RolloutManager,
};
use fleetgrid_state::{ActionStatus, RolloutStatus, StateStore, Target};

const TENANT: &str = "acme";

/// Deletes the rollout as soon as its first action is published, the way a
/// management request landing mid-activation would.
#[derive(Default)]
struct DeleteOnFirstAction {
    manager: OnceLock<RolloutManager>,
    fired: AtomicBool,
}

impl EventPublisher for DeleteOnFirstAction {
    fn publish(&self, ctx: &TenantContext, event: RolloutEvent) {
        if let RolloutEvent::ActionCreated {
            rollout_id: Some(id),
            ..
        } = event
            && !self.fired.swap(true, Ordering::SeqCst)
            && let Some(manager) = self.manager.get()
        {
            manager.delete(ctx, id).unwrap();
        }
    }
}

#[test]
fn delete_during_group_activation_leaves_no_active_actions() {
    let store = StateStore::open_in_memory().unwrap();
    for i in 0..6 {
        store
            .put_target(&Target::new(TENANT, &format!("dev-{i}"), 1))
            .unwrap();
    }
    let ds = store
        .create_distribution_set(TENANT, "fw", "4.0", vec![1], true, 1)
        .unwrap();

    let events = Arc::new(DeleteOnFirstAction::default());
    let manager = RolloutManager::new(
        store.clone(),
        Arc::new(store.clone()),
        Arc::new(TenantSettings::default()),
        events.clone(),
    );
    let evaluator = RolloutEvaluator::new(store.clone(), manager.deployments().clone(), events.clone());

    let ctx = TenantContext::new(TENANT);
    let rollout = manager
        .create(
            &ctx,
            CreateRollout::new("fw-4.0", "*", ds.id, vec![GroupDefinition::percentage(100)]),
        )
        .unwrap();
    manager.start(&ctx, rollout.id, false).unwrap();
    let _ = events.manager.set(manager.clone());

    let report = evaluator.tick(&ctx, 0).unwrap();
    assert_eq!(report.failures, 0);

    assert_eq!(manager.get(&ctx, rollout.id).unwrap().status, RolloutStatus::Deleted);
    let group = &manager.groups(&ctx, rollout.id).unwrap()[0];
    let actions = store.list_actions_for_group(TENANT, group.id).unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].status, ActionStatus::Canceled);

    // Later ticks leave the deleted rollout alone.
    let report = evaluator.tick(&ctx, 1).unwrap();
    assert_eq!(report.rollouts_evaluated, 0);
    assert_eq!(store.list_actions_for_group(TENANT, group.id).unwrap().len(), 1);
}
