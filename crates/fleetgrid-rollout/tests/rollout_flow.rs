//! End-to-end rollout flow: create, start, drive through every group with
//! device feedback, and observe the published events.

use std::sync::Arc;

use fleet_core::{TenantContext, TenantSettings};
use fleetgrid_rollout::{
    AssignOutcome, AssignRequest, BroadcastPublisher, CreateRollout, GroupDefinition,
    RolloutEvaluator, RolloutEvent, RolloutManager,
};
use fleetgrid_state::{
    ActionStatus, GroupConditions, RolloutGroupStatus, RolloutStatus, StateStore, StatusCode,
    Target,
};

const TENANT: &str = "acme";

fn ctx() -> TenantContext {
    TenantContext::new(TENANT)
}

#[tokio::test]
async fn rollout_runs_group_by_group_to_completion() {
    let store = StateStore::open_in_memory().unwrap();
    let ids: Vec<String> = (0..9).map(|i| format!("dev-{i}")).collect();
    for id in &ids {
        store.put_target(&Target::new(TENANT, id, 1)).unwrap();
    }
    let old = store
        .create_distribution_set(TENANT, "fw", "1.0", vec![1], true, 1)
        .unwrap();
    let new = store
        .create_distribution_set(TENANT, "fw", "2.0", vec![2], true, 1)
        .unwrap();

    let events = Arc::new(BroadcastPublisher::new(1024));
    let mut rx = events.subscribe();
    let manager = RolloutManager::new(
        store.clone(),
        Arc::new(store.clone()),
        Arc::new(TenantSettings::default()),
        events.clone(),
    );
    let evaluator = RolloutEvaluator::new(store.clone(), manager.deployments().clone(), events.clone());

    // An ad-hoc assignment is superseded once the rollout reaches the target.
    let AssignOutcome::Created { action: adhoc, .. } = manager
        .deployments()
        .assign(&ctx(), AssignRequest::new("dev-0", old.id))
        .unwrap()
    else {
        panic!("ad-hoc assignment was not created");
    };

    let request = CreateRollout::new(
        "fw-2.0",
        "*",
        new.id,
        vec![
            GroupDefinition::targets(["dev-0"]).named("canary"),
            GroupDefinition::targets(["dev-1", "dev-2", "dev-3", "dev-4"]),
            GroupDefinition::targets(["dev-5", "dev-6", "dev-7", "dev-8"]),
        ],
    )
    .with_conditions(GroupConditions {
        success_expression: "75%".into(),
        ..GroupConditions::default()
    });
    let rollout = manager.create(&ctx(), request).unwrap();
    manager.start(&ctx(), rollout.id, false).unwrap();

    evaluator.tick(&ctx(), 0).unwrap();
    assert_eq!(
        store.get_action(TENANT, adhoc.id).unwrap().unwrap().status,
        ActionStatus::Canceled
    );

    for _ in 0..3 {
        let groups = manager.groups(&ctx(), rollout.id).unwrap();
        let running = groups
            .iter()
            .find(|g| g.status == RolloutGroupStatus::Running)
            .unwrap();
        for action in store.list_actions_for_group(TENANT, running.id).unwrap() {
            manager
                .deployments()
                .apply_feedback(&ctx(), action.id, StatusCode::Finished, vec![])
                .unwrap();
        }
        evaluator.tick(&ctx(), 0).unwrap();
    }

    let done = manager.get(&ctx(), rollout.id).unwrap();
    assert_eq!(done.status, RolloutStatus::Finished);
    assert_eq!(done.counters.finished, 9);
    for id in &ids {
        let target = store.get_target(TENANT, id).unwrap().unwrap();
        assert_eq!(target.installed_distribution_set, Some(new.id));
    }

    let mut rollout_transitions = Vec::new();
    while let Ok(published) = rx.try_recv() {
        if let RolloutEvent::RolloutStatusChanged { rollout_id, to, .. } = published.event
            && rollout_id == rollout.id
        {
            rollout_transitions.push(to);
        }
    }
    assert_eq!(
        rollout_transitions,
        vec![
            RolloutStatus::Creating,
            RolloutStatus::Ready,
            RolloutStatus::Starting,
            RolloutStatus::Running,
            RolloutStatus::Finished,
        ]
    );
}

#[tokio::test]
async fn single_active_action_per_target() {
    let store = StateStore::open_in_memory().unwrap();
    store.put_target(&Target::new(TENANT, "dev-1", 1)).unwrap();
    let ds = store
        .create_distribution_set(TENANT, "fw", "1.0", vec![], true, 1)
        .unwrap();
    let manager = RolloutManager::new(
        store.clone(),
        Arc::new(store.clone()),
        Arc::new(TenantSettings::default()),
        Arc::new(BroadcastPublisher::new(16)),
    );

    for _ in 0..3 {
        manager
            .deployments()
            .assign(&ctx(), AssignRequest::new("dev-1", ds.id))
            .unwrap();
    }
    let actions = manager.deployments().actions_for_target(&ctx(), "dev-1").unwrap();
    assert_eq!(actions.len(), 3);
    assert_eq!(actions.iter().filter(|a| a.is_active()).count(), 1);
    assert!(actions.last().unwrap().is_active());
}
