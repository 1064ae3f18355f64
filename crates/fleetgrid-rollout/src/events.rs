//! Rollout events and publishing hooks.
//!
//! Writers compute their change and publish it explicitly; nothing observes
//! the store. Publishing never fails the operation that emitted the event.

use fleet_core::TenantContext;
use fleetgrid_state::{
    ActionId, ActionStatus, GroupId, RolloutGroupStatus, RolloutId, RolloutStatus, TargetId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Something that changed in the rollout engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutEvent {
    RolloutStatusChanged {
        rollout_id: RolloutId,
        from: Option<RolloutStatus>,
        to: RolloutStatus,
    },
    RolloutGroupStatusChanged {
        rollout_id: RolloutId,
        group_id: GroupId,
        from: RolloutGroupStatus,
        to: RolloutGroupStatus,
    },
    ActionCreated {
        action_id: ActionId,
        target_id: TargetId,
        rollout_id: Option<RolloutId>,
        group_id: Option<GroupId>,
    },
    ActionCanceled {
        action_id: ActionId,
        target_id: TargetId,
        /// Set when the cancel did not wait for the device.
        forced: bool,
    },
    ActionStatusChanged {
        action_id: ActionId,
        from: ActionStatus,
        to: ActionStatus,
    },
}

/// Sink for rollout events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, ctx: &TenantContext, event: RolloutEvent);
}

/// Logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, ctx: &TenantContext, event: RolloutEvent) {
        match &event {
            RolloutEvent::RolloutStatusChanged { rollout_id, from, to } => info!(
                tenant = %ctx.tenant,
                correlation_id = %ctx.correlation_id,
                rollout = rollout_id,
                ?from,
                ?to,
                "rollout status changed"
            ),
            RolloutEvent::RolloutGroupStatusChanged {
                rollout_id,
                group_id,
                from,
                to,
            } => info!(
                tenant = %ctx.tenant,
                correlation_id = %ctx.correlation_id,
                rollout = rollout_id,
                group = group_id,
                ?from,
                ?to,
                "rollout group status changed"
            ),
            other => debug!(
                tenant = %ctx.tenant,
                correlation_id = %ctx.correlation_id,
                event = ?other,
                "action event"
            ),
        }
    }
}

/// An event together with the context it was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub tenant: String,
    pub correlation_id: String,
    pub event: RolloutEvent,
}

/// Fans events out to any number of subscribers.
///
/// Events published while nobody subscribes are dropped; slow subscribers
/// observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    /// Buffer up to `capacity` events per subscriber (at least one).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, ctx: &TenantContext, event: RolloutEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(PublishedEvent {
            tenant: ctx.tenant.clone(),
            correlation_id: ctx.correlation_id.clone(),
            event,
        });
    }
}
