//! FleetGrid staged rollouts: groups, thresholds, actions.
//!
//! This crate holds the orchestration engine that moves a distribution set
//! through a fleet one group at a time. A rollout's target population is
//! split into ordered groups; the evaluator activates one group at a time
//! and advances only when the group's success threshold holds, halting the
//! rollout when its error threshold fires.
//!
//! # Components
//!
//! - **`lifecycle`**: Rollout creation and operator transitions
//! - **`evaluator`**: Per-tenant reconciliation pass (the scheduler tick)
//! - **`assignment`**: Action state machine, assignment and device feedback
//! - **`partition`**: Splitting targets into groups
//! - **`condition`**: Success and error thresholds
//! - **`filter`**: Target filter contract
//! - **`keep_alive`**: Lease renewal hook for long passes
//! - **`events`**: Rollout events and publishers

use std::time::{SystemTime, UNIX_EPOCH};

pub mod assignment;
pub mod condition;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod filter;
pub mod keep_alive;
pub mod lifecycle;
pub mod partition;

pub use assignment::{AssignOutcome, AssignRequest, DeploymentManager, FeedbackOutcome};
pub use condition::Condition;
pub use error::{RolloutError, RolloutResult};
pub use evaluator::{EvaluationReport, RolloutEvaluator};
pub use events::{BroadcastPublisher, EventPublisher, PublishedEvent, RolloutEvent, TracingPublisher};
pub use filter::{StaticTargetFilter, TargetFilter};
pub use keep_alive::{KeepAlive, NoKeepAlive};
pub use lifecycle::{CreateRollout, RolloutManager};
pub use partition::{GroupDefinition, GroupMembers};

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
