//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while coordinating background work.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The lease was lost to another node while work was in progress.
    #[error("lock {0} lost")]
    LockLost(String),

    #[error("rollout error: {0}")]
    Rollout(#[from] fleetgrid_rollout::RolloutError),

    #[error("state store error: {0}")]
    State(#[from] fleetgrid_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
