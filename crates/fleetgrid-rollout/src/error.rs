//! Rollout engine error types.

use fleetgrid_state::StateError;
use thiserror::Error;
use tracing::warn;

/// Attempts made by request-path writes before a conflict is surfaced.
pub const MAX_ATTEMPTS: u32 = 3;

/// Errors raised by lifecycle, assignment and evaluation operations.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A revision-checked write lost against a concurrent writer.
    #[error("optimistic lock conflict: {0}")]
    OptimisticLockConflict(String),

    /// The caller's keep-alive hook failed; the whole pass stops.
    #[error("aborted: {0}")]
    Aborted(String),

    #[error("state store error: {0}")]
    State(StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

impl From<StateError> for RolloutError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::RevisionConflict { .. } => RolloutError::OptimisticLockConflict(e.to_string()),
            StateError::NotFound(what) => RolloutError::NotFound(what),
            other => RolloutError::State(other),
        }
    }
}

impl RolloutError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RolloutError::OptimisticLockConflict(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RolloutError::Aborted(_))
    }

    /// True when the store refused a rollout action because the rollout was
    /// paused, stopped or deleted in the meantime.
    pub fn is_rollout_inactive(&self) -> bool {
        matches!(self, RolloutError::State(StateError::RolloutInactive { .. }))
    }
}

/// Run `op` again on optimistic-lock conflicts, up to [`MAX_ATTEMPTS`] times.
///
/// `op` must re-read whatever it writes so every attempt starts fresh.
pub(crate) fn retry_on_conflict<T>(
    what: &str,
    mut op: impl FnMut() -> RolloutResult<T>,
) -> RolloutResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                warn!(operation = what, attempt, error = %e, "write conflict, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_conflict_maps_to_optimistic_lock() {
        let err: RolloutError = StateError::RevisionConflict {
            entity: "rollout",
            id: 4,
            expected: 1,
            found: 2,
        }
        .into();
        assert!(err.is_conflict());

        let err: RolloutError = StateError::NotFound("rollout 4".into()).into();
        assert!(matches!(err, RolloutError::NotFound(_)));
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: RolloutResult<()> = retry_on_conflict("test", || {
            calls += 1;
            Err(RolloutError::OptimisticLockConflict("busy".into()))
        });
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let result = retry_on_conflict("test", || {
            calls += 1;
            if calls < 2 {
                Err(RolloutError::OptimisticLockConflict("busy".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn retry_does_not_repeat_other_errors() {
        let mut calls = 0;
        let result: RolloutResult<()> = retry_on_conflict("test", || {
            calls += 1;
            Err(RolloutError::Validation("bad".into()))
        });
        assert!(matches!(result, Err(RolloutError::Validation(_))));
        assert_eq!(calls, 1);
    }
}
