//! Liveness hook for long passes.
//!
//! The evaluator calls [`KeepAlive::keep_alive`] before every rollout and
//! before every target of a group assignment so the caller can renew the
//! lease that guards the pass. An error aborts the whole pass with
//! [`RolloutError::Aborted`].

use crate::error::{RolloutError, RolloutResult};

pub trait KeepAlive {
    fn keep_alive(&mut self) -> RolloutResult<()>;
}

/// For callers not holding any lease, such as request-path operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeepAlive;

impl KeepAlive for NoKeepAlive {
    fn keep_alive(&mut self) -> RolloutResult<()> {
        Ok(())
    }
}

/// Wrap a keep-alive failure so it stops the pass instead of one rollout.
pub fn aborted(reason: impl std::fmt::Display) -> RolloutError {
    RolloutError::Aborted(reason.to_string())
}
