//! Group success and error conditions.
//!
//! Thresholds are percentages of the group's snapshotted target count. An
//! expression is a whole number, optionally followed by `%`.

use fleetgrid_state::{ConditionKind, GroupConditions};

use crate::error::{RolloutError, RolloutResult};

/// A parsed group condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Met when `count * 100 >= percent * total`.
    Threshold { percent: u32 },
}

impl Condition {
    fn parse(kind: ConditionKind, expression: &str, allow_zero: bool) -> RolloutResult<Self> {
        match kind {
            ConditionKind::Threshold => {
                let raw = expression.trim();
                let digits = raw.strip_suffix('%').unwrap_or(raw).trim();
                let percent: u32 = digits.parse().map_err(|_| {
                    RolloutError::Validation(format!("threshold {expression:?} is not a percentage"))
                })?;
                let min = if allow_zero { 0 } else { 1 };
                if percent < min || percent > 100 {
                    let range = if allow_zero { "[0,100]" } else { "(0,100]" };
                    return Err(RolloutError::Validation(format!(
                        "threshold {percent} outside {range}"
                    )));
                }
                Ok(Condition::Threshold { percent })
            }
        }
    }

    /// Success thresholds must lie in (0,100].
    pub fn success(conditions: &GroupConditions) -> RolloutResult<Self> {
        Self::parse(conditions.success_condition, &conditions.success_expression, false)
    }

    /// Error thresholds must lie in [0,100].
    pub fn error(conditions: &GroupConditions) -> RolloutResult<Self> {
        Self::parse(conditions.error_condition, &conditions.error_expression, true)
    }

    pub fn is_met(&self, count: u32, total: u32) -> bool {
        match self {
            Condition::Threshold { percent } => {
                u64::from(count) * 100 >= u64::from(*percent) * u64::from(total)
            }
        }
    }
}

/// Validate both conditions of a group.
pub fn validate(conditions: &GroupConditions) -> RolloutResult<()> {
    Condition::success(conditions)?;
    Condition::error(conditions)?;
    Ok(())
}

/// The error condition never fires without at least one error.
pub fn error_met(condition: &Condition, errors: u32, total: u32) -> bool {
    errors > 0 && condition.is_met(errors, total)
}
