//! Target filter contract.
//!
//! Matching filter expressions against device attributes is not part of the
//! engine; it only needs the resulting target-id set.

use std::collections::HashMap;

use fleetgrid_state::{StateStore, TargetId};

use crate::error::{RolloutError, RolloutResult};

/// Resolves a filter expression to the matching target ids of a tenant.
pub trait TargetFilter: Send + Sync {
    fn resolve(&self, tenant: &str, expression: &str) -> RolloutResult<Vec<TargetId>>;
}

/// In-memory filter with a fixed result per expression.
#[derive(Debug, Default, Clone)]
pub struct StaticTargetFilter {
    results: HashMap<String, Vec<TargetId>>,
}

impl StaticTargetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expression<I, S>(mut self, expression: &str, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TargetId>,
    {
        self.results
            .insert(expression.to_string(), targets.into_iter().map(Into::into).collect());
        self
    }
}

impl TargetFilter for StaticTargetFilter {
    fn resolve(&self, _tenant: &str, expression: &str) -> RolloutResult<Vec<TargetId>> {
        let mut ids = self
            .results
            .get(expression)
            .cloned()
            .ok_or_else(|| RolloutError::Validation(format!("unknown target filter {expression:?}")))?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Matches every registered target of the tenant for the expression `*`.
impl TargetFilter for StateStore {
    fn resolve(&self, tenant: &str, expression: &str) -> RolloutResult<Vec<TargetId>> {
        if expression.trim() != "*" {
            return Err(RolloutError::Validation(format!(
                "unsupported target filter {expression:?}"
            )));
        }
        Ok(self
            .list_targets(tenant)?
            .into_iter()
            .map(|t| t.controller_id)
            .collect())
    }
}
