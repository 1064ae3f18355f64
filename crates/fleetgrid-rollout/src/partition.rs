//! Splitting a rollout's target population into ordered groups.
//!
//! Groups are defined either all by percentage or all by explicit target
//! lists. Percentage splits run over the population sorted ascending with
//! cumulative floor boundaries: group `i` ends at
//! `floor(total * (p_0 + .. + p_i) / 100)` and the last group ends at
//! `total`.

use std::collections::BTreeSet;

use fleet_core::Quotas;
use fleetgrid_state::{GroupConditions, TargetId};
use serde::{Deserialize, Serialize};

use crate::error::{RolloutError, RolloutResult};

/// How a group selects its share of the population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMembers {
    /// A percentage in (0,100] of the population.
    Percentage(u32),
    /// An explicit list of target ids.
    Targets(Vec<TargetId>),
}

/// Caller-supplied definition of one rollout group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: Option<String>,
    pub members: GroupMembers,
    /// Overrides the rollout-wide default conditions.
    pub conditions: Option<GroupConditions>,
}

impl GroupDefinition {
    pub fn percentage(percent: u32) -> Self {
        Self {
            name: None,
            members: GroupMembers::Percentage(percent),
            conditions: None,
        }
    }

    pub fn targets<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TargetId>,
    {
        Self {
            name: None,
            members: GroupMembers::Targets(ids.into_iter().map(Into::into).collect()),
            conditions: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_conditions(mut self, conditions: GroupConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

/// Split `population` into one member list per definition.
///
/// The returned lists are disjoint, non-empty, sorted, and their union is
/// exactly the population.
pub fn split(population: &[TargetId], definitions: &[GroupDefinition]) -> RolloutResult<Vec<Vec<TargetId>>> {
    if definitions.is_empty() {
        return Err(RolloutError::Validation("at least one group is required".into()));
    }
    let population: BTreeSet<&TargetId> = population.iter().collect();
    if population.is_empty() {
        return Err(RolloutError::Validation("target filter matched no targets".into()));
    }

    let percentages: Vec<u32> = definitions
        .iter()
        .filter_map(|d| match d.members {
            GroupMembers::Percentage(p) => Some(p),
            GroupMembers::Targets(_) => None,
        })
        .collect();

    let groups = if percentages.len() == definitions.len() {
        split_by_percentage(&population, &percentages)?
    } else if percentages.is_empty() {
        split_by_targets(&population, definitions)?
    } else {
        return Err(RolloutError::Validation(
            "group definitions mix percentages and explicit target lists".into(),
        ));
    };

    if let Some(index) = groups.iter().position(Vec::is_empty) {
        return Err(RolloutError::Validation(format!("group {index} has no targets")));
    }
    Ok(groups)
}

fn split_by_percentage(population: &BTreeSet<&TargetId>, percentages: &[u32]) -> RolloutResult<Vec<Vec<TargetId>>> {
    if let Some(bad) = percentages.iter().find(|p| **p == 0 || **p > 100) {
        return Err(RolloutError::Validation(format!("group percentage {bad} outside (0,100]")));
    }
    let sum: u32 = percentages.iter().sum();
    if sum != 100 {
        return Err(RolloutError::Validation(format!(
            "group percentages sum to {sum}, expected 100"
        )));
    }

    let sorted: Vec<TargetId> = population.iter().map(|t| (*t).clone()).collect();
    let total = sorted.len() as u64;
    let mut groups = Vec::with_capacity(percentages.len());
    let mut start = 0usize;
    let mut cumulative = 0u64;
    for (index, percent) in percentages.iter().enumerate() {
        cumulative += u64::from(*percent);
        let end = if index + 1 == percentages.len() {
            sorted.len()
        } else {
            (total * cumulative / 100) as usize
        };
        groups.push(sorted[start..end].to_vec());
        start = end;
    }
    Ok(groups)
}

fn split_by_targets(
    population: &BTreeSet<&TargetId>,
    definitions: &[GroupDefinition],
) -> RolloutResult<Vec<Vec<TargetId>>> {
    let mut seen: BTreeSet<&TargetId> = BTreeSet::new();
    let mut groups = Vec::with_capacity(definitions.len());
    for (index, definition) in definitions.iter().enumerate() {
        let GroupMembers::Targets(ids) = &definition.members else {
            continue;
        };
        let mut members = BTreeSet::new();
        for id in ids {
            if !population.contains(id) {
                return Err(RolloutError::Validation(format!(
                    "group {index} lists target {id} outside the matched population"
                )));
            }
            if !seen.insert(id) {
                return Err(RolloutError::Validation(format!(
                    "target {id} appears in more than one group"
                )));
            }
            members.insert(id.clone());
        }
        groups.push(members.into_iter().collect());
    }
    if seen.len() != population.len() {
        return Err(RolloutError::Validation(format!(
            "groups cover {} of {} matched targets",
            seen.len(),
            population.len()
        )));
    }
    Ok(groups)
}

/// Reject splits that exceed the tenant's quotas.
pub fn check_quotas(groups: &[Vec<TargetId>], quotas: &Quotas) -> RolloutResult<()> {
    if groups.len() > quotas.max_groups_per_rollout as usize {
        return Err(RolloutError::Validation(format!(
            "{} groups exceed the limit of {}",
            groups.len(),
            quotas.max_groups_per_rollout
        )));
    }
    if let Some((index, group)) = groups
        .iter()
        .enumerate()
        .find(|(_, g)| g.len() > quotas.max_targets_per_group as usize)
    {
        return Err(RolloutError::Validation(format!(
            "group {index} has {} targets, limit is {}",
            group.len(),
            quotas.max_targets_per_group
        )));
    }
    Ok(())
}
