//! Domain types for the FleetGrid state store.
//!
//! These types represent the persisted state of rollouts, rollout groups,
//! actions, their status log, and the collaborator records the engine
//! reads (targets, distribution sets, lock leases). All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use fleet_core::CleanupStatus;
use serde::{Deserialize, Serialize};

/// Numeric id of a rollout.
pub type RolloutId = u64;

/// Numeric id of a rollout group.
pub type GroupId = u64;

/// Numeric id of an action.
pub type ActionId = u64;

/// Numeric id of a distribution set.
pub type DistributionSetId = u64;

/// Controller id of a target device.
pub type TargetId = String;

// ── Rollout ───────────────────────────────────────────────────────

/// A staged deployment campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    pub id: RolloutId,
    pub tenant: String,
    pub name: String,
    pub description: Option<String>,
    pub distribution_set_id: DistributionSetId,
    /// Filter expression the target population was resolved from.
    pub target_filter: String,
    /// Group ids in ordinal order.
    pub group_ids: Vec<GroupId>,
    pub status: RolloutStatus,
    pub total_targets: u32,
    /// Per-status target counters, refreshed every tick.
    pub counters: TotalTargetCountStatus,
    pub action_type: ActionType,
    /// Unix timestamp after which a time-forced action becomes forced.
    pub forced_time: Option<u64>,
    /// Unix timestamp at which a READY rollout starts by itself.
    pub start_at: Option<u64>,
    pub weight: Option<u32>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Optimistic-lock revision, bumped on every write.
    pub revision: u64,
}

/// Lifecycle status of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Creating,
    Ready,
    Starting,
    Running,
    Paused,
    Finished,
    Stopped,
    Deleted,
}

impl RolloutStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, RolloutStatus::Finished | RolloutStatus::Deleted)
    }
}

/// Target counters by coarse outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalTargetCountStatus {
    /// Targets in groups that have not started yet.
    pub scheduled: u32,
    /// Targets with a non-terminal action.
    pub running: u32,
    /// Targets in a started group that have no action (yet, or any more).
    pub not_started: u32,
    pub finished: u32,
    pub error: u32,
    pub canceled: u32,
}

impl TotalTargetCountStatus {
    pub fn total(&self) -> u32 {
        self.scheduled + self.running + self.not_started + self.finished + self.error + self.canceled
    }
}

// ── Rollout group ─────────────────────────────────────────────────

/// An ordered, disjoint partition of a rollout's targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutGroup {
    pub id: GroupId,
    pub tenant: String,
    pub rollout_id: RolloutId,
    /// Zero-based position within the rollout.
    pub ordinal: u32,
    pub name: String,
    pub status: RolloutGroupStatus,
    /// Membership snapshot taken when the rollout was created.
    pub target_ids: Vec<TargetId>,
    pub conditions: GroupConditions,
    /// Action outcome counts, refreshed every tick.
    pub counts: GroupActionCounts,
    /// Set once one action per member target has been created.
    pub actions_created: bool,
    pub created_at: u64,
    pub updated_at: u64,
    pub revision: u64,
}

impl RolloutGroup {
    pub fn target_count(&self) -> u32 {
        self.target_ids.len() as u32
    }
}

/// Lifecycle status of a rollout group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutGroupStatus {
    Scheduled,
    Running,
    Finished,
    Error,
}

impl RolloutGroupStatus {
    /// Once decided, a group never transitions again.
    pub fn is_decided(self) -> bool {
        matches!(self, RolloutGroupStatus::Finished | RolloutGroupStatus::Error)
    }
}

/// Kind of condition evaluated against a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Percentage of the group's targets.
    Threshold,
}

/// Action taken when the success condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessAction {
    NextGroup,
}

/// Action taken when the error condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    Pause,
}

/// Success and error conditions of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConditions {
    pub success_condition: ConditionKind,
    pub success_expression: String,
    pub success_action: SuccessAction,
    pub error_condition: ConditionKind,
    pub error_expression: String,
    pub error_action: ErrorAction,
}

impl Default for GroupConditions {
    fn default() -> Self {
        Self {
            success_condition: ConditionKind::Threshold,
            success_expression: "100".to_string(),
            success_action: SuccessAction::NextGroup,
            error_condition: ConditionKind::Threshold,
            error_expression: "50".to_string(),
            error_action: ErrorAction::Pause,
        }
    }
}

/// Counts of a group's actions by coarse outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupActionCounts {
    pub running: u32,
    pub finished: u32,
    pub error: u32,
    pub canceled: u32,
}

// ── Action ────────────────────────────────────────────────────────

/// One deployment of one distribution set to one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub tenant: String,
    pub target_id: TargetId,
    /// Absent for ad-hoc assignments.
    pub rollout_id: Option<RolloutId>,
    pub rollout_group_id: Option<GroupId>,
    pub distribution_set_id: DistributionSetId,
    /// Software modules of the distribution set at assignment time.
    pub software_modules: Vec<u64>,
    pub status: ActionStatus,
    pub action_type: ActionType,
    pub forced_time: Option<u64>,
    pub weight: Option<u32>,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub created_at: u64,
    /// Last-modified timestamp, used by auto cleanup.
    pub updated_at: u64,
    pub revision: u64,
}

impl Action {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Coarse status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Queued, not yet delivered.
    Created,
    /// Delivered, awaiting device progress.
    Running,
    /// Cancellation requested, awaiting device acknowledgement.
    Canceling,
    Canceled,
    Finished,
    Error,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Canceled | ActionStatus::Finished | ActionStatus::Error
        )
    }
}

impl From<CleanupStatus> for ActionStatus {
    fn from(status: CleanupStatus) -> Self {
        match status {
            CleanupStatus::Canceled => ActionStatus::Canceled,
            CleanupStatus::Error => ActionStatus::Error,
            CleanupStatus::Finished => ActionStatus::Finished,
        }
    }
}

/// How strongly the device is asked to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Soft,
    Forced,
    TimeForced,
    DownloadOnly,
}

/// Optional window during which the device may install.
///
/// Carried on the action for the device protocol; the engine does not
/// interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Cron-style schedule.
    pub schedule: String,
    /// Window length, e.g. "2h".
    pub duration: String,
    /// Timezone offset, e.g. "+01:00".
    pub timezone: String,
}

// ── Action status log ─────────────────────────────────────────────

/// Status code of a log entry, reported by devices or written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Running,
    Download,
    Downloaded,
    Retrieved,
    Warning,
    Finished,
    Error,
    Canceling,
    Canceled,
    CancelRejected,
}

/// Immutable entry in an action's status log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStatusEntry {
    pub action_id: ActionId,
    /// Position within the action's log, starting at 1.
    pub seq: u32,
    pub code: StatusCode,
    pub occurred_at: u64,
    pub messages: Vec<String>,
}

/// Log entry to append; the store assigns the sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusEntry {
    pub code: StatusCode,
    pub occurred_at: u64,
    pub messages: Vec<String>,
}

impl NewStatusEntry {
    pub fn new(code: StatusCode, occurred_at: u64) -> Self {
        Self {
            code,
            occurred_at,
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<String>) -> Self {
        self.messages.extend(messages);
        self
    }
}

/// Action counts by status for one group, read in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub by_status: BTreeMap<ActionStatus, u32>,
    /// Targets of the group that have at least one action.
    pub targets_with_action: u32,
}

impl ActionCounts {
    pub fn get(&self, status: ActionStatus) -> u32 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn active(&self) -> u32 {
        self.by_status
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }
}

// ── Collaborator records ──────────────────────────────────────────

/// A software bundle that can be assigned to targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionSet {
    pub id: DistributionSetId,
    pub tenant: String,
    pub name: String,
    pub version: String,
    pub software_modules: Vec<u64>,
    /// All mandatory module types are present.
    pub complete: bool,
    pub deleted: bool,
    pub created_at: u64,
}

/// A device that receives deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub tenant: String,
    pub controller_id: TargetId,
    pub assigned_distribution_set: Option<DistributionSetId>,
    pub installed_distribution_set: Option<DistributionSetId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Target {
    pub fn new(tenant: &str, controller_id: &str, now: u64) -> Self {
        Self {
            tenant: tenant.to_string(),
            controller_id: controller_id.to_string(),
            assigned_distribution_set: None,
            installed_distribution_set: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A time-bounded, named, cluster-wide lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    pub name: String,
    pub owner: String,
    /// Random token identifying this particular acquisition.
    pub token: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

// ── Keys ──────────────────────────────────────────────────────────

/// `{tenant}/{id}` with the id zero-padded so keys sort numerically.
pub fn id_key(tenant: &str, id: u64) -> String {
    format!("{tenant}/{id:020}")
}

impl Rollout {
    pub fn table_key(&self) -> String {
        id_key(&self.tenant, self.id)
    }
}

impl RolloutGroup {
    pub fn table_key(&self) -> String {
        id_key(&self.tenant, self.id)
    }
}

impl Action {
    pub fn table_key(&self) -> String {
        id_key(&self.tenant, self.id)
    }
}

impl DistributionSet {
    pub fn table_key(&self) -> String {
        id_key(&self.tenant, self.id)
    }
}

impl Target {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.tenant, self.controller_id)
    }
}
