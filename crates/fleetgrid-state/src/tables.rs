//! redb table definitions for the FleetGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Index tables map a composite key to an action id. Composite keys
//! follow the pattern `{tenant}/{id:020}` or `{tenant}/{parent}/{child}`.

use redb::TableDefinition;

/// Registered tenants keyed by name.
pub const TENANTS: TableDefinition<&str, u64> = TableDefinition::new("tenants");

/// Id sequences keyed by `{tenant}/{kind}`.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Rollouts keyed by `{tenant}/{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Rollout groups keyed by `{tenant}/{group_id}`.
pub const ROLLOUT_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollout_groups");

/// Actions keyed by `{tenant}/{action_id}`.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Action status log keyed by `{tenant}/{action_id}/{seq}`.
pub const ACTION_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("action_status");

/// Index `{tenant}/{target_id}/{action_id}` → action id.
pub const TARGET_ACTIONS: TableDefinition<&str, u64> = TableDefinition::new("target_actions");

/// Index `{tenant}/{group_id}/{target_id}` → action id. At most one rollout
/// action per (group, target).
pub const GROUP_ACTIONS: TableDefinition<&str, u64> = TableDefinition::new("group_actions");

/// Distribution sets keyed by `{tenant}/{ds_id}`.
pub const DISTRIBUTION_SETS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("distribution_sets");

/// Targets keyed by `{tenant}/{controller_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Cluster lock leases keyed by lock name.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
