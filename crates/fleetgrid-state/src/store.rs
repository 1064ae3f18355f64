//! StateStore: redb-backed state persistence for FleetGrid.
//!
//! Provides typed operations over rollouts, rollout groups, actions, the
//! action status log, and the collaborator records (tenants, targets,
//! distribution sets, lock leases). All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Rollouts, groups and actions carry a `revision`. Every update checks the
//! stored revision against the one the caller read and fails with
//! [`StateError::RevisionConflict`] on mismatch; nothing is overwritten
//! silently. redb serializes write transactions, so a check and its write
//! are atomic.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// A new action plus the active actions it supersedes, written atomically.
#[derive(Debug, Clone)]
pub struct AssignmentWrite {
    /// The action to create. Its id and revision are assigned by the store.
    pub action: Action,
    pub initial_entry: NewStatusEntry,
    /// Updated copies of superseded actions, carrying the revision read.
    pub supersede: Vec<Action>,
    pub supersede_entry: Option<NewStatusEntry>,
}

/// Outcome of [`StateStore::commit_assignment`].
#[derive(Debug, Clone)]
pub struct AssignmentCommit {
    pub action: Action,
    pub superseded: Vec<Action>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        self.write(|txn| {
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(TENANTS).map_err(map_err!(Table))?;
            txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
            txn.open_table(TARGET_ACTIONS).map_err(map_err!(Table))?;
            txn.open_table(GROUP_ACTIONS).map_err(map_err!(Table))?;
            txn.open_table(DISTRIBUTION_SETS).map_err(map_err!(Table))?;
            txn.open_table(TARGETS).map_err(map_err!(Table))?;
            txn.open_table(LEASES).map_err(map_err!(Table))?;
            Ok(())
        })
    }

    /// Run `f` in a write transaction, committing on success and aborting on error.
    fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> StateResult<R>) -> StateResult<R> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match f(&txn) {
            Ok(result) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(result)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    /// Run `f` against one consistent read snapshot.
    fn read<R>(&self, f: impl FnOnce(&ReadTransaction) -> StateResult<R>) -> StateResult<R> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&txn)
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Register a tenant. Returns true if it was not known yet.
    pub fn register_tenant(&self, tenant: &str, now: u64) -> StateResult<bool> {
        check_component(tenant)?;
        let created = self.write(|txn| {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            if table.get(tenant).map_err(map_err!(Read))?.is_some() {
                return Ok(false);
            }
            table.insert(tenant, now).map_err(map_err!(Write))?;
            Ok(true)
        })?;
        if created {
            debug!(%tenant, "tenant registered");
        }
        Ok(created)
    }

    /// List all registered tenants in name order.
    pub fn list_tenants(&self) -> StateResult<Vec<String>> {
        self.read(|txn| {
            let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let mut results = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                results.push(key.value().to_string());
            }
            Ok(results)
        })
    }

    // ── Distribution sets ──────────────────────────────────────────

    /// Create a distribution set with a freshly allocated id.
    pub fn create_distribution_set(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
        software_modules: Vec<u64>,
        complete: bool,
        now: u64,
    ) -> StateResult<DistributionSet> {
        check_component(tenant)?;
        self.write(|txn| {
            let id = next_id(txn, tenant, "distribution_set")?;
            let ds = DistributionSet {
                id,
                tenant: tenant.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                software_modules,
                complete,
                deleted: false,
                created_at: now,
            };
            let mut table = txn.open_table(DISTRIBUTION_SETS).map_err(map_err!(Table))?;
            put_json(&mut table, &ds.table_key(), &ds)?;
            Ok(ds)
        })
    }

    /// Insert or update a distribution set.
    pub fn put_distribution_set(&self, ds: &DistributionSet) -> StateResult<()> {
        self.write(|txn| {
            let mut table = txn.open_table(DISTRIBUTION_SETS).map_err(map_err!(Table))?;
            put_json(&mut table, &ds.table_key(), ds)
        })
    }

    pub fn get_distribution_set(
        &self,
        tenant: &str,
        id: DistributionSetId,
    ) -> StateResult<Option<DistributionSet>> {
        self.read(|txn| {
            let table = txn.open_table(DISTRIBUTION_SETS).map_err(map_err!(Table))?;
            read_json(&table, &id_key(tenant, id))
        })
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert or update a target.
    pub fn put_target(&self, target: &Target) -> StateResult<()> {
        check_component(&target.tenant)?;
        check_component(&target.controller_id)?;
        self.write(|txn| {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            put_json(&mut table, &target.table_key(), target)
        })
    }

    pub fn get_target(&self, tenant: &str, controller_id: &str) -> StateResult<Option<Target>> {
        self.read(|txn| {
            let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            read_json(&table, &format!("{tenant}/{controller_id}"))
        })
    }

    /// List all targets of a tenant in controller-id order.
    pub fn list_targets(&self, tenant: &str) -> StateResult<Vec<Target>> {
        self.read(|txn| {
            let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            scan_json(&table, &format!("{tenant}/"))
        })
    }

    // ── Rollouts & groups ──────────────────────────────────────────

    /// Persist a new rollout together with its ordered groups.
    ///
    /// Ids are allocated here; the groups' `rollout_id`, `ordinal` and the
    /// rollout's `group_ids` are filled in. Everything is written in one
    /// transaction with revision 1.
    pub fn create_rollout(
        &self,
        mut rollout: Rollout,
        mut groups: Vec<RolloutGroup>,
    ) -> StateResult<(Rollout, Vec<RolloutGroup>)> {
        check_component(&rollout.tenant)?;
        for target in groups.iter().flat_map(|g| g.target_ids.iter()) {
            check_component(target)?;
        }
        let tenant = rollout.tenant.clone();
        self.write(|txn| {
            rollout.id = next_id(txn, &tenant, "rollout")?;
            rollout.revision = 1;
            rollout.group_ids.clear();
            for (ordinal, group) in groups.iter_mut().enumerate() {
                group.id = next_id(txn, &tenant, "rollout_group")?;
                group.tenant = tenant.clone();
                group.rollout_id = rollout.id;
                group.ordinal = ordinal as u32;
                group.revision = 1;
                rollout.group_ids.push(group.id);
            }

            let mut rollouts = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            put_json(&mut rollouts, &rollout.table_key(), &rollout)?;
            let mut group_table = txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            for group in &groups {
                put_json(&mut group_table, &group.table_key(), group)?;
            }
            Ok(())
        })?;
        debug!(%tenant, rollout = rollout.id, groups = groups.len(), "rollout stored");
        Ok((rollout, groups))
    }

    pub fn get_rollout(&self, tenant: &str, id: RolloutId) -> StateResult<Option<Rollout>> {
        self.read(|txn| {
            let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            read_json(&table, &id_key(tenant, id))
        })
    }

    /// List all rollouts of a tenant in id order.
    pub fn list_rollouts(&self, tenant: &str) -> StateResult<Vec<Rollout>> {
        self.read(|txn| {
            let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            scan_json(&table, &format!("{tenant}/"))
        })
    }

    /// List rollouts of a tenant whose status is one of `statuses`.
    pub fn list_rollouts_by_status(
        &self,
        tenant: &str,
        statuses: &[RolloutStatus],
    ) -> StateResult<Vec<Rollout>> {
        let mut rollouts = self.list_rollouts(tenant)?;
        rollouts.retain(|r| statuses.contains(&r.status));
        Ok(rollouts)
    }

    /// Revision-checked rollout update. Returns the stored copy.
    pub fn update_rollout(&self, rollout: &Rollout) -> StateResult<Rollout> {
        self.write(|txn| {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            update_versioned(&mut table, rollout)
        })
    }

    /// Revision-checked update of a rollout and some of its groups in one
    /// transaction. Any mismatch aborts the whole write.
    pub fn update_rollout_and_groups(
        &self,
        rollout: &Rollout,
        groups: &[RolloutGroup],
    ) -> StateResult<(Rollout, Vec<RolloutGroup>)> {
        self.write(|txn| {
            let mut rollouts = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let stored_rollout = update_versioned(&mut rollouts, rollout)?;
            let mut group_table = txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            let mut stored_groups = Vec::with_capacity(groups.len());
            for group in groups {
                stored_groups.push(update_versioned(&mut group_table, group)?);
            }
            Ok((stored_rollout, stored_groups))
        })
    }

    pub fn get_group(&self, tenant: &str, id: GroupId) -> StateResult<Option<RolloutGroup>> {
        self.read(|txn| {
            let table = txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            read_json(&table, &id_key(tenant, id))
        })
    }

    /// Groups of a rollout in ordinal order, read in one snapshot.
    pub fn list_groups(&self, tenant: &str, rollout_id: RolloutId) -> StateResult<Vec<RolloutGroup>> {
        self.read(|txn| {
            let rollouts = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let rollout: Rollout = read_json(&rollouts, &id_key(tenant, rollout_id))?
                .ok_or_else(|| StateError::NotFound(format!("rollout {rollout_id}")))?;
            let table = txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            let mut groups = Vec::with_capacity(rollout.group_ids.len());
            for id in &rollout.group_ids {
                let group: RolloutGroup = read_json(&table, &id_key(tenant, *id))?
                    .ok_or_else(|| StateError::NotFound(format!("rollout group {id}")))?;
                groups.push(group);
            }
            Ok(groups)
        })
    }

    /// Revision-checked group update.
    pub fn update_group(&self, group: &RolloutGroup) -> StateResult<RolloutGroup> {
        self.write(|txn| {
            let mut table = txn.open_table(ROLLOUT_GROUPS).map_err(map_err!(Table))?;
            update_versioned(&mut table, group)
        })
    }

    // ── Actions ────────────────────────────────────────────────────

    pub fn get_action(&self, tenant: &str, id: ActionId) -> StateResult<Option<Action>> {
        self.read(|txn| {
            let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            read_json(&table, &id_key(tenant, id))
        })
    }

    /// All actions of a target, oldest first.
    pub fn list_actions_for_target(&self, tenant: &str, target_id: &str) -> StateResult<Vec<Action>> {
        self.read(|txn| {
            let index = txn.open_table(TARGET_ACTIONS).map_err(map_err!(Table))?;
            let actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let ids = scan_index(&index, &format!("{tenant}/{target_id}/"))?;
            load_actions(&actions, tenant, ids.into_iter().map(|(_, id)| id))
        })
    }

    /// Non-terminal actions of a target, oldest first.
    pub fn active_actions_for_target(
        &self,
        tenant: &str,
        target_id: &str,
    ) -> StateResult<Vec<Action>> {
        let mut actions = self.list_actions_for_target(tenant, target_id)?;
        actions.retain(Action::is_active);
        Ok(actions)
    }

    /// Rollout actions of a group, in target-id order.
    pub fn list_actions_for_group(&self, tenant: &str, group_id: GroupId) -> StateResult<Vec<Action>> {
        self.read(|txn| {
            let index = txn.open_table(GROUP_ACTIONS).map_err(map_err!(Table))?;
            let actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let ids = scan_index(&index, &format!("{}/", id_key(tenant, group_id)))?;
            load_actions(&actions, tenant, ids.into_iter().map(|(_, id)| id))
        })
    }

    /// Action counts per group, all read from one snapshot.
    pub fn group_action_counts(
        &self,
        tenant: &str,
        group_ids: &[GroupId],
    ) -> StateResult<BTreeMap<GroupId, ActionCounts>> {
        self.read(|txn| {
            let index = txn.open_table(GROUP_ACTIONS).map_err(map_err!(Table))?;
            let actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let mut result = BTreeMap::new();
            for group_id in group_ids {
                let ids = scan_index(&index, &format!("{}/", id_key(tenant, *group_id)))?;
                let mut counts = ActionCounts::default();
                for action in load_actions(&actions, tenant, ids.into_iter().map(|(_, id)| id))? {
                    *counts.by_status.entry(action.status).or_insert(0) += 1;
                    counts.targets_with_action += 1;
                }
                result.insert(*group_id, counts);
            }
            Ok(result)
        })
    }

    /// Create an action and supersede prior ones in a single transaction.
    ///
    /// Each superseded action's log entry gets a trailing message naming the
    /// new action.
    ///
    /// The action's tenant is registered in the same transaction.
    ///
    /// Fails with [`StateError::RolloutInactive`] if the action belongs to a
    /// rollout that is neither starting nor running, with
    /// [`StateError::Conflict`] if its rollout group already has an action
    /// for the same target, and with [`StateError::RevisionConflict`] if a
    /// superseded action changed since it was read.
    pub fn commit_assignment(&self, write: AssignmentWrite) -> StateResult<AssignmentCommit> {
        let AssignmentWrite {
            mut action,
            initial_entry,
            supersede,
            supersede_entry,
        } = write;
        check_component(&action.tenant)?;
        check_component(&action.target_id)?;
        let tenant = action.tenant.clone();

        let commit = self.write(|txn| {
            if let Some(rollout_id) = action.rollout_id {
                let rollouts = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
                let rollout: Rollout = read_json(&rollouts, &id_key(&tenant, rollout_id))?
                    .ok_or_else(|| StateError::NotFound(format!("rollout {rollout_id}")))?;
                if !matches!(rollout.status, RolloutStatus::Starting | RolloutStatus::Running) {
                    return Err(StateError::RolloutInactive {
                        id: rollout_id,
                        status: rollout.status,
                    });
                }
            }

            let mut group_index = txn.open_table(GROUP_ACTIONS).map_err(map_err!(Table))?;
            let group_key = action
                .rollout_group_id
                .map(|group_id| format!("{}/{}", id_key(&tenant, group_id), action.target_id));
            if let Some(key) = &group_key
                && group_index.get(key.as_str()).map_err(map_err!(Read))?.is_some()
            {
                return Err(StateError::Conflict(format!(
                    "target {} already has an action in rollout group {}",
                    action.target_id,
                    action.rollout_group_id.unwrap_or_default()
                )));
            }

            action.id = next_id(txn, &tenant, "action")?;
            action.revision = 1;

            let mut actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let mut log = txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
            let mut superseded = Vec::with_capacity(supersede.len());
            for prior in &supersede {
                let stored = update_versioned(&mut actions, prior)?;
                if let Some(entry) = &supersede_entry {
                    let entry = entry
                        .clone()
                        .with_message(format!("superseded by action {}", action.id));
                    append_status(&mut log, &tenant, stored.id, &entry)?;
                }
                superseded.push(stored);
            }

            put_json(&mut actions, &action.table_key(), &action)?;
            append_status(&mut log, &tenant, action.id, &initial_entry)?;

            let mut target_index = txn.open_table(TARGET_ACTIONS).map_err(map_err!(Table))?;
            let target_key = format!("{}/{}", tenant, action.target_id);
            target_index
                .insert(format!("{target_key}/{:020}", action.id).as_str(), action.id)
                .map_err(map_err!(Write))?;
            if let Some(key) = &group_key {
                group_index
                    .insert(key.as_str(), action.id)
                    .map_err(map_err!(Write))?;
            }

            let mut targets = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            if let Some(mut target) = read_json::<Target>(&targets, &target_key)? {
                target.assigned_distribution_set = Some(action.distribution_set_id);
                target.updated_at = action.created_at;
                put_json(&mut targets, &target_key, &target)?;
            }

            let mut tenants = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            if tenants.get(tenant.as_str()).map_err(map_err!(Read))?.is_none() {
                tenants
                    .insert(tenant.as_str(), action.created_at)
                    .map_err(map_err!(Write))?;
            }

            Ok(AssignmentCommit {
                action: action.clone(),
                superseded,
            })
        })?;
        debug!(
            %tenant,
            action = commit.action.id,
            target = %commit.action.target_id,
            superseded = commit.superseded.len(),
            "assignment stored"
        );
        Ok(commit)
    }

    /// Revision-checked action update, optionally appending a log entry in
    /// the same transaction.
    pub fn update_action(
        &self,
        action: &Action,
        entry: Option<&NewStatusEntry>,
    ) -> StateResult<Action> {
        self.write(|txn| {
            let mut actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let stored = update_versioned(&mut actions, action)?;
            if let Some(entry) = entry {
                let mut log = txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
                append_status(&mut log, &action.tenant, action.id, entry)?;
            }
            Ok(stored)
        })
    }

    /// Append a log entry to an existing action without touching its status.
    pub fn append_action_status(
        &self,
        tenant: &str,
        action_id: ActionId,
        entry: &NewStatusEntry,
    ) -> StateResult<ActionStatusEntry> {
        self.write(|txn| {
            let actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            if actions
                .get(id_key(tenant, action_id).as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(format!("action {action_id}")));
            }
            let mut log = txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
            append_status(&mut log, tenant, action_id, entry)
        })
    }

    /// The status log of an action, in append order.
    pub fn list_action_status(
        &self,
        tenant: &str,
        action_id: ActionId,
    ) -> StateResult<Vec<ActionStatusEntry>> {
        self.read(|txn| {
            let table = txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
            scan_json(&table, &format!("{}/", id_key(tenant, action_id)))
        })
    }

    /// Actions in `status` whose last modification is strictly before `cutoff`.
    pub fn list_actions_modified_before(
        &self,
        tenant: &str,
        status: ActionStatus,
        cutoff: u64,
    ) -> StateResult<Vec<Action>> {
        self.read(|txn| {
            let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let mut actions: Vec<Action> = scan_json(&table, &format!("{tenant}/"))?;
            actions.retain(|a| a.status == status && a.updated_at < cutoff);
            Ok(actions)
        })
    }

    /// Hard-delete actions together with their status log and index entries.
    ///
    /// Only terminal actions are removed; ids of missing or active actions
    /// are skipped. Returns the number deleted.
    pub fn delete_actions(&self, tenant: &str, ids: &[ActionId]) -> StateResult<u32> {
        let deleted = self.write(|txn| {
            let mut actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let mut log = txn.open_table(ACTION_STATUS).map_err(map_err!(Table))?;
            let mut target_index = txn.open_table(TARGET_ACTIONS).map_err(map_err!(Table))?;
            let mut group_index = txn.open_table(GROUP_ACTIONS).map_err(map_err!(Table))?;
            let mut deleted = 0;
            for id in ids {
                let key = id_key(tenant, *id);
                let Some(action) = read_json::<Action>(&actions, &key)? else {
                    continue;
                };
                if action.is_active() {
                    continue;
                }
                actions.remove(key.as_str()).map_err(map_err!(Write))?;
                let log_keys = scan_keys(&log, &format!("{key}/"))?;
                for log_key in &log_keys {
                    log.remove(log_key.as_str()).map_err(map_err!(Write))?;
                }
                target_index
                    .remove(format!("{}/{}/{:020}", tenant, action.target_id, action.id).as_str())
                    .map_err(map_err!(Write))?;
                if let Some(group_id) = action.rollout_group_id {
                    let group_key = format!("{}/{}", id_key(tenant, group_id), action.target_id);
                    // Only drop the index entry if it still points at this action.
                    let points_here = group_index
                        .get(group_key.as_str())
                        .map_err(map_err!(Read))?
                        .is_some_and(|g| g.value() == action.id);
                    if points_here {
                        group_index
                            .remove(group_key.as_str())
                            .map_err(map_err!(Write))?;
                    }
                }
                deleted += 1;
            }
            Ok(deleted)
        })?;
        debug!(%tenant, deleted, "actions deleted");
        Ok(deleted)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Take the named lease if it is free, expired, or already ours.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        token: &str,
        ttl: Duration,
        now_ms: u64,
    ) -> StateResult<Option<LeaseRecord>> {
        self.write(|txn| {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            if let Some(current) = read_json::<LeaseRecord>(&table, name)?
                && current.token != token
                && current.expires_at_ms > now_ms
            {
                return Ok(None);
            }
            let lease = LeaseRecord {
                name: name.to_string(),
                owner: owner.to_string(),
                token: token.to_string(),
                acquired_at_ms: now_ms,
                expires_at_ms: now_ms.saturating_add(ttl.as_millis() as u64),
            };
            put_json(&mut table, name, &lease)?;
            Ok(Some(lease))
        })
    }

    /// Push out the expiry of a lease still held under `token`.
    pub fn extend_lease(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
        now_ms: u64,
    ) -> StateResult<Option<LeaseRecord>> {
        self.write(|txn| {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match read_json::<LeaseRecord>(&table, name)? {
                Some(mut lease) if lease.token == token => {
                    lease.expires_at_ms = now_ms.saturating_add(ttl.as_millis() as u64);
                    put_json(&mut table, name, &lease)?;
                    Ok(Some(lease))
                }
                _ => Ok(None),
            }
        })
    }

    /// Drop a lease held under `token`. Returns false if it was not ours.
    pub fn release_lease(&self, name: &str, token: &str) -> StateResult<bool> {
        self.write(|txn| {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match read_json::<LeaseRecord>(&table, name)? {
                Some(lease) if lease.token == token => {
                    table.remove(name).map_err(map_err!(Write))?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    pub fn get_lease(&self, name: &str) -> StateResult<Option<LeaseRecord>> {
        self.read(|txn| {
            let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            read_json(&table, name)
        })
    }
}

// ── Internal helpers ───────────────────────────────────────────────

/// Records guarded by an optimistic-lock revision.
trait Versioned: Serialize + DeserializeOwned + Clone {
    const ENTITY: &'static str;
    fn id(&self) -> u64;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
    fn key(&self) -> String;
}

macro_rules! versioned {
    ($ty:ty, $entity:literal) => {
        impl Versioned for $ty {
            const ENTITY: &'static str = $entity;
            fn id(&self) -> u64 {
                self.id
            }
            fn revision(&self) -> u64 {
                self.revision
            }
            fn set_revision(&mut self, revision: u64) {
                self.revision = revision;
            }
            fn key(&self) -> String {
                self.table_key()
            }
        }
    };
}

versioned!(Rollout, "rollout");
versioned!(RolloutGroup, "rollout group");
versioned!(Action, "action");

fn update_versioned<T: Versioned>(table: &mut JsonTable<'_>, value: &T) -> StateResult<T> {
    let key = value.key();
    let stored: T = read_json(&*table, &key)?
        .ok_or_else(|| StateError::NotFound(format!("{} {}", T::ENTITY, value.id())))?;
    if stored.revision() != value.revision() {
        return Err(StateError::RevisionConflict {
            entity: T::ENTITY,
            id: value.id(),
            expected: value.revision(),
            found: stored.revision(),
        });
    }
    let mut next = value.clone();
    next.set_revision(value.revision() + 1);
    put_json(table, &key, &next)?;
    Ok(next)
}

fn next_id(txn: &WriteTransaction, tenant: &str, kind: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let key = format!("{tenant}/{kind}");
    let current = table
        .get(key.as_str())
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    table
        .insert(key.as_str(), current + 1)
        .map_err(map_err!(Write))?;
    Ok(current + 1)
}

fn append_status(
    log: &mut JsonTable<'_>,
    tenant: &str,
    action_id: ActionId,
    entry: &NewStatusEntry,
) -> StateResult<ActionStatusEntry> {
    let prefix = format!("{}/", id_key(tenant, action_id));
    let end = prefix_end(&prefix);
    let last_seq = {
        let mut range = log
            .range(prefix.as_str()..end.as_str())
            .map_err(map_err!(Read))?;
        match range.next_back() {
            Some(last) => {
                let (_, value) = last.map_err(map_err!(Read))?;
                decode::<ActionStatusEntry>(value.value())?.seq
            }
            None => 0,
        }
    };
    let stored = ActionStatusEntry {
        action_id,
        seq: last_seq + 1,
        code: entry.code,
        occurred_at: entry.occurred_at,
        messages: entry.messages.clone(),
    };
    put_json(log, &format!("{prefix}{:010}", stored.seq), &stored)?;
    Ok(stored)
}

fn load_actions(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    tenant: &str,
    ids: impl IntoIterator<Item = ActionId>,
) -> StateResult<Vec<Action>> {
    let mut actions = Vec::new();
    for id in ids {
        if let Some(action) = read_json(table, &id_key(tenant, id))? {
            actions.push(action);
        }
    }
    Ok(actions)
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn put_json<T: Serialize>(table: &mut JsonTable<'_>, key: &str, value: &T) -> StateResult<()> {
    let bytes = encode(value)?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<T>> {
    let end = prefix_end(prefix);
    let mut results = Vec::new();
    for entry in table.range(prefix..end.as_str()).map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

fn scan_keys(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<String>> {
    let end = prefix_end(prefix);
    let mut keys = Vec::new();
    for entry in table.range(prefix..end.as_str()).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

fn scan_index(
    table: &impl ReadableTable<&'static str, u64>,
    prefix: &str,
) -> StateResult<Vec<(String, u64)>> {
    let end = prefix_end(prefix);
    let mut results = Vec::new();
    for entry in table.range(prefix..end.as_str()).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        results.push((key.value().to_string(), value.value()));
    }
    Ok(results)
}

/// Exclusive upper bound for keys starting with `prefix`, which ends in '/'.
fn prefix_end(prefix: &str) -> String {
    // '0' is the character right after '/'.
    let mut end = prefix.strip_suffix('/').unwrap_or(prefix).to_string();
    end.push('0');
    end
}

fn check_component(component: &str) -> StateResult<()> {
    if component.is_empty() || component.contains('/') {
        return Err(StateError::InvalidKey(component.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "acme";

    fn test_rollout() -> Rollout {
        Rollout {
            id: 0,
            tenant: TENANT.to_string(),
            name: "fw-2.1".to_string(),
            description: None,
            distribution_set_id: 1,
            target_filter: "name==*".to_string(),
            group_ids: Vec::new(),
            status: RolloutStatus::Creating,
            total_targets: 4,
            counters: TotalTargetCountStatus::default(),
            action_type: ActionType::Forced,
            forced_time: None,
            start_at: None,
            weight: None,
            created_at: 1000,
            updated_at: 1000,
            revision: 0,
        }
    }

    fn test_group(targets: &[&str]) -> RolloutGroup {
        RolloutGroup {
            id: 0,
            tenant: TENANT.to_string(),
            rollout_id: 0,
            ordinal: 0,
            name: "group".to_string(),
            status: RolloutGroupStatus::Scheduled,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
            conditions: GroupConditions::default(),
            counts: GroupActionCounts::default(),
            actions_created: false,
            created_at: 1000,
            updated_at: 1000,
            revision: 0,
        }
    }

    fn test_action(target: &str, group: Option<GroupId>) -> Action {
        Action {
            id: 0,
            tenant: TENANT.to_string(),
            target_id: target.to_string(),
            rollout_id: group.map(|_| 1),
            rollout_group_id: group,
            distribution_set_id: 7,
            software_modules: vec![11, 12],
            status: ActionStatus::Running,
            action_type: ActionType::Forced,
            forced_time: None,
            weight: None,
            maintenance_window: None,
            created_at: 1000,
            updated_at: 1000,
            revision: 0,
        }
    }

    /// Store holding rollout 1 in `Running`, the owner of every group action
    /// built by [`test_action`].
    fn running_rollout_store() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        let (mut rollout, _) = store.create_rollout(test_rollout(), Vec::new()).unwrap();
        assert_eq!(rollout.id, 1);
        rollout.status = RolloutStatus::Running;
        store.update_rollout(&rollout).unwrap();
        store
    }

    fn assign(store: &StateStore, action: Action) -> StateResult<AssignmentCommit> {
        store.commit_assignment(AssignmentWrite {
            action,
            initial_entry: NewStatusEntry::new(StatusCode::Running, 1000),
            supersede: Vec::new(),
            supersede_entry: None,
        })
    }

    // ── Tenants ────────────────────────────────────────────────────

    #[test]
    fn tenants_register_once() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.register_tenant("beta", 1).unwrap());
        assert!(store.register_tenant("acme", 1).unwrap());
        assert!(!store.register_tenant("acme", 2).unwrap());
        assert_eq!(store.list_tenants().unwrap(), vec!["acme", "beta"]);
    }

    #[test]
    fn rejects_slash_in_key_components() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.register_tenant("a/b", 1),
            Err(StateError::InvalidKey(_))
        ));
        let target = Target::new(TENANT, "dev/1", 1);
        assert!(matches!(
            store.put_target(&target),
            Err(StateError::InvalidKey(_))
        ));
    }

    // ── Rollouts ───────────────────────────────────────────────────

    #[test]
    fn create_rollout_assigns_ids_and_ordinals() {
        let store = StateStore::open_in_memory().unwrap();
        let (rollout, groups) = store
            .create_rollout(
                test_rollout(),
                vec![test_group(&["a", "b"]), test_group(&["c", "d"])],
            )
            .unwrap();

        assert_eq!(rollout.id, 1);
        assert_eq!(rollout.revision, 1);
        assert_eq!(rollout.group_ids, vec![groups[0].id, groups[1].id]);
        assert_eq!(groups[1].ordinal, 1);
        assert!(groups.iter().all(|g| g.rollout_id == rollout.id));

        let listed = store.list_groups(TENANT, rollout.id).unwrap();
        assert_eq!(listed, groups);
    }

    #[test]
    fn update_rollout_detects_stale_revision() {
        let store = StateStore::open_in_memory().unwrap();
        let (rollout, _) = store.create_rollout(test_rollout(), vec![]).unwrap();

        let mut first = rollout.clone();
        first.status = RolloutStatus::Ready;
        let stored = store.update_rollout(&first).unwrap();
        assert_eq!(stored.revision, 2);

        let mut stale = rollout;
        stale.status = RolloutStatus::Deleted;
        let err = store.update_rollout(&stale).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            store.get_rollout(TENANT, stored.id).unwrap().unwrap().status,
            RolloutStatus::Ready
        );
    }

    #[test]
    fn rollout_and_groups_update_is_atomic() {
        let store = StateStore::open_in_memory().unwrap();
        let (rollout, groups) = store
            .create_rollout(test_rollout(), vec![test_group(&["a"]), test_group(&["b"])])
            .unwrap();

        // Someone else bumps the second group.
        let mut other = groups[1].clone();
        other.name = "renamed".to_string();
        store.update_group(&other).unwrap();

        let mut r = rollout.clone();
        r.status = RolloutStatus::Running;
        let mut g0 = groups[0].clone();
        g0.status = RolloutGroupStatus::Running;
        let stale_g1 = groups[1].clone();
        let err = store
            .update_rollout_and_groups(&r, &[g0, stale_g1])
            .unwrap_err();
        assert!(err.is_conflict());

        // Nothing from the failed write is visible.
        assert_eq!(store.get_rollout(TENANT, rollout.id).unwrap().unwrap(), rollout);
        assert_eq!(
            store.get_group(TENANT, groups[0].id).unwrap().unwrap().status,
            RolloutGroupStatus::Scheduled
        );
    }

    #[test]
    fn list_rollouts_by_status_filters() {
        let store = StateStore::open_in_memory().unwrap();
        let (r1, _) = store.create_rollout(test_rollout(), vec![]).unwrap();
        store.create_rollout(test_rollout(), vec![]).unwrap();
        let mut running = r1.clone();
        running.status = RolloutStatus::Running;
        store.update_rollout(&running).unwrap();

        let found = store
            .list_rollouts_by_status(TENANT, &[RolloutStatus::Running])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, r1.id);
        assert_eq!(store.list_rollouts(TENANT).unwrap().len(), 2);
        assert!(store.list_rollouts("other").unwrap().is_empty());
    }

    // ── Actions ────────────────────────────────────────────────────

    #[test]
    fn assignment_indexes_action_and_updates_target() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_target(&Target::new(TENANT, "dev-1", 10)).unwrap();

        let commit = assign(&store, test_action("dev-1", None)).unwrap();
        assert_eq!(commit.action.revision, 1);

        let actions = store.list_actions_for_target(TENANT, "dev-1").unwrap();
        assert_eq!(actions, vec![commit.action.clone()]);
        let target = store.get_target(TENANT, "dev-1").unwrap().unwrap();
        assert_eq!(target.assigned_distribution_set, Some(7));

        let log = store.list_action_status(TENANT, commit.action.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].seq, 1);
        assert_eq!(log[0].code, StatusCode::Running);
    }

    #[test]
    fn assignment_rejects_second_action_in_same_group() {
        let store = running_rollout_store();
        assign(&store, test_action("dev-1", Some(3))).unwrap();
        let err = assign(&store, test_action("dev-1", Some(3))).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.list_actions_for_group(TENANT, 3).unwrap().len(), 1);
        // A different group is fine.
        assign(&store, test_action("dev-1", Some(4))).unwrap();
    }

    #[test]
    fn assignment_rejected_once_rollout_is_inactive() {
        let store = running_rollout_store();
        assign(&store, test_action("a", Some(5))).unwrap();

        let mut rollout = store.get_rollout(TENANT, 1).unwrap().unwrap();
        rollout.status = RolloutStatus::Deleted;
        store.update_rollout(&rollout).unwrap();

        let err = assign(&store, test_action("b", Some(5))).unwrap_err();
        assert!(matches!(
            err,
            StateError::RolloutInactive { id: 1, status: RolloutStatus::Deleted }
        ));
        assert_eq!(store.list_actions_for_group(TENANT, 5).unwrap().len(), 1);
        assert!(store.list_actions_for_target(TENANT, "b").unwrap().is_empty());

        let err = assign(&store, Action { rollout_id: Some(9), ..test_action("c", Some(6)) })
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn assignment_registers_tenant() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_tenants().unwrap().is_empty());
        assign(&store, test_action("dev-1", None)).unwrap();
        assign(&store, test_action("dev-1", None)).unwrap();
        assert_eq!(store.list_tenants().unwrap(), vec![TENANT]);
    }

    #[test]
    fn assignment_supersedes_with_revision_check() {
        let store = StateStore::open_in_memory().unwrap();
        let first = assign(&store, test_action("dev-1", None)).unwrap().action;

        let mut canceled = first.clone();
        canceled.status = ActionStatus::Canceled;
        let commit = store
            .commit_assignment(AssignmentWrite {
                action: test_action("dev-1", None),
                initial_entry: NewStatusEntry::new(StatusCode::Running, 2000),
                supersede: vec![canceled.clone()],
                supersede_entry: Some(
                    NewStatusEntry::new(StatusCode::Canceled, 2000).with_message("superseded"),
                ),
            })
            .unwrap();
        assert_eq!(commit.superseded[0].revision, 2);
        let log = store.list_action_status(TENANT, first.id).unwrap();
        assert_eq!(log[1].code, StatusCode::Canceled);
        assert_eq!(
            log[1].messages,
            vec![
                "superseded".to_string(),
                format!("superseded by action {}", commit.action.id)
            ]
        );

        let active = store.active_actions_for_target(TENANT, "dev-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, commit.action.id);

        // Replaying the same supersede with the old revision fails and
        // creates nothing.
        let err = store
            .commit_assignment(AssignmentWrite {
                action: test_action("dev-1", None),
                initial_entry: NewStatusEntry::new(StatusCode::Running, 3000),
                supersede: vec![canceled],
                supersede_entry: None,
            })
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.list_actions_for_target(TENANT, "dev-1").unwrap().len(), 2);
    }

    #[test]
    fn status_log_sequence_is_monotonic() {
        let store = StateStore::open_in_memory().unwrap();
        let action = assign(&store, test_action("dev-1", None)).unwrap().action;

        for code in [StatusCode::Download, StatusCode::Downloaded, StatusCode::Finished] {
            store
                .append_action_status(TENANT, action.id, &NewStatusEntry::new(code, 1500))
                .unwrap();
        }
        let log = store.list_action_status(TENANT, action.id).unwrap();
        let seqs: Vec<u32> = log.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(log[3].code, StatusCode::Finished);

        assert!(matches!(
            store.append_action_status(TENANT, 999, &NewStatusEntry::new(StatusCode::Running, 1)),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn group_counts_read_by_status() {
        let store = running_rollout_store();
        let a = assign(&store, test_action("a", Some(5))).unwrap().action;
        assign(&store, test_action("b", Some(5))).unwrap();
        assign(&store, test_action("c", Some(6))).unwrap();

        let mut finished = a.clone();
        finished.status = ActionStatus::Finished;
        store.update_action(&finished, None).unwrap();

        let counts = store.group_action_counts(TENANT, &[5, 6, 7]).unwrap();
        assert_eq!(counts[&5].get(ActionStatus::Finished), 1);
        assert_eq!(counts[&5].get(ActionStatus::Running), 1);
        assert_eq!(counts[&5].targets_with_action, 2);
        assert_eq!(counts[&6].active(), 1);
        assert_eq!(counts[&7], ActionCounts::default());
    }

    #[test]
    fn delete_actions_cascades_and_skips_active() {
        let store = running_rollout_store();
        let done = assign(&store, test_action("a", Some(5))).unwrap().action;
        let active = assign(&store, test_action("b", Some(5))).unwrap().action;
        let mut finished = done.clone();
        finished.status = ActionStatus::Finished;
        store
            .update_action(&finished, Some(&NewStatusEntry::new(StatusCode::Finished, 1100)))
            .unwrap();

        let deleted = store.delete_actions(TENANT, &[done.id, active.id, 404]).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_action(TENANT, done.id).unwrap().is_none());
        assert!(store.list_action_status(TENANT, done.id).unwrap().is_empty());
        assert!(store.list_actions_for_target(TENANT, "a").unwrap().is_empty());
        assert_eq!(store.list_actions_for_group(TENANT, 5).unwrap(), vec![active]);
    }

    #[test]
    fn modified_before_filters_status_and_age() {
        let store = StateStore::open_in_memory().unwrap();
        let mut old = test_action("a", None);
        old.status = ActionStatus::Error;
        old.updated_at = 100;
        assign(&store, old).unwrap();
        let mut young = test_action("b", None);
        young.status = ActionStatus::Error;
        young.updated_at = 900;
        assign(&store, young).unwrap();

        let found = store
            .list_actions_modified_before(TENANT, ActionStatus::Error, 500)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target_id, "a");
    }

    // ── Leases ─────────────────────────────────────────────────────

    #[test]
    fn lease_excludes_other_tokens_until_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        let ttl = Duration::from_millis(1000);

        let lease = store
            .try_acquire_lease("tick/acme", "node-a", "t1", ttl, 10_000)
            .unwrap()
            .unwrap();
        assert_eq!(lease.expires_at_ms, 11_000);
        assert!(store
            .try_acquire_lease("tick/acme", "node-b", "t2", ttl, 10_500)
            .unwrap()
            .is_none());

        // Extension keeps it ours past the original expiry.
        store.extend_lease("tick/acme", "t1", ttl, 10_800).unwrap().unwrap();
        assert!(store
            .try_acquire_lease("tick/acme", "node-b", "t2", ttl, 11_500)
            .unwrap()
            .is_none());

        // Expired: another owner takes over and the old token is useless.
        let taken = store
            .try_acquire_lease("tick/acme", "node-b", "t2", ttl, 12_000)
            .unwrap()
            .unwrap();
        assert_eq!(taken.owner, "node-b");
        assert!(store.extend_lease("tick/acme", "t1", ttl, 12_001).unwrap().is_none());
        assert!(!store.release_lease("tick/acme", "t1").unwrap());
        assert!(store.release_lease("tick/acme", "t2").unwrap());
        assert!(store.get_lease("tick/acme").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let id = {
            let store = StateStore::open(&db_path).unwrap();
            store.register_tenant(TENANT, 1).unwrap();
            store.create_rollout(test_rollout(), vec![]).unwrap().0.id
        };

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_tenants().unwrap(), vec![TENANT]);
        assert!(store.get_rollout(TENANT, id).unwrap().is_some());
        // Sequences survive as well.
        let (next, _) = store.create_rollout(test_rollout(), vec![]).unwrap();
        assert_eq!(next.id, id + 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_tenants().unwrap().is_empty());
        assert!(store.list_rollouts(TENANT).unwrap().is_empty());
        assert!(store.list_targets(TENANT).unwrap().is_empty());
        assert!(store.get_action(TENANT, 1).unwrap().is_none());
        assert!(store.list_actions_for_target(TENANT, "x").unwrap().is_empty());
        assert_eq!(store.delete_actions(TENANT, &[1, 2]).unwrap(), 0);
        assert!(matches!(
            store.list_groups(TENANT, 1),
            Err(StateError::NotFound(_))
        ));
    }
}
