//! Cluster-wide named locks with a lease.
//!
//! A lock is held until it is released or its lease runs out. Every
//! acquisition gets a fresh random token, and extend/release only succeed
//! for the token that currently holds the lock, so a node whose lease
//! expired cannot disturb the node that took over.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleetgrid_state::StateStore;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Proof of holding a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub owner: String,
    pub token: String,
    pub expires_at_ms: u64,
}

/// Named, lease-based mutual exclusion shared by all nodes.
pub trait LockService: Send + Sync {
    /// Take the lock if nobody else holds it. `Ok(None)` means busy.
    fn try_lock(&self, name: &str, lease: Duration) -> SchedulerResult<Option<LockHandle>>;

    /// Renew the lease. Fails with `LockLost` if the lock changed hands.
    fn extend(&self, handle: &mut LockHandle, lease: Duration) -> SchedulerResult<()>;

    /// Give the lock up. Returns false if it had already been lost.
    fn release(&self, handle: LockHandle) -> SchedulerResult<bool>;
}

/// Lock service backed by the state store's lease table.
///
/// Every node that opens the same database shares the locks.
#[derive(Clone)]
pub struct StoreLockService {
    store: StateStore,
    owner: String,
}

impl StoreLockService {
    pub fn new(store: StateStore, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }
}

impl LockService for StoreLockService {
    fn try_lock(&self, name: &str, lease: Duration) -> SchedulerResult<Option<LockHandle>> {
        let token = uuid::Uuid::new_v4().to_string();
        let Some(record) = self
            .store
            .try_acquire_lease(name, &self.owner, &token, lease, epoch_millis())?
        else {
            debug!(lock = name, owner = %self.owner, "lock busy");
            return Ok(None);
        };
        debug!(lock = name, owner = %self.owner, expires_at_ms = record.expires_at_ms, "lock acquired");
        Ok(Some(LockHandle {
            name: record.name,
            owner: record.owner,
            token: record.token,
            expires_at_ms: record.expires_at_ms,
        }))
    }

    fn extend(&self, handle: &mut LockHandle, lease: Duration) -> SchedulerResult<()> {
        match self
            .store
            .extend_lease(&handle.name, &handle.token, lease, epoch_millis())?
        {
            Some(record) => {
                handle.expires_at_ms = record.expires_at_ms;
                Ok(())
            }
            None => Err(SchedulerError::LockLost(handle.name.clone())),
        }
    }

    fn release(&self, handle: LockHandle) -> SchedulerResult<bool> {
        let released = self.store.release_lease(&handle.name, &handle.token)?;
        debug!(lock = %handle.name, released, "lock released");
        Ok(released)
    }
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
