//! Error types for the FleetGrid state store.

use thiserror::Error;

use crate::types::RolloutStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key component: {0:?}")]
    InvalidKey(String),

    /// The stored revision differs from the one the writer read.
    #[error("{entity} {id}: expected revision {expected}, found {found}")]
    RevisionConflict {
        entity: &'static str,
        id: u64,
        expected: u64,
        found: u64,
    },

    /// A rollout action was written for a rollout that no longer deploys.
    #[error("rollout {id} is {status:?}, not accepting actions")]
    RolloutInactive { id: u64, status: RolloutStatus },

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StateError {
    /// True for errors that a later retry may resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::RevisionConflict { .. })
    }
}
