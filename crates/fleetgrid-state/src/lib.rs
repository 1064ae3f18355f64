//! fleetgrid-state: embedded state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for rollouts, rollout groups, actions and their status
//! log, plus the tenant registry, targets, distribution sets and the lease
//! table used for cluster-wide locks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{tenant}/{id:020}`, `{tenant}/{target}/{action}`) enable
//! efficient prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and between coordinators.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{AssignmentCommit, AssignmentWrite, StateStore};
pub use types::*;
