//! fleetgrid-scheduler: background coordination for FleetGrid.
//!
//! Runs the rollout evaluator and auto cleanup for every tenant on a fixed
//! interval. Several nodes may run a coordinator against the same store;
//! a per-tenant lease lock makes sure only one of them works on a tenant at
//! a time.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── TenantSource (tenant registry in the state store)
//!   ├── LockService (lease table in the state store)
//!   ├── RolloutEvaluator (group thresholds, action creation)
//!   └── AutoCleanup (expired terminal actions)
//! ```

pub mod cleanup;
pub mod coordinator;
pub mod error;
pub mod lock;

pub use cleanup::{AutoCleanup, CleanupReport};
pub use coordinator::{Coordinator, TenantSource, TickReport, tick_lock_name};
pub use error::{SchedulerError, SchedulerResult};
pub use lock::{LockHandle, LockService, StoreLockService};
