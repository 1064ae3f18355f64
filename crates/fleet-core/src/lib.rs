//! fleet-core: configuration and shared context for FleetGrid.
//!
//! Holds the pieces every other crate needs but that carry no rollout
//! semantics of their own:
//!
//! - **`config`**: `fleet.toml` parsing, per-tenant settings resolution
//! - **`context`**: the explicit tenant/correlation context passed through
//!   every call

pub mod config;
pub mod context;

pub use config::{
    parse_duration, CleanupPolicy, CleanupStatus, DurationError, FleetConfig, Quotas,
    SchedulerConfig, TenantOverrides, TenantSettings, TenantSettingsLookup,
};
pub use context::TenantContext;
