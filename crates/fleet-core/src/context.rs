//! Explicit request context.
//!
//! Every operation on the orchestration engine receives a `TenantContext`
//! instead of reading tenant information from process-wide state.

use std::fmt;

/// Tenant and correlation identifiers for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant: String,
    /// Ties together log lines and events caused by the same request or tick.
    pub correlation_id: String,
}

impl TenantContext {
    /// Context with a freshly generated correlation id.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tenant, self.correlation_id)
    }
}
