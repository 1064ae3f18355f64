//! fleet.toml configuration parser.
//!
//! ```toml
//! [scheduler]
//! interval = "10s"
//! lock_lease = "30s"
//! node_id = "fleetd-a"
//!
//! [defaults]
//! multi_assignment = false
//!
//! [defaults.cleanup]
//! enabled = true
//! finished = "30d"
//! error = "7d"
//!
//! [tenants.acme]
//! multi_assignment = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Settings applied to every tenant without an override.
    #[serde(default)]
    pub defaults: TenantSettings,
    /// Per-tenant overrides, keyed by tenant name.
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantOverrides>,
}

/// Background loop and lock lease tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between two coordinator rounds.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Lease requested for each per-tenant lock.
    #[serde(with = "duration_str")]
    pub lock_lease: Duration,
    /// Name this node uses as lock owner.
    pub node_id: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            lock_lease: Duration::from_secs(30),
            node_id: "fleetd".to_string(),
        }
    }
}

/// Effective settings for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    /// Allow more than one active action per target.
    pub multi_assignment: bool,
    pub cleanup: CleanupPolicy,
    pub quotas: Quotas,
}

/// Optional per-tenant replacements for [`TenantSettings`] sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantOverrides {
    pub multi_assignment: Option<bool>,
    pub cleanup: Option<CleanupPolicy>,
    pub quotas: Option<Quotas>,
}

/// Terminal action statuses that auto cleanup may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Canceled,
    Error,
    Finished,
}

/// Auto cleanup of aged terminal actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    pub enabled: bool,
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub canceled: Option<Duration>,
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub error: Option<Duration>,
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub finished: Option<Duration>,
}

impl CleanupPolicy {
    /// Configured (status, expiry) pairs, in a stable order.
    pub fn expiries(&self) -> Vec<(CleanupStatus, Duration)> {
        [
            (CleanupStatus::Canceled, self.canceled),
            (CleanupStatus::Error, self.error),
            (CleanupStatus::Finished, self.finished),
        ]
        .into_iter()
        .filter_map(|(status, expiry)| expiry.map(|e| (status, e)))
        .collect()
    }
}

/// Size limits enforced when a rollout is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quotas {
    pub max_groups_per_rollout: u32,
    pub max_targets_per_group: u32,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_groups_per_rollout: 500,
            max_targets_per_group: 20_000,
        }
    }
}

/// Read-only per-tenant settings lookup.
pub trait TenantSettingsLookup: Send + Sync {
    fn settings(&self, tenant: &str) -> TenantSettings;
}

impl TenantSettingsLookup for FleetConfig {
    fn settings(&self, tenant: &str) -> TenantSettings {
        let mut settings = self.defaults.clone();
        if let Some(over) = self.tenants.get(tenant) {
            if let Some(multi) = over.multi_assignment {
                settings.multi_assignment = multi;
            }
            if let Some(cleanup) = &over.cleanup {
                settings.cleanup = cleanup.clone();
            }
            if let Some(quotas) = &over.quotas {
                settings.quotas = quotas.clone();
            }
        }
        settings
    }
}

impl TenantSettingsLookup for TenantSettings {
    fn settings(&self, _tenant: &str) -> TenantSettings {
        self.clone()
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        if config.scheduler.interval.is_zero() {
            anyhow::bail!("scheduler.interval must be greater than zero");
        }
        if config.scheduler.lock_lease < config.scheduler.interval {
            anyhow::bail!("scheduler.lock_lease must not be shorter than scheduler.interval");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Error returned for malformed duration strings.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration {0:?}: expected a number with ms, s, m, h or d suffix")]
pub struct DurationError(pub String);

/// Parse a duration string like "250ms", "30s", "5m", "12h" or "30d".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    let err = || DurationError(s.to_string());
    let (digits, unit_secs, millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0, true)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1, false)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60, false)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600, false)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400, false)
    } else {
        (s, 1, false)
    };
    let value: u64 = digits.trim().parse().map_err(|_| err())?;
    if millis {
        return Ok(Duration::from_millis(value));
    }
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(err)
}

fn format_duration(d: &Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_millis() != 0 || secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    match secs {
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|r| super::parse_duration(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
