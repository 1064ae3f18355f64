//! Daemon assembly: config resolution, store, coordinator and the
//! background loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleet_core::FleetConfig;
use fleetgrid_rollout::{DeploymentManager, RolloutEvaluator, TracingPublisher, epoch_secs};
use fleetgrid_scheduler::{AutoCleanup, Coordinator, StoreLockService};
use fleetgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// File name of the state database inside the data directory.
pub const DB_FILE: &str = "fleetgrid.redb";

/// Command-line values that take precedence over `fleet.toml`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub node_id: Option<String>,
    pub interval: Option<Duration>,
    pub lock_lease: Option<Duration>,
}

impl Overrides {
    pub fn apply(&self, config: &mut FleetConfig) {
        if let Some(node_id) = &self.node_id {
            config.scheduler.node_id = node_id.clone();
        }
        if let Some(interval) = self.interval {
            config.scheduler.interval = interval;
        }
        if let Some(lease) = self.lock_lease {
            config.scheduler.lock_lease = lease;
        }
    }
}

/// Load `fleet.toml` (or defaults when no file is given) and apply overrides.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<FleetConfig> {
    let mut config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("load {}", path.display()))?,
        None => FleetConfig::default(),
    };
    overrides.apply(&mut config);
    if config.scheduler.interval.is_zero() {
        anyhow::bail!("scheduler interval must be greater than zero");
    }
    if config.scheduler.lock_lease <= config.scheduler.interval {
        warn!(
            lease_ms = config.scheduler.lock_lease.as_millis() as u64,
            interval_ms = config.scheduler.interval.as_millis() as u64,
            "lock lease not longer than the tick interval"
        );
    }
    Ok(config)
}

/// Open the state store under `data_dir`, creating the directory if needed.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Register every tenant named in the config so the coordinator visits it
/// before its first rollout exists.
pub fn register_configured_tenants(store: &StateStore, config: &FleetConfig) -> anyhow::Result<u32> {
    let now = epoch_secs();
    let mut added = 0;
    for tenant in config.tenants.keys() {
        if store.register_tenant(tenant, now)? {
            added += 1;
        }
    }
    Ok(added)
}

/// Wire evaluator, cleanup and lock service into a coordinator.
pub fn build_coordinator(store: &StateStore, config: Arc<FleetConfig>) -> Coordinator {
    let events = Arc::new(TracingPublisher);
    let deployments = DeploymentManager::new(store.clone(), config.clone(), events.clone());
    Coordinator::new(
        Arc::new(store.clone()),
        Arc::new(StoreLockService::new(store.clone(), config.scheduler.node_id.clone())),
        RolloutEvaluator::new(store.clone(), deployments, events),
        AutoCleanup::new(store.clone(), config.clone()),
        config.scheduler.lock_lease,
    )
}

/// Run the coordinator loop until Ctrl-C.
pub async fn run_daemon(config: FleetConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!(node_id = %config.scheduler.node_id, "FleetGrid daemon starting");

    let store = open_store(&data_dir)?;
    let added = register_configured_tenants(&store, &config)?;
    info!(added, "configured tenants registered");

    let interval = config.scheduler.interval;
    let coordinator = build_coordinator(&store, Arc::new(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let coordinator_handle = tokio::spawn(async move {
        coordinator.run(interval, shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    coordinator_handle.await?;
    info!("FleetGrid daemon stopped");
    Ok(())
}

/// Run a single coordinator round and log its report.
pub fn run_once(config: FleetConfig, data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    register_configured_tenants(&store, &config)?;
    let report = build_coordinator(&store, Arc::new(config)).run_once()?;
    info!(
        processed = report.tenants_processed,
        skipped = report.tenants_skipped,
        failed = report.tenants_failed,
        rollouts = report.evaluation.rollouts_evaluated,
        actions_created = report.evaluation.actions_created,
        actions_deleted = report.actions_deleted,
        "round complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[scheduler]
interval = "5s"
lock_lease = "20s"
node_id = "node-a"

[tenants.acme]
multi_assignment = true

[tenants.beta.cleanup]
enabled = true
finished = "30d"
"#;

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let overrides = Overrides {
            node_id: Some("node-b".to_string()),
            interval: Some(Duration::from_secs(2)),
            lock_lease: None,
        };
        let config = load_config(Some(path.as_path()), &overrides).unwrap();
        assert_eq!(config.scheduler.node_id, "node-b");
        assert_eq!(config.scheduler.interval, Duration::from_secs(2));
        assert_eq!(config.scheduler.lock_lease, Duration::from_secs(20));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(Some(path.as_path()), &Overrides::default()).is_err());
    }

    #[test]
    fn zero_interval_override_is_rejected() {
        let overrides = Overrides {
            interval: Some(Duration::ZERO),
            ..Overrides::default()
        };
        assert!(load_config(None, &overrides).is_err());
    }

    #[test]
    fn configured_tenants_are_registered_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = FleetConfig::from_toml_str(CONFIG).unwrap();
        let store = open_store(&dir.path().join("data")).unwrap();

        assert_eq!(register_configured_tenants(&store, &config).unwrap(), 2);
        assert_eq!(register_configured_tenants(&store, &config).unwrap(), 0);
        assert_eq!(store.list_tenants().unwrap(), vec!["acme", "beta"]);
    }

    #[test]
    fn built_coordinator_visits_registered_tenants() {
        let store = StateStore::open_in_memory().unwrap();
        let config = FleetConfig::from_toml_str(CONFIG).unwrap();
        register_configured_tenants(&store, &config).unwrap();

        let report = build_coordinator(&store, Arc::new(config)).run_once().unwrap();
        assert_eq!(report.tenants_processed, 2);
        assert_eq!(report.tenants_failed, 0);
    }
}
