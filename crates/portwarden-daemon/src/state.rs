//! Application state management

use anyhow::{Context, Result};
use portwarden_core::MemoryStore;
use portwarden_discovery::{LivenessProbe, MacTableClient, Reconciler, Sweeper};
use portwarden_routeros::RouterOsClient;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Inventory records
    pub store: Arc<MemoryStore>,
    /// Liveness sweep over the whole inventory
    pub sweeper: Sweeper,
    /// MAC-table reconciliation, one switch at a time
    pub reconciler: Reconciler,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create state from configuration, opening the inventory snapshot
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store = match &config.inventory.path {
            Some(path) => MemoryStore::open(path)
                .with_context(|| format!("opening inventory snapshot {path}"))?,
            None => {
                info!("No inventory path configured, keeping inventory in memory");
                MemoryStore::new()
            }
        };

        let probe = config.probe();
        let client = Arc::new(RouterOsClient::new(config.routeros_config()));
        Self::with_parts(config, Arc::new(store), probe, client)
    }

    /// Assemble state around an existing store, probe and MAC-table client
    pub fn with_parts(
        config: Config,
        store: Arc<MemoryStore>,
        probe: Arc<dyn LivenessProbe>,
        client: Arc<dyn MacTableClient>,
    ) -> Result<Arc<Self>> {
        let sweeper = Sweeper::new(store.clone(), probe).with_timeout(config.probe_timeout());
        let reconciler = Reconciler::new(store.clone(), client, config.reconcile_settings()?);

        Ok(Arc::new(Self {
            store,
            sweeper,
            reconciler,
            config,
        }))
    }
}
