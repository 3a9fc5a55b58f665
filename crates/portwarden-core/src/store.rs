//! Inventory record store
//!
//! [`InventoryStore`] is what the sweep and the reconciler see. [`MemoryStore`]
//! implements it over an in-memory [`Inventory`], optionally persisted as a
//! JSON snapshot after every successful commit.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::device::{Device, DeviceId, LivenessChange, NewDevice, NewSwitch, Switch, SwitchId};
use crate::topology::{
    AvailablePort, CableInfo, Inventory, InventoryView, NewPatchPanel, PatchLink, PatchPanelId,
    PatchPanelPort, Port, PortId, TopologyError,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Topology(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Topology(e) if e.is_conflict())
    }
}

/// A single change inside a [`Batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    DeviceLiveness { device: DeviceId, change: LivenessChange },
    SwitchLiveness { switch: SwitchId, change: LivenessChange },
    /// Link a device to a port. Both must currently be unlinked.
    AssignPort { port: PortId, device: DeviceId },
    /// Like `AssignPort`, but if either end is taken by the time the batch
    /// commits, only this update is dropped and reported as [`Skipped`].
    AssignPortIfFree { port: PortId, device: DeviceId },
}

/// A conditional update left out of a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub update: Update,
    pub reason: TopologyError,
}

/// Updates applied together or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    updates: Vec<Update>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: Update) {
        self.updates.push(update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        self.updates.iter()
    }
}

impl IntoIterator for Batch {
    type Item = Update;
    type IntoIter = std::vec::IntoIter<Update>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

/// Which devices [`InventoryStore::list_devices`] returns
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    with_mac: bool,
    excluded_models: Vec<String>,
}

impl DeviceFilter {
    /// Every device
    pub fn all() -> Self {
        Self::default()
    }

    /// Only devices with a non-blank MAC
    pub fn with_mac(mut self) -> Self {
        self.with_mac = true;
        self
    }

    /// Skip devices whose model matches one of these (case-insensitive)
    pub fn excluding_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_models
            .extend(models.into_iter().map(|m| m.as_ref().trim().to_lowercase()));
        self
    }

    pub fn matches(&self, device: &Device) -> bool {
        if self.with_mac && device.raw_mac().is_none() {
            return false;
        }
        let model = device.model.trim().to_lowercase();
        !self.excluded_models.iter().any(|m| *m == model)
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError>;

    async fn list_switches(&self) -> Result<Vec<Switch>, StoreError>;

    async fn get_switch(&self, id: SwitchId) -> Result<Switch, StoreError>;

    /// Ports of a switch, ordered by port number
    async fn list_switch_ports(&self, id: SwitchId) -> Result<Vec<Port>, StoreError>;

    /// Apply every update or none of them.
    ///
    /// Conditional updates whose precondition no longer holds are returned
    /// instead of failing the batch.
    async fn apply_batch(&self, batch: Batch) -> Result<Vec<Skipped>, StoreError>;
}

/// In-memory store with an optional JSON snapshot on disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    inventory: RwLock<Inventory>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty store, never written to disk
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
            snapshot_path: None,
        }
    }

    /// Load the snapshot at `path`, or start empty if it doesn't exist.
    /// Every later commit rewrites the file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inventory = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let inventory: Inventory = serde_json::from_str(&content)?;
            inventory.check_invariants()?;
            info!(path = %path.display(), "Loaded inventory snapshot");
            inventory
        } else {
            info!(path = %path.display(), "No inventory snapshot yet, starting empty");
            Inventory::new()
        };

        Ok(Self {
            inventory: RwLock::new(inventory),
            snapshot_path: Some(path),
        })
    }

    fn save(inventory: &Inventory, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(inventory)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Run `change` on a working copy; keep it only if the change succeeds,
    /// the invariants hold and the snapshot (if any) was written.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut Inventory) -> Result<T, TopologyError>,
    ) -> Result<T, StoreError> {
        let mut current = self.inventory.write().await;
        let mut working = current.clone();

        let out = change(&mut working)?;
        working.check_invariants()?;

        if let Some(path) = &self.snapshot_path {
            Self::save(&working, path)?;
            debug!(path = %path.display(), "Inventory snapshot written");
        }

        *current = working;
        Ok(out)
    }

    pub async fn create_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        self.commit(|inv| {
            let id = inv.add_device(new);
            inv.device(id).cloned()
        })
        .await
    }

    pub async fn create_switch(&self, new: NewSwitch) -> Result<Switch, StoreError> {
        self.commit(|inv| {
            let id = inv.add_switch(new)?;
            inv.switch(id).cloned()
        })
        .await
    }

    pub async fn create_patch_panel(&self, new: NewPatchPanel) -> Result<PatchPanelId, StoreError> {
        self.commit(|inv| inv.add_patch_panel(new)).await
    }

    /// Manually connect (or with `None`, disconnect) the device on a port
    pub async fn link_port_device(
        &self,
        switch: SwitchId,
        number: u16,
        device: Option<DeviceId>,
    ) -> Result<Port, StoreError> {
        self.commit(|inv| inv.set_port_device(switch, number, device))
            .await
    }

    pub async fn link_patch_panel_port(
        &self,
        panel: PatchPanelId,
        number: u16,
        link: PatchLink,
        cable: CableInfo,
    ) -> Result<PatchPanelPort, StoreError> {
        self.commit(|inv| inv.patch(panel, number, link, cable)).await
    }

    pub async fn available_ports(&self, floor: Option<i32>) -> Vec<AvailablePort> {
        self.inventory.read().await.available_ports(floor)
    }

    pub async fn unlinked_devices(&self) -> Vec<Device> {
        self.inventory
            .read()
            .await
            .unlinked_devices()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> InventoryView {
        self.inventory.read().await.view()
    }

    pub async fn check_invariants(&self) -> Result<(), StoreError> {
        Ok(self.inventory.read().await.check_invariants()?)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        let inventory = self.inventory.read().await;
        Ok(inventory
            .devices()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn list_switches(&self) -> Result<Vec<Switch>, StoreError> {
        Ok(self.inventory.read().await.switches().cloned().collect())
    }

    async fn get_switch(&self, id: SwitchId) -> Result<Switch, StoreError> {
        Ok(self.inventory.read().await.switch(id)?.clone())
    }

    async fn list_switch_ports(&self, id: SwitchId) -> Result<Vec<Port>, StoreError> {
        let inventory = self.inventory.read().await;
        Ok(inventory.switch_ports(id)?.into_iter().cloned().collect())
    }

    async fn apply_batch(&self, batch: Batch) -> Result<Vec<Skipped>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let count = batch.len();
        let skipped = self
            .commit(|inv| {
                let mut skipped = Vec::new();
                for update in batch {
                    match update {
                        Update::DeviceLiveness { device, change } => {
                            inv.update_device_liveness(device, change)?
                        }
                        Update::SwitchLiveness { switch, change } => {
                            inv.update_switch_liveness(switch, change)?
                        }
                        Update::AssignPort { port, device } => inv.connect_device(port, device)?,
                        Update::AssignPortIfFree { port, device } => {
                            match inv.connect_device(port, device) {
                                Ok(()) => {}
                                Err(reason) if reason.is_conflict() => skipped.push(Skipped {
                                    update: Update::AssignPortIfFree { port, device },
                                    reason,
                                }),
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
                Ok(skipped)
            })
            .await?;
        debug!(updates = count, skipped = skipped.len(), "Batch committed");
        Ok(skipped)
    }
}
