//! Device-to-port assignment from a switch's live MAC table
//!
//! The reconciler reads the bridge host table of one switch, keeps the
//! entries that sit alone on a physical port, matches their MACs against
//! the inventory and links each matched device to its port. Existing links
//! are never replaced; anything that disagrees with them is reported as a
//! conflict for a human to sort out.

use async_trait::async_trait;
use portwarden_core::{
    normalize, Batch, CanonicalMac, Device, DeviceFilter, DeviceId, InventoryStore, MacPrefix,
    Port, PortId, Skipped, StoreError, SwitchId, Update,
};
use portwarden_routeros::{HostEntry, HostTableError, RouterOsClient};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Management MAC prefixes of the deployment's access points and phones
pub const DEFAULT_IGNORED_PREFIXES: [&str; 6] = [
    "D4:01:C3", "18:FD:74", "C4:AD:34", "74:4D:28", "DC:2C:6E", "48:8F:5A",
];

/// Models whose MACs show up on many ports (wireless bridges)
pub const DEFAULT_EXCLUDED_MODELS: [&str; 1] = ["W610W"];

pub const DEFAULT_INTERFACE_PREFIX: &str = "ether";

/// Source of a switch's bridge host table
#[async_trait]
pub trait MacTableClient: Send + Sync {
    async fn fetch_host_table(&self, address: &str) -> Result<Vec<HostEntry>, HostTableError>;
}

#[async_trait]
impl MacTableClient for RouterOsClient {
    async fn fetch_host_table(&self, address: &str) -> Result<Vec<HostEntry>, HostTableError> {
        self.bridge_hosts(address).await
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Interface name prefix of copper ports, `ether` for `ether5`
    pub interface_prefix: String,
    pub ignored_prefixes: Vec<MacPrefix>,
    pub excluded_models: Vec<String>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interface_prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
            ignored_prefixes: DEFAULT_IGNORED_PREFIXES
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            excluded_models: DEFAULT_EXCLUDED_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("switch {switch} management API unreachable: {reason}")]
    RemoteUnreachable { switch: SwitchId, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// What happened to one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PortOutcome {
    Assigned { device: DeviceId, mac: CanonicalMac },
    AlreadyLinked { device: DeviceId },
    Ambiguous { macs: Vec<CanonicalMac> },
    Conflict { device: DeviceId, mac: CanonicalMac, reason: String },
    Unmatched { mac: CanonicalMac },
    /// The table names a port number the switch doesn't have
    UnknownPort { macs: Vec<CanonicalMac> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDetail {
    pub port_number: u16,
    #[serde(flatten)]
    pub outcome: PortOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub switch: SwitchId,
    pub assigned: usize,
    pub already_linked: usize,
    pub ambiguous: usize,
    pub conflicts: usize,
    pub unmatched: usize,
    pub unknown_port: usize,
    /// Table entries on non-copper interfaces (uplinks, bridges, SFP)
    pub skipped_interfaces: usize,
    /// Table entries with a MAC that doesn't normalize
    pub malformed: usize,
    /// Table entries with an ignored MAC prefix
    pub ignored: usize,
    /// Eligible devices whose recorded MAC doesn't normalize
    pub malformed_devices: usize,
    /// MACs recorded on more than one eligible device
    pub duplicate_macs: usize,
    pub details: Vec<PortDetail>,
}

impl ReconcileReport {
    fn new(switch: SwitchId) -> Self {
        Self {
            switch,
            assigned: 0,
            already_linked: 0,
            ambiguous: 0,
            conflicts: 0,
            unmatched: 0,
            unknown_port: 0,
            skipped_interfaces: 0,
            malformed: 0,
            ignored: 0,
            malformed_devices: 0,
            duplicate_macs: 0,
            details: Vec::new(),
        }
    }

    fn record(&mut self, port_number: u16, outcome: PortOutcome) {
        match &outcome {
            PortOutcome::Assigned { .. } => self.assigned += 1,
            PortOutcome::AlreadyLinked { .. } => self.already_linked += 1,
            PortOutcome::Ambiguous { .. } => self.ambiguous += 1,
            PortOutcome::Conflict { .. } => self.conflicts += 1,
            PortOutcome::Unmatched { .. } => self.unmatched += 1,
            PortOutcome::UnknownPort { .. } => self.unknown_port += 1,
        }
        self.details.push(PortDetail {
            port_number,
            outcome,
        });
    }
}

/// Physical port number of an interface such as `ether5`.
///
/// Anything else (`sfp1`, `bridge`, `ether`, `ether0`, `ether5-uplink`) is
/// not a copper port.
pub fn parse_port_number(interface: &str, prefix: &str) -> Option<u16> {
    let digits = interface.trim().strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

/// Canonical MAC to device, without MACs that several devices claim
struct MacLookup {
    devices: HashMap<CanonicalMac, Device>,
    malformed: usize,
    duplicates: usize,
}

impl MacLookup {
    fn build(devices: Vec<Device>) -> Self {
        let mut malformed = 0;
        let mut by_mac: HashMap<CanonicalMac, Vec<Device>> = HashMap::new();
        for device in devices {
            let Some(raw) = device.raw_mac() else {
                continue;
            };
            match normalize(raw) {
                Ok(mac) => by_mac.entry(mac).or_default().push(device),
                Err(e) => {
                    debug!(device = %device.id, mac = e.raw(), "Device MAC does not normalize");
                    malformed += 1;
                }
            }
        }

        let mut duplicates = 0;
        let mut lookup = HashMap::with_capacity(by_mac.len());
        for (mac, mut claimants) in by_mac {
            if claimants.len() > 1 {
                let ids: Vec<DeviceId> = claimants.iter().map(|d| d.id).collect();
                warn!(mac = %mac, devices = ?ids, "MAC recorded on several devices, not matching it");
                duplicates += 1;
                continue;
            }
            if let Some(device) = claimants.pop() {
                lookup.insert(mac, device);
            }
        }

        Self {
            devices: lookup,
            malformed,
            duplicates,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn InventoryStore>,
    client: Arc<dyn MacTableClient>,
    settings: ReconcileSettings,
    locks: Mutex<HashMap<SwitchId, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        client: Arc<dyn MacTableClient>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            client,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn switch_lock(&self, switch: SwitchId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(switch).or_default())
    }

    /// Drop the lock entry once no other run holds or waits on it
    async fn release_lock(&self, switch: SwitchId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // The map and `lock` itself
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&switch);
        }
    }

    /// Read the switch's MAC table and link the devices found on it.
    ///
    /// Runs for the same switch are serialized. Nothing is committed unless
    /// the table was fetched.
    pub async fn reconcile(&self, switch_id: SwitchId) -> Result<ReconcileReport, ReconcileError> {
        // Unknown ids fail here and never get a lock entry
        self.store.get_switch(switch_id).await?;

        let lock = self.switch_lock(switch_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(switch_id).await
        };
        self.release_lock(switch_id, lock).await;
        result
    }

    async fn reconcile_locked(&self, switch_id: SwitchId) -> Result<ReconcileReport, ReconcileError> {
        let switch = self.store.get_switch(switch_id).await?;
        let Some(address) = switch.probe_address().map(str::to_string) else {
            warn!(switch = %switch_id, name = %switch.name, "Switch has no management address");
            return Err(ReconcileError::RemoteUnreachable {
                switch: switch_id,
                reason: "no management address".to_string(),
            });
        };

        let entries = self
            .client
            .fetch_host_table(&address)
            .await
            .map_err(|e| {
                warn!(switch = %switch_id, address = %address, error = %e, "Cannot read MAC table");
                ReconcileError::RemoteUnreachable {
                    switch: switch_id,
                    reason: e.to_string(),
                }
            })?;

        // Read links only now; the fetch may have taken seconds
        let ports: HashMap<u16, Port> = self
            .store
            .list_switch_ports(switch_id)
            .await?
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let numbers: HashMap<PortId, u16> = ports.values().map(|p| (p.id, p.number)).collect();

        let filter = DeviceFilter::all()
            .with_mac()
            .excluding_models(&self.settings.excluded_models);
        let lookup = MacLookup::build(self.store.list_devices(&filter).await?);

        let mut report = ReconcileReport::new(switch_id);
        report.malformed_devices = lookup.malformed;
        report.duplicate_macs = lookup.duplicates;

        let mut by_port: BTreeMap<u16, BTreeSet<CanonicalMac>> = BTreeMap::new();
        for entry in &entries {
            let Some(number) = parse_port_number(&entry.interface, &self.settings.interface_prefix)
            else {
                report.skipped_interfaces += 1;
                continue;
            };
            let mac = match normalize(&entry.mac) {
                Ok(mac) => mac,
                Err(_) => {
                    report.malformed += 1;
                    continue;
                }
            };
            if self.settings.ignored_prefixes.iter().any(|p| mac.has_prefix(p)) {
                report.ignored += 1;
                continue;
            }
            by_port.entry(number).or_default().insert(mac);
        }

        let mut batch = Batch::new();
        let mut claimed: HashSet<DeviceId> = HashSet::new();
        let mut outcomes: Vec<(u16, PortOutcome)> = Vec::new();
        // Port id to its pending `Assigned` entry in `outcomes`
        let mut pending: HashMap<PortId, usize> = HashMap::new();

        for (number, macs) in by_port {
            let Some(port) = ports.get(&number) else {
                debug!(switch = %switch_id, port = number, "Table names a port the switch lacks");
                outcomes.push((number, PortOutcome::UnknownPort { macs: macs.into_iter().collect() }));
                continue;
            };

            if macs.len() > 1 {
                info!(switch = %switch_id, port = number, macs = macs.len(), "Several MACs on port, skipping");
                outcomes.push((number, PortOutcome::Ambiguous { macs: macs.into_iter().collect() }));
                continue;
            }
            let Some(mac) = macs.into_iter().next() else {
                continue;
            };

            let Some(device) = lookup.devices.get(&mac) else {
                outcomes.push((number, PortOutcome::Unmatched { mac }));
                continue;
            };

            let outcome = if port.device == Some(device.id) {
                PortOutcome::AlreadyLinked { device: device.id }
            } else if let Some(other) = port.device {
                PortOutcome::Conflict {
                    device: device.id,
                    mac,
                    reason: format!("port already carries device {other}"),
                }
            } else if let Some(linked) = device.port {
                let reason = match numbers.get(&linked) {
                    Some(n) => format!("device already connected to port {n}"),
                    None => "device already connected on another switch".to_string(),
                };
                PortOutcome::Conflict {
                    device: device.id,
                    mac,
                    reason,
                }
            } else if !claimed.insert(device.id) {
                PortOutcome::Conflict {
                    device: device.id,
                    mac,
                    reason: "device seen on another port in this table".to_string(),
                }
            } else {
                pending.insert(port.id, outcomes.len());
                batch.push(Update::AssignPortIfFree {
                    port: port.id,
                    device: device.id,
                });
                PortOutcome::Assigned {
                    device: device.id,
                    mac,
                }
            };
            outcomes.push((number, outcome));
        }

        // Links made by hand since the read above turn into conflicts
        for Skipped { update, reason } in self.store.apply_batch(batch).await? {
            let Update::AssignPortIfFree { port, device } = update else {
                continue;
            };
            let Some((_, outcome)) = pending.get(&port).and_then(|&i| outcomes.get_mut(i)) else {
                continue;
            };
            if let PortOutcome::Assigned { mac, .. } = &*outcome {
                let mac = mac.clone();
                *outcome = PortOutcome::Conflict {
                    device,
                    mac,
                    reason: reason.to_string(),
                };
            }
        }

        for (number, outcome) in outcomes {
            if let PortOutcome::Conflict { device, reason, .. } = &outcome {
                info!(switch = %switch_id, port = number, device = %device, reason = %reason, "Assignment conflict");
            }
            report.record(number, outcome);
        }

        info!(
            switch = %switch_id,
            entries = entries.len(),
            assigned = report.assigned,
            already_linked = report.already_linked,
            ambiguous = report.ambiguous,
            conflicts = report.conflicts,
            unmatched = report.unmatched,
            "Reconciliation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portwarden_core::{MemoryStore, NewDevice, NewSwitch, Switch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTable {
        entries: Vec<(&'static str, &'static str)>,
        calls: AtomicUsize,
    }

    impl FakeTable {
        fn new(entries: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                entries,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MacTableClient for FakeTable {
        async fn fetch_host_table(&self, _address: &str) -> Result<Vec<HostEntry>, HostTableError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent runs interleave
            tokio::task::yield_now().await;
            Ok(self
                .entries
                .iter()
                .map(|(iface, mac)| HostEntry {
                    interface: iface.to_string(),
                    mac: mac.to_string(),
                })
                .collect())
        }
    }

    /// Links a device to a port by hand while the table is being read
    struct LinkDuringFetch {
        store: Arc<MemoryStore>,
        switch: SwitchId,
        number: u16,
        device: DeviceId,
        table: Arc<FakeTable>,
    }

    #[async_trait]
    impl MacTableClient for LinkDuringFetch {
        async fn fetch_host_table(&self, address: &str) -> Result<Vec<HostEntry>, HostTableError> {
            self.store
                .link_port_device(self.switch, self.number, Some(self.device))
                .await
                .unwrap();
            self.table.fetch_host_table(address).await
        }
    }

    /// Links a device to a port by hand right before each commit
    struct LinkBeforeCommit {
        inner: Arc<MemoryStore>,
        switch: SwitchId,
        number: u16,
        device: DeviceId,
    }

    #[async_trait]
    impl InventoryStore for LinkBeforeCommit {
        async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
            self.inner.list_devices(filter).await
        }

        async fn list_switches(&self) -> Result<Vec<Switch>, StoreError> {
            self.inner.list_switches().await
        }

        async fn get_switch(&self, id: SwitchId) -> Result<Switch, StoreError> {
            self.inner.get_switch(id).await
        }

        async fn list_switch_ports(&self, id: SwitchId) -> Result<Vec<Port>, StoreError> {
            self.inner.list_switch_ports(id).await
        }

        async fn apply_batch(&self, batch: Batch) -> Result<Vec<Skipped>, StoreError> {
            self.inner
                .link_port_device(self.switch, self.number, Some(self.device))
                .await?;
            self.inner.apply_batch(batch).await
        }
    }

    struct DownTable;

    #[async_trait]
    impl MacTableClient for DownTable {
        async fn fetch_host_table(&self, _address: &str) -> Result<Vec<HostEntry>, HostTableError> {
            Err(HostTableError::Auth("invalid user name or password".to_string()))
        }
    }

    async fn switch(store: &MemoryStore, address: Option<&str>) -> SwitchId {
        store
            .create_switch(NewSwitch {
                name: "sw-2f".to_string(),
                address: address.map(str::to_string),
                total_ports: 24,
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn device(store: &MemoryStore, name: &str, model: &str, mac: &str) -> DeviceId {
        store
            .create_device(NewDevice {
                name: name.to_string(),
                model: model.to_string(),
                mac: Some(mac.to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn port_device(store: &MemoryStore, switch: SwitchId, number: u16) -> Option<DeviceId> {
        store
            .list_switch_ports(switch)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.number == number)
            .and_then(|p| p.device)
    }

    fn reconciler(store: &Arc<MemoryStore>, client: Arc<dyn MacTableClient>) -> Reconciler {
        Reconciler::new(store.clone(), client, ReconcileSettings::default())
    }

    #[test]
    fn test_parse_port_number() {
        assert_eq!(parse_port_number("ether5", "ether"), Some(5));
        assert_eq!(parse_port_number("ether24", "ether"), Some(24));
        assert_eq!(parse_port_number("sfp1", "ether"), None);
        assert_eq!(parse_port_number("bridge", "ether"), None);
        assert_eq!(parse_port_number("ether", "ether"), None);
        assert_eq!(parse_port_number("ether0", "ether"), None);
        assert_eq!(parse_port_number("ether5-uplink", "ether"), None);
        assert_eq!(parse_port_number("ge-0/0/3", "ether"), None);
        assert_eq!(parse_port_number("port7", "port"), Some(7));
    }

    #[tokio::test]
    async fn test_assigns_single_mac_port() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        let pc = device(&store, "desk-5", "OptiPlex", "aabb.ccdd.eeff").await;
        let table = FakeTable::new(vec![("ether5", "AA:BB:CC:DD:EE:FF")]);
        let reconciler = reconciler(&store, table);

        let report = reconciler.reconcile(sw).await.unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.details[0].port_number, 5);
        assert_eq!(port_device(&store, sw, 5).await, Some(pc));

        // Second run changes nothing
        let report = reconciler.reconcile(sw).await.unwrap();
        assert_eq!(report.assigned, 0);
        assert_eq!(report.already_linked, 1);
        assert_eq!(report.conflicts, 0);
        store.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_ignored_prefix_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        device(&store, "ap", "cAP", "d4-01-c3-aa-bb-cc").await;
        let table = FakeTable::new(vec![("ether3", "D4:01:C3:AA:BB:CC")]);

        let report = reconciler(&store, table).reconcile(sw).await.unwrap();
        assert_eq!(report.ignored, 1);
        assert_eq!(report.assigned, 0);
        assert!(report.details.is_empty());
        assert_eq!(port_device(&store, sw, 3).await, None);
    }

    #[tokio::test]
    async fn test_two_macs_on_port_is_ambiguous() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        device(&store, "a", "pc", "11:11:11:11:11:11").await;
        device(&store, "b", "pc", "22:22:22:22:22:22").await;
        let table = FakeTable::new(vec![
            ("ether7", "11:11:11:11:11:11"),
            ("ether7", "22:22:22:22:22:22"),
            // Same MAC twice still counts once
            ("ether8", "22:22:22:22:22:22"),
            ("ether8", "22-22-22-22-22-22"),
        ]);

        let report = reconciler(&store, table).reconcile(sw).await.unwrap();
        assert_eq!(report.ambiguous, 1);
        assert_eq!(report.assigned, 1);
        assert_eq!(port_device(&store, sw, 7).await, None);
        assert!(port_device(&store, sw, 8).await.is_some());
    }

    #[tokio::test]
    async fn test_manual_links_are_never_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        let pc = device(&store, "pc", "pc", "aa:aa:aa:aa:aa:01").await;
        let printer = device(&store, "printer", "M404", "aa:aa:aa:aa:aa:02").await;
        store.link_port_device(sw, 2, Some(pc)).await.unwrap();
        store.link_port_device(sw, 9, Some(printer)).await.unwrap();

        let table = FakeTable::new(vec![
            // pc shows up on a different port than recorded
            ("ether4", "AA:AA:AA:AA:AA:01"),
            // port 9 is manually given to the printer, table says pc
            ("ether9", "AA:AA:AA:AA:AA:01"),
        ]);

        let report = reconciler(&store, table).reconcile(sw).await.unwrap();
        assert_eq!(report.conflicts, 2);
        assert_eq!(report.assigned, 0);
        assert_eq!(port_device(&store, sw, 2).await, Some(pc));
        assert_eq!(port_device(&store, sw, 4).await, None);
        assert_eq!(port_device(&store, sw, 9).await, Some(printer));
        store.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_on_two_ports_assigned_once() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        let pc = device(&store, "pc", "pc", "aa:aa:aa:aa:aa:01").await;
        let table = FakeTable::new(vec![
            ("ether4", "AA:AA:AA:AA:AA:01"),
            ("ether3", "AA:AA:AA:AA:AA:01"),
        ]);

        let report = reconciler(&store, table).reconcile(sw).await.unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(port_device(&store, sw, 3).await, Some(pc));
        assert_eq!(port_device(&store, sw, 4).await, None);
    }

    #[tokio::test]
    async fn test_table_and_inventory_noise() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        device(&store, "bridge", "W610W", "bb:bb:bb:bb:bb:01").await;
        device(&store, "broken", "pc", "not-a-mac").await;
        device(&store, "twin-a", "pc", "cc:cc:cc:cc:cc:01").await;
        device(&store, "twin-b", "pc", "cccc.cccc.cc01").await;

        let table = FakeTable::new(vec![
            ("ether1", "BB:BB:BB:BB:BB:01"),
            ("ether2", "CC:CC:CC:CC:CC:01"),
            ("ether3", "garbage"),
            ("sfp-sfpplus1", "EE:EE:EE:EE:EE:01"),
            ("bridge", "EE:EE:EE:EE:EE:02"),
            ("ether30", "EE:EE:EE:EE:EE:03"),
        ]);

        let report = reconciler(&store, table).reconcile(sw).await.unwrap();
        assert_eq!(report.malformed_devices, 1);
        assert_eq!(report.duplicate_macs, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.skipped_interfaces, 2);
        assert_eq!(report.unknown_port, 1);
        // Excluded model and duplicated MAC are both unmatched
        assert_eq!(report.unmatched, 2);
        assert_eq!(report.assigned, 0);
    }

    #[tokio::test]
    async fn test_unreachable_switch_commits_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        device(&store, "pc", "pc", "aa:bb:cc:dd:ee:ff").await;

        let err = reconciler(&store, Arc::new(DownTable)).reconcile(sw).await.unwrap_err();
        assert!(matches!(err, ReconcileError::RemoteUnreachable { switch, .. } if switch == sw));
        assert_eq!(store.unlinked_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_switch_without_address_is_not_contacted() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, None).await;
        let table = FakeTable::new(vec![("ether1", "AA:BB:CC:DD:EE:FF")]);

        let err = reconciler(&store, table.clone()).reconcile(sw).await.unwrap_err();
        assert!(matches!(err, ReconcileError::RemoteUnreachable { .. }));
        assert_eq!(table.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_switch() {
        let store = Arc::new(MemoryStore::new());
        let table = FakeTable::new(vec![]);
        let err = reconciler(&store, table).reconcile(SwitchId(99)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_one_switch_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        device(&store, "pc", "pc", "aa:bb:cc:dd:ee:ff").await;
        let table = FakeTable::new(vec![("ether5", "AA:BB:CC:DD:EE:FF")]);
        let reconciler = reconciler(&store, table);

        let (a, b) = tokio::join!(reconciler.reconcile(sw), reconciler.reconcile(sw));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.assigned + b.assigned, 1);
        assert_eq!(a.already_linked + b.already_linked, 1);
        store.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_link_made_during_fetch_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        let pc = device(&store, "pc", "pc", "aa:aa:aa:aa:aa:05").await;
        let printer = device(&store, "printer", "M404", "aa:aa:aa:aa:aa:06").await;
        let manual = device(&store, "manual", "pc", "aa:aa:aa:aa:aa:99").await;
        let client = Arc::new(LinkDuringFetch {
            store: store.clone(),
            switch: sw,
            number: 5,
            device: manual,
            table: FakeTable::new(vec![
                ("ether5", "AA:AA:AA:AA:AA:05"),
                ("ether6", "AA:AA:AA:AA:AA:06"),
            ]),
        });

        let report = reconciler(&store, client).reconcile(sw).await.unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(
            report.details[0].outcome,
            PortOutcome::Conflict {
                device: pc,
                mac: normalize("aa:aa:aa:aa:aa:05").unwrap(),
                reason: format!("port already carries device {manual}"),
            }
        );
        assert_eq!(port_device(&store, sw, 5).await, Some(manual));
        assert_eq!(port_device(&store, sw, 6).await, Some(printer));
        store.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_link_made_before_commit_keeps_other_assignments() {
        let memory = Arc::new(MemoryStore::new());
        let sw = switch(&memory, Some("10.0.0.1")).await;
        let pc = device(&memory, "pc", "pc", "aa:aa:aa:aa:aa:05").await;
        let printer = device(&memory, "printer", "M404", "aa:aa:aa:aa:aa:06").await;
        let manual = device(&memory, "manual", "pc", "aa:aa:aa:aa:aa:99").await;
        let store = Arc::new(LinkBeforeCommit {
            inner: memory.clone(),
            switch: sw,
            number: 5,
            device: manual,
        });
        let table = FakeTable::new(vec![
            ("ether5", "AA:AA:AA:AA:AA:05"),
            ("ether6", "AA:AA:AA:AA:AA:06"),
        ]);

        let report = Reconciler::new(store, table, ReconcileSettings::default())
            .reconcile(sw)
            .await
            .unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.details[0].port_number, 5);
        assert_eq!(
            report.details[0].outcome,
            PortOutcome::Conflict {
                device: pc,
                mac: normalize("aa:aa:aa:aa:aa:05").unwrap(),
                reason: format!("switch {sw} port 5 already carries device {manual}"),
            }
        );
        assert_eq!(report.details[1].outcome, PortOutcome::Assigned {
            device: printer,
            mac: normalize("aa:aa:aa:aa:aa:06").unwrap(),
        });
        assert_eq!(port_device(&memory, sw, 5).await, Some(manual));
        assert_eq!(port_device(&memory, sw, 6).await, Some(printer));
        memory.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_outlive_runs() {
        let store = Arc::new(MemoryStore::new());
        let sw = switch(&store, Some("10.0.0.1")).await;
        let reconciler = reconciler(&store, FakeTable::new(vec![]));

        for id in 1000..1100 {
            assert!(reconciler.reconcile(SwitchId(id)).await.unwrap_err().is_not_found());
        }
        let (a, b) = tokio::join!(reconciler.reconcile(sw), reconciler.reconcile(sw));
        a.unwrap();
        b.unwrap();
        assert!(reconciler.locks.lock().await.is_empty());
    }
}
