//! Switch ports, patch panels and the inventory graph linking them
//!
//! Links are plain identifiers stored on both ends. [`Inventory`] is the only
//! place that writes them, so a port and the device it carries always point
//! at each other, and the same holds for a port and its patch panel port.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::device::{
    record_id, Device, DeviceId, LivenessChange, NewDevice, NewSwitch, Switch, SwitchId,
};

record_id!(
    /// Identifier of a copper switch port
    PortId
);
record_id!(
    /// Identifier of a fiber (SFP) switch port
    FiberPortId
);
record_id!(
    /// Identifier of a patch panel
    PatchPanelId
);
record_id!(
    /// Identifier of a single patch panel port
    PatchPanelPortId
);

/// Ports on every patch panel
pub const PATCH_PANEL_PORTS: u16 = 24;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("device {0} not found")]
    UnknownDevice(DeviceId),
    #[error("switch {0} not found")]
    UnknownSwitch(SwitchId),
    #[error("port {0} not found")]
    UnknownPort(PortId),
    #[error("patch panel {0} not found")]
    UnknownPatchPanel(PatchPanelId),
    #[error("switch {switch} has no port {number}")]
    NoSuchSwitchPort { switch: SwitchId, number: u16 },
    #[error("patch panel {panel} has no port {number}")]
    NoSuchPatchPanelPort { panel: PatchPanelId, number: u16 },
    #[error("switch {switch} port {number} already carries device {device}")]
    PortOccupied {
        switch: SwitchId,
        number: u16,
        device: DeviceId,
    },
    #[error("device {device} already connected to switch {switch} port {number}")]
    DeviceAlreadyLinked {
        device: DeviceId,
        switch: SwitchId,
        number: u16,
    },
    #[error("switch {switch} port {number} already patched to patch panel port {patch_port}")]
    PortAlreadyPatched {
        switch: SwitchId,
        number: u16,
        patch_port: PatchPanelPortId,
    },
    #[error("a switch needs at least one port")]
    NoPorts,
    #[error("inventory inconsistent: {0}")]
    Inconsistent(String),
}

impl TopologyError {
    /// A referenced record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownDevice(_)
                | Self::UnknownSwitch(_)
                | Self::UnknownPort(_)
                | Self::UnknownPatchPanel(_)
                | Self::NoSuchSwitchPort { .. }
                | Self::NoSuchPatchPanelPort { .. }
        )
    }

    /// The change would break a uniqueness rule
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::PortOccupied { .. } | Self::DeviceAlreadyLinked { .. } | Self::PortAlreadyPatched { .. }
        )
    }
}

/// A copper port on a switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub switch_id: SwitchId,
    pub number: u16,
    pub title: String,
    pub device: Option<DeviceId>,
    pub patch_panel_port: Option<PatchPanelPortId>,
}

/// A fiber port on a switch. Fiber ports carry no links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiberPort {
    pub id: FiberPortId,
    pub switch_id: SwitchId,
    pub number: u16,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPanel {
    pub id: PatchPanelId,
    pub title: String,
    pub unique_id: String,
    pub floor: i32,
    pub show: bool,
    pub created_at: chrono::DateTime<Utc>,
}

/// One jack on a patch panel, optionally cabled to a switch port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPanelPort {
    pub id: PatchPanelPortId,
    pub patch_panel_id: PatchPanelId,
    pub number: u16,
    pub title: String,
    pub cable_number: Option<String>,
    pub cable_length: Option<String>,
    pub function: Option<String>,
    pub port: Option<PortId>,
}

/// Initial switch port link requested when a patch panel is created
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InitialPatchLink {
    pub port_number: u16,
    pub switch_port_id: PortId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPatchPanel {
    pub title: String,
    /// Generated when missing or blank
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub show: bool,
    #[serde(default)]
    pub ports: Vec<InitialPatchLink>,
}

/// What to do with a patch panel port's switch-side link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchLink {
    Keep,
    Disconnect,
    Connect(PortId),
}

/// Cable metadata; `None` fields are left as they are
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CableInfo {
    #[serde(default)]
    pub cable_number: Option<String>,
    #[serde(default)]
    pub cable_length: Option<String>,
}

/// Switch record together with its ports
#[derive(Debug, Clone, Serialize)]
pub struct SwitchView {
    #[serde(flatten)]
    pub switch: Switch,
    pub ports: Vec<Port>,
    pub fiber_ports: Vec<FiberPort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchPanelView {
    #[serde(flatten)]
    pub panel: PatchPanel,
    pub ports: Vec<PatchPanelPort>,
}

/// Whole inventory, as listed to clients
#[derive(Debug, Clone, Serialize)]
pub struct InventoryView {
    pub devices: Vec<Device>,
    pub switches: Vec<SwitchView>,
    pub patch_panels: Vec<PatchPanelView>,
}

/// Switch port not yet cabled to a patch panel
#[derive(Debug, Clone, Serialize)]
pub struct AvailablePort {
    #[serde(flatten)]
    pub port: Port,
    pub switch_name: String,
    pub switch_floor: i32,
}

/// All inventory records.
///
/// Mutating methods may leave partial changes behind when they fail; callers
/// that need all-or-nothing semantics work on a clone and keep it only on
/// success (see [`crate::store::MemoryStore`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    next_id: u64,
    devices: BTreeMap<DeviceId, Device>,
    switches: BTreeMap<SwitchId, Switch>,
    ports: BTreeMap<PortId, Port>,
    fiber_ports: BTreeMap<FiberPortId, FiberPort>,
    patch_panels: BTreeMap<PatchPanelId, PatchPanel>,
    patch_panel_ports: BTreeMap<PatchPanelPortId, PatchPanelPort>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn device(&self, id: DeviceId) -> Result<&Device, TopologyError> {
        self.devices.get(&id).ok_or(TopologyError::UnknownDevice(id))
    }

    pub fn switch(&self, id: SwitchId) -> Result<&Switch, TopologyError> {
        self.switches.get(&id).ok_or(TopologyError::UnknownSwitch(id))
    }

    pub fn port(&self, id: PortId) -> Result<&Port, TopologyError> {
        self.ports.get(&id).ok_or(TopologyError::UnknownPort(id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    /// Ports of a switch, ordered by port number
    pub fn switch_ports(&self, id: SwitchId) -> Result<Vec<&Port>, TopologyError> {
        self.switch(id)?;
        let mut ports: Vec<&Port> = self.ports.values().filter(|p| p.switch_id == id).collect();
        ports.sort_by_key(|p| p.number);
        Ok(ports)
    }

    /// Owning switch and port number, for messages
    fn port_location(&self, id: PortId) -> Result<(SwitchId, u16), TopologyError> {
        let port = self.port(id)?;
        Ok((port.switch_id, port.number))
    }

    /// Find a port by its number on a switch
    pub fn switch_port(&self, switch: SwitchId, number: u16) -> Result<&Port, TopologyError> {
        self.switch(switch)?;
        self.ports
            .values()
            .find(|p| p.switch_id == switch && p.number == number)
            .ok_or(TopologyError::NoSuchSwitchPort { switch, number })
    }

    fn patch_panel_port_id(
        &self,
        panel: PatchPanelId,
        number: u16,
    ) -> Result<PatchPanelPortId, TopologyError> {
        if !self.patch_panels.contains_key(&panel) {
            return Err(TopologyError::UnknownPatchPanel(panel));
        }
        self.patch_panel_ports
            .values()
            .find(|p| p.patch_panel_id == panel && p.number == number)
            .map(|p| p.id)
            .ok_or(TopologyError::NoSuchPatchPanelPort { panel, number })
    }

    /// Devices not connected to any switch port
    pub fn unlinked_devices(&self) -> Vec<&Device> {
        self.devices.values().filter(|d| d.port.is_none()).collect()
    }

    /// Switch ports without a patch panel cable, optionally on one floor
    pub fn available_ports(&self, floor: Option<i32>) -> Vec<AvailablePort> {
        self.ports
            .values()
            .filter(|p| p.patch_panel_port.is_none())
            .filter_map(|p| {
                let switch = self.switches.get(&p.switch_id)?;
                if floor.is_some_and(|f| f != switch.floor) {
                    return None;
                }
                Some(AvailablePort {
                    port: p.clone(),
                    switch_name: switch.name.clone(),
                    switch_floor: switch.floor,
                })
            })
            .collect()
    }

    /// Everything, grouped the way clients list it
    pub fn view(&self) -> InventoryView {
        let switches = self
            .switches
            .values()
            .map(|s| {
                let mut ports: Vec<Port> = self
                    .ports
                    .values()
                    .filter(|p| p.switch_id == s.id)
                    .cloned()
                    .collect();
                ports.sort_by_key(|p| p.number);
                let mut fiber_ports: Vec<FiberPort> = self
                    .fiber_ports
                    .values()
                    .filter(|p| p.switch_id == s.id)
                    .cloned()
                    .collect();
                fiber_ports.sort_by_key(|p| p.number);
                SwitchView {
                    switch: s.clone(),
                    ports,
                    fiber_ports,
                }
            })
            .collect();

        let patch_panels = self
            .patch_panels
            .values()
            .map(|panel| {
                let mut ports: Vec<PatchPanelPort> = self
                    .patch_panel_ports
                    .values()
                    .filter(|p| p.patch_panel_id == panel.id)
                    .cloned()
                    .collect();
                ports.sort_by_key(|p| p.number);
                PatchPanelView {
                    panel: panel.clone(),
                    ports,
                }
            })
            .collect();

        InventoryView {
            devices: self.devices.values().cloned().collect(),
            switches,
            patch_panels,
        }
    }

    // ── Records ──────────────────────────────────────────────────────

    pub fn add_device(&mut self, new: NewDevice) -> DeviceId {
        let id = DeviceId(self.allocate());
        self.devices.insert(
            id,
            Device {
                id,
                name: new.name,
                kind: new.kind,
                model: new.model,
                floor: new.floor,
                place: new.place,
                cable_number: new.cable_number,
                mac: new.mac,
                address: new.address,
                notes: new.notes,
                liveness: new.liveness,
                port: None,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Record a switch with ports `1..=total_ports` and fiber ports
    /// `1..=total_fiber_ports`, then apply the requested device links.
    pub fn add_switch(&mut self, new: NewSwitch) -> Result<SwitchId, TopologyError> {
        if new.total_ports == 0 {
            return Err(TopologyError::NoPorts);
        }

        let id = SwitchId(self.allocate());
        let now = Utc::now();
        for number in 1..=new.total_ports {
            let port_id = PortId(self.allocate());
            self.ports.insert(
                port_id,
                Port {
                    id: port_id,
                    switch_id: id,
                    number,
                    title: format!("{}-P{}", new.name, number),
                    device: None,
                    patch_panel_port: None,
                },
            );
        }
        for number in 1..=new.total_fiber_ports {
            let fiber_id = FiberPortId(self.allocate());
            self.fiber_ports.insert(
                fiber_id,
                FiberPort {
                    id: fiber_id,
                    switch_id: id,
                    number,
                    title: format!("{}-F{}", new.name, number),
                },
            );
        }

        self.switches.insert(
            id,
            Switch {
                id,
                name: new.name,
                kind: new.kind,
                model: new.model,
                floor: new.floor,
                place: new.place,
                mac: new.mac,
                address: new.address,
                notes: new.notes,
                poe: new.poe,
                total_ports: new.total_ports,
                total_fiber_ports: new.total_fiber_ports,
                liveness: new.liveness,
                created_at: now,
                updated_at: now,
            },
        );

        for link in new.ports {
            let port = self.switch_port(id, link.port_number)?.id;
            self.connect_device(port, link.device_id)?;
        }

        Ok(id)
    }

    /// Record a patch panel with [`PATCH_PANEL_PORTS`] ports, then apply the
    /// requested switch port links.
    pub fn add_patch_panel(&mut self, new: NewPatchPanel) -> Result<PatchPanelId, TopologyError> {
        let id = PatchPanelId(self.allocate());
        let unique_id = new
            .unique_id
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());

        for number in 1..=PATCH_PANEL_PORTS {
            let port_id = PatchPanelPortId(self.allocate());
            self.patch_panel_ports.insert(
                port_id,
                PatchPanelPort {
                    id: port_id,
                    patch_panel_id: id,
                    number,
                    title: format!("{}-{}P", new.title, number),
                    cable_number: None,
                    cable_length: None,
                    function: None,
                    port: None,
                },
            );
        }

        self.patch_panels.insert(
            id,
            PatchPanel {
                id,
                title: new.title,
                unique_id,
                floor: new.floor,
                show: new.show,
                created_at: Utc::now(),
            },
        );

        for link in new.ports {
            self.patch(
                id,
                link.port_number,
                PatchLink::Connect(link.switch_port_id),
                CableInfo::default(),
            )?;
        }

        Ok(id)
    }

    pub fn update_device_liveness(&mut self, id: DeviceId, change: LivenessChange) -> Result<(), TopologyError> {
        let device = self.devices.get_mut(&id).ok_or(TopologyError::UnknownDevice(id))?;
        device.liveness.apply(change);
        Ok(())
    }

    pub fn update_switch_liveness(&mut self, id: SwitchId, change: LivenessChange) -> Result<(), TopologyError> {
        let switch = self.switches.get_mut(&id).ok_or(TopologyError::UnknownSwitch(id))?;
        switch.liveness.apply(change);
        switch.updated_at = Utc::now();
        Ok(())
    }

    // ── Links ────────────────────────────────────────────────────────

    /// Connect a device to a port. Both ends must be free.
    pub fn connect_device(&mut self, port: PortId, device: DeviceId) -> Result<(), TopologyError> {
        let current = self.port(port)?.device;
        let linked_to = self.device(device)?.port;

        if let Some(occupant) = current {
            let (switch, number) = self.port_location(port)?;
            return Err(TopologyError::PortOccupied {
                switch,
                number,
                device: occupant,
            });
        }
        if let Some(other) = linked_to {
            let (switch, number) = self.port_location(other)?;
            return Err(TopologyError::DeviceAlreadyLinked { device, switch, number });
        }

        if let Some(p) = self.ports.get_mut(&port) {
            p.device = Some(device);
        }
        if let Some(d) = self.devices.get_mut(&device) {
            d.port = Some(port);
        }
        Ok(())
    }

    /// Clear the device link of a port, returning the device it carried
    pub fn disconnect_port(&mut self, port: PortId) -> Result<Option<DeviceId>, TopologyError> {
        let p = self.ports.get_mut(&port).ok_or(TopologyError::UnknownPort(port))?;
        let previous = p.device.take();
        if let Some(device) = previous {
            if let Some(d) = self.devices.get_mut(&device) {
                d.port = None;
            }
        }
        Ok(previous)
    }

    /// Manual port assignment: `None` disconnects, `Some` replaces whatever
    /// the port carried. A device already connected elsewhere is refused.
    pub fn set_port_device(
        &mut self,
        switch: SwitchId,
        number: u16,
        device: Option<DeviceId>,
    ) -> Result<Port, TopologyError> {
        let port = self.switch_port(switch, number)?.id;

        match device {
            None => {
                self.disconnect_port(port)?;
            }
            Some(device) => {
                let linked_to = self.device(device)?.port;
                match linked_to {
                    Some(existing) if existing == port => {}
                    Some(existing) => {
                        let (switch, number) = self.port_location(existing)?;
                        return Err(TopologyError::DeviceAlreadyLinked { device, switch, number });
                    }
                    None => {
                        self.disconnect_port(port)?;
                        self.connect_device(port, device)?;
                    }
                }
            }
        }

        Ok(self.port(port)?.clone())
    }

    /// Update a patch panel port's cable metadata and switch-side link.
    pub fn patch(
        &mut self,
        panel: PatchPanelId,
        number: u16,
        link: PatchLink,
        cable: CableInfo,
    ) -> Result<PatchPanelPort, TopologyError> {
        let jack = self.patch_panel_port_id(panel, number)?;

        match link {
            PatchLink::Keep => {}
            PatchLink::Disconnect => self.unpatch(jack),
            PatchLink::Connect(port) => {
                let taken_by = self.port(port)?.patch_panel_port;
                match taken_by {
                    Some(other) if other == jack => {}
                    Some(other) => {
                        let (switch, number) = self.port_location(port)?;
                        return Err(TopologyError::PortAlreadyPatched {
                            switch,
                            number,
                            patch_port: other,
                        });
                    }
                    None => {
                        self.unpatch(jack);
                        if let Some(p) = self.ports.get_mut(&port) {
                            p.patch_panel_port = Some(jack);
                        }
                        if let Some(j) = self.patch_panel_ports.get_mut(&jack) {
                            j.port = Some(port);
                        }
                    }
                }
            }
        }

        let j = self
            .patch_panel_ports
            .get_mut(&jack)
            .ok_or(TopologyError::NoSuchPatchPanelPort { panel, number })?;
        if let Some(cable_number) = cable.cable_number {
            j.cable_number = Some(cable_number);
        }
        if let Some(cable_length) = cable.cable_length {
            j.cable_length = Some(cable_length);
        }
        Ok(j.clone())
    }

    fn unpatch(&mut self, jack: PatchPanelPortId) {
        let previous = self
            .patch_panel_ports
            .get_mut(&jack)
            .and_then(|j| j.port.take());
        if let Some(port) = previous {
            if let Some(p) = self.ports.get_mut(&port) {
                p.patch_panel_port = None;
            }
        }
    }

    // ── Consistency ──────────────────────────────────────────────────

    /// Verify that every link is reciprocal and every port has an owner.
    ///
    /// Reciprocity implies uniqueness: a device stores a single port, so two
    /// ports naming the same device cannot both be mirrored.
    pub fn check_invariants(&self) -> Result<(), TopologyError> {
        let broken = |msg: String| Err(TopologyError::Inconsistent(msg));

        for port in self.ports.values() {
            if !self.switches.contains_key(&port.switch_id) {
                return broken(format!("port {} belongs to missing switch {}", port.id, port.switch_id));
            }
            if let Some(device) = port.device {
                match self.devices.get(&device) {
                    Some(d) if d.port == Some(port.id) => {}
                    Some(d) => {
                        return broken(format!(
                            "port {} carries device {} which points at {:?}",
                            port.id, device, d.port
                        ))
                    }
                    None => return broken(format!("port {} carries missing device {}", port.id, device)),
                }
            }
            if let Some(jack) = port.patch_panel_port {
                match self.patch_panel_ports.get(&jack) {
                    Some(j) if j.port == Some(port.id) => {}
                    _ => {
                        return broken(format!(
                            "port {} patched to {} which does not point back",
                            port.id, jack
                        ))
                    }
                }
            }
        }

        for device in self.devices.values() {
            if let Some(port) = device.port {
                match self.ports.get(&port) {
                    Some(p) if p.device == Some(device.id) => {}
                    _ => {
                        return broken(format!(
                            "device {} points at port {} which does not carry it",
                            device.id, port
                        ))
                    }
                }
            }
        }

        for jack in self.patch_panel_ports.values() {
            if !self.patch_panels.contains_key(&jack.patch_panel_id) {
                return broken(format!(
                    "patch panel port {} belongs to missing panel {}",
                    jack.id, jack.patch_panel_id
                ));
            }
            if let Some(port) = jack.port {
                match self.ports.get(&port) {
                    Some(p) if p.patch_panel_port == Some(jack.id) => {}
                    _ => {
                        return broken(format!(
                            "patch panel port {} points at port {} which does not point back",
                            jack.id, port
                        ))
                    }
                }
            }
        }

        for fiber in self.fiber_ports.values() {
            if !self.switches.contains_key(&fiber.switch_id) {
                return broken(format!(
                    "fiber port {} belongs to missing switch {}",
                    fiber.id, fiber.switch_id
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(inv: &mut Inventory, name: &str) -> DeviceId {
        inv.add_device(NewDevice {
            name: name.to_string(),
            ..Default::default()
        })
    }

    fn switch(inv: &mut Inventory, name: &str, ports: u16) -> SwitchId {
        inv.add_switch(NewSwitch {
            name: name.to_string(),
            total_ports: ports,
            total_fiber_ports: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_switch_creates_numbered_ports() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "core", 8);

        let ports = inv.switch_ports(sw).unwrap();
        assert_eq!(ports.len(), 8);
        assert_eq!(ports[0].number, 1);
        assert_eq!(ports[7].number, 8);
        assert_eq!(ports[4].title, "core-P5");

        let view = inv.view();
        assert_eq!(view.switches[0].fiber_ports.len(), 2);
        assert_eq!(view.switches[0].fiber_ports[1].title, "core-F2");
        inv.check_invariants().unwrap();
    }

    #[test]
    fn test_switch_without_ports_is_rejected() {
        let mut inv = Inventory::new();
        let err = inv
            .add_switch(NewSwitch {
                name: "empty".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, TopologyError::NoPorts);
    }

    #[test]
    fn test_connect_is_reciprocal_and_unique() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "sw1", 4);
        let pc = device(&mut inv, "pc");
        let other = device(&mut inv, "other");
        let p1 = inv.switch_port(sw, 1).unwrap().id;
        let p2 = inv.switch_port(sw, 2).unwrap().id;

        inv.connect_device(p1, pc).unwrap();
        assert_eq!(inv.port(p1).unwrap().device, Some(pc));
        assert_eq!(inv.device(pc).unwrap().port, Some(p1));

        let err = inv.connect_device(p2, pc).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            err,
            TopologyError::DeviceAlreadyLinked {
                device: pc,
                switch: sw,
                number: 1
            }
        );

        let err = inv.connect_device(p1, other).unwrap_err();
        assert_eq!(err.to_string(), format!("switch {sw} port 1 already carries device {pc}"));

        inv.check_invariants().unwrap();
    }

    #[test]
    fn test_manual_assignment_replaces_port_occupant() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "sw1", 4);
        let old = device(&mut inv, "old");
        let new = device(&mut inv, "new");

        inv.set_port_device(sw, 3, Some(old)).unwrap();
        let port = inv.set_port_device(sw, 3, Some(new)).unwrap();
        assert_eq!(port.device, Some(new));
        assert_eq!(inv.device(old).unwrap().port, None);

        // Same device again is a no-op
        inv.set_port_device(sw, 3, Some(new)).unwrap();

        // Device already on port 3 cannot also take port 4
        let err = inv.set_port_device(sw, 4, Some(new)).unwrap_err();
        assert!(err.is_conflict());

        let port = inv.set_port_device(sw, 3, None).unwrap();
        assert_eq!(port.device, None);
        assert_eq!(inv.device(new).unwrap().port, None);

        assert!(inv.set_port_device(sw, 99, None).unwrap_err().is_not_found());
        inv.check_invariants().unwrap();
    }

    #[test]
    fn test_patch_panel_links_are_unique_both_ways() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "sw1", 4);
        let p1 = inv.switch_port(sw, 1).unwrap().id;
        let panel = inv
            .add_patch_panel(NewPatchPanel {
                title: "PP-A".to_string(),
                ports: vec![InitialPatchLink {
                    port_number: 1,
                    switch_port_id: p1,
                }],
                ..Default::default()
            })
            .unwrap();

        let view = inv.view();
        let panel_view = &view.patch_panels[0];
        assert_eq!(panel_view.ports.len(), usize::from(PATCH_PANEL_PORTS));
        assert_eq!(panel_view.ports[0].port, Some(p1));
        assert_eq!(panel_view.ports[5].title, "PP-A-6P");
        assert_eq!(panel_view.panel.unique_id.len(), 8);

        // Jack 2 cannot take a switch port already patched to jack 1
        let err = inv
            .patch(panel, 2, PatchLink::Connect(p1), CableInfo::default())
            .unwrap_err();
        assert!(err.is_conflict());

        // Moving jack 1 to another port frees the first one
        let p2 = inv.switch_port(sw, 2).unwrap().id;
        let jack = inv
            .patch(
                panel,
                1,
                PatchLink::Connect(p2),
                CableInfo {
                    cable_number: Some("C-17".to_string()),
                    cable_length: Some("3m".to_string()),
                },
            )
            .unwrap();
        assert_eq!(jack.port, Some(p2));
        assert_eq!(jack.cable_number.as_deref(), Some("C-17"));
        assert_eq!(inv.port(p1).unwrap().patch_panel_port, None);

        // Metadata survives a disconnect
        let jack = inv
            .patch(panel, 1, PatchLink::Disconnect, CableInfo::default())
            .unwrap();
        assert_eq!(jack.port, None);
        assert_eq!(jack.cable_length.as_deref(), Some("3m"));

        inv.check_invariants().unwrap();
    }

    #[test]
    fn test_available_ports_by_floor() {
        let mut inv = Inventory::new();
        let ground = inv
            .add_switch(NewSwitch {
                name: "ground".to_string(),
                floor: 0,
                total_ports: 2,
                ..Default::default()
            })
            .unwrap();
        inv.add_switch(NewSwitch {
            name: "first".to_string(),
            floor: 1,
            total_ports: 3,
            ..Default::default()
        })
        .unwrap();
        let p1 = inv.switch_port(ground, 1).unwrap().id;
        inv.add_patch_panel(NewPatchPanel {
            title: "PP".to_string(),
            ports: vec![InitialPatchLink {
                port_number: 1,
                switch_port_id: p1,
            }],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(inv.available_ports(None).len(), 4);
        let ground_ports = inv.available_ports(Some(0));
        assert_eq!(ground_ports.len(), 1);
        assert_eq!(ground_ports[0].switch_name, "ground");
        assert_eq!(inv.available_ports(Some(1)).len(), 3);
    }

    #[test]
    fn test_check_invariants_detects_one_sided_link() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "sw1", 2);
        let pc = device(&mut inv, "pc");
        let p1 = inv.switch_port(sw, 1).unwrap().id;

        inv.ports.get_mut(&p1).unwrap().device = Some(pc);
        assert!(matches!(
            inv.check_invariants(),
            Err(TopologyError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut inv = Inventory::new();
        let sw = switch(&mut inv, "sw1", 2);
        let pc = device(&mut inv, "pc");
        inv.set_port_device(sw, 2, Some(pc)).unwrap();

        let json = serde_json::to_string(&inv).unwrap();
        let restored: Inventory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.device(pc).unwrap().port, inv.switch_port(sw, 2).ok().map(|p| p.id));
        restored.check_invariants().unwrap();
    }
}
