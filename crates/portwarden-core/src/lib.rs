//! Portwarden Core - inventory model, MAC normalization and record store
//!
//! This crate provides the foundational types for Portwarden:
//! - Device and switch records with their liveness flags
//! - Ports, fiber ports and patch panels, linked by explicit ids
//! - MAC address normalization and prefix matching
//! - The record store interface used by the sweep and the reconciler

pub mod device;
pub mod mac;
pub mod store;
pub mod topology;

pub use device::{Device, DeviceId, InitialPortLink, Liveness, LivenessChange, NewDevice, NewSwitch, Switch, SwitchId};
pub use mac::{normalize, CanonicalMac, MacPrefix, MalformedMac};
pub use store::{Batch, DeviceFilter, InventoryStore, MemoryStore, Skipped, StoreError, Update};
pub use topology::{
    AvailablePort, CableInfo, FiberPort, FiberPortId, InitialPatchLink, Inventory, InventoryView,
    NewPatchPanel, PatchLink, PatchPanel, PatchPanelId, PatchPanelPort, PatchPanelPortId,
    PatchPanelView, Port, PortId, SwitchView, TopologyError, PATCH_PANEL_PORTS,
};
