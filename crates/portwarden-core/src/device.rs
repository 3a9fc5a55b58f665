//! Device and switch records tracked in the inventory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topology::PortId;

/// Declares a numeric identifier newtype for an inventory record.
macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

pub(crate) use record_id;

record_id!(
    /// Identifier of an end device (workstation, printer, phone, ...)
    DeviceId
);
record_id!(
    /// Identifier of a managed switch
    SwitchId
);

/// Reachability state shared by devices and switches.
///
/// `active` reflects the last probe; `show` is the listing flag, which the
/// sweep only ever raises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Liveness {
    pub active: bool,
    pub show: bool,
}

impl Liveness {
    pub fn new(active: bool, show: bool) -> Self {
        Self { active, show }
    }

    pub fn apply(&mut self, change: LivenessChange) {
        match change {
            LivenessChange::SetActive(active) => self.active = active,
            LivenessChange::RaiseShow => self.show = true,
            LivenessChange::Hide => *self = Self::new(false, false),
        }
    }
}

/// A single-field edit of a [`Liveness`].
///
/// Only [`LivenessChange::Hide`] clears `show`; it is meant for entities
/// without an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessChange {
    SetActive(bool),
    RaiseShow,
    Hide,
}

/// Returns the address to probe, ignoring blank values.
fn probe_target(address: &Option<String>) -> Option<&str> {
    address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
}

/// An end device recorded by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub floor: i32,
    pub place: String,
    #[serde(default)]
    pub cable_number: Option<String>,
    /// MAC address as entered; normalized only when matched
    #[serde(default)]
    pub mac: Option<String>,
    /// IP address or hostname used for probing
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub liveness: Liveness,
    /// Switch port this device is patched into
    #[serde(default)]
    pub port: Option<PortId>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Address to probe, if the device has a non-blank one
    pub fn probe_address(&self) -> Option<&str> {
        probe_target(&self.address)
    }

    /// MAC as entered, if non-blank
    pub fn raw_mac(&self) -> Option<&str> {
        self.mac.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }
}

/// Fields supplied when recording a new device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub cable_number: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub liveness: Liveness,
}

/// A managed switch. Its ports are created together with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    pub id: SwitchId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub floor: i32,
    pub place: String,
    #[serde(default)]
    pub mac: Option<String>,
    /// Management address (RouterOS API endpoint)
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub poe: bool,
    pub total_ports: u16,
    #[serde(default)]
    pub total_fiber_ports: u16,
    #[serde(flatten)]
    pub liveness: Liveness,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Switch {
    /// Management address, if the switch has a non-blank one
    pub fn probe_address(&self) -> Option<&str> {
        probe_target(&self.address)
    }
}

/// Initial device link requested when a switch is created
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InitialPortLink {
    pub port_number: u16,
    pub device_id: DeviceId,
}

/// Fields supplied when recording a new switch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSwitch {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub poe: bool,
    pub total_ports: u16,
    #[serde(default)]
    pub total_fiber_ports: u16,
    #[serde(flatten)]
    pub liveness: Liveness,
    /// Devices to patch in right away
    #[serde(default)]
    pub ports: Vec<InitialPortLink>,
}
