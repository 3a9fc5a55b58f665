//! Portwarden Discovery - keeps the inventory in step with the live network
//!
//! This crate provides:
//! - Bounded reachability probes (ICMP ping, TCP connect)
//! - The concurrent liveness sweep over devices and switches
//! - MAC-table driven device-to-port reconciliation

pub mod probe;
pub mod reconcile;
pub mod sweep;

pub use probe::{LivenessProbe, PingProbe, ProbeOutcome, TcpConnectProbe, DEFAULT_PROBE_TIMEOUT_MS};
pub use reconcile::{
    parse_port_number, MacTableClient, PortDetail, PortOutcome, ReconcileError, ReconcileReport,
    ReconcileSettings, Reconciler, DEFAULT_EXCLUDED_MODELS, DEFAULT_IGNORED_PREFIXES,
    DEFAULT_INTERFACE_PREFIX,
};
pub use sweep::{next_liveness, SweepReport, Sweeper};
