//! Concurrent liveness sweep over the whole inventory
//!
//! Every device and switch with an address is probed at once; the resulting
//! `active`/`show` changes are committed as a single batch of field-level
//! edits. A probe that fails or times out only clears `active`: `show` is
//! never lowered for an addressed entity.

use chrono::{DateTime, Utc};
use portwarden_core::{
    Batch, DeviceFilter, DeviceId, InventoryStore, Liveness, LivenessChange, StoreError, SwitchId,
    Update,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::probe::{LivenessProbe, ProbeOutcome, DEFAULT_PROBE_TIMEOUT_MS};

/// Counts for one sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub unaddressed: usize,
    pub active_changed: usize,
    pub show_changed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Device(DeviceId),
    Switch(SwitchId),
}

impl Target {
    fn update(self, change: LivenessChange) -> Update {
        match self {
            Self::Device(device) => Update::DeviceLiveness { device, change },
            Self::Switch(switch) => Update::SwitchLiveness { switch, change },
        }
    }
}

/// New liveness for an entity; `None` means it has no address.
pub fn next_liveness(current: Liveness, outcome: Option<ProbeOutcome>) -> Liveness {
    match outcome {
        None => Liveness::new(false, false),
        Some(ProbeOutcome::Alive) => Liveness::new(true, true),
        Some(ProbeOutcome::Down | ProbeOutcome::TimedOut) => Liveness::new(false, current.show),
    }
}

pub struct Sweeper {
    store: Arc<dyn InventoryStore>,
    probe: Arc<dyn LivenessProbe>,
    probe_timeout: Duration,
    running: Mutex<()>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn InventoryStore>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            store,
            probe,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            running: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Probe everything, then commit the changes in one batch.
    ///
    /// Sweeps run one at a time; a second caller waits and then reads fresh
    /// state. Dropping the returned future aborts in-flight probes and
    /// commits nothing.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let _running = self.running.lock().await;
        let started_at = Utc::now();

        let devices = self.store.list_devices(&DeviceFilter::all()).await?;
        let switches = self.store.list_switches().await?;

        let mut entities: Vec<(Target, Liveness, Option<String>)> = devices
            .iter()
            .map(|d| {
                (
                    Target::Device(d.id),
                    d.liveness,
                    d.probe_address().map(str::to_string),
                )
            })
            .collect();
        entities.extend(switches.iter().map(|s| {
            (
                Target::Switch(s.id),
                s.liveness,
                s.probe_address().map(str::to_string),
            )
        }));

        let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; entities.len()];
        let mut tasks = JoinSet::new();
        for (index, (_, _, address)) in entities.iter().enumerate() {
            let Some(address) = address.clone() else {
                continue;
            };
            let probe = Arc::clone(&self.probe);
            let limit = self.probe_timeout;
            tasks.spawn(async move {
                let outcome = match timeout(limit, probe.probe(&address, limit)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::TimedOut,
                };
                (index, outcome)
            });
        }

        let probed = tasks.len();
        info!(
            probed,
            unaddressed = entities.len() - probed,
            timeout_ms = self.probe_timeout.as_millis() as u64,
            "Liveness sweep started"
        );

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        let mut batch = Batch::new();
        let mut report = SweepReport {
            probed,
            reachable: 0,
            unreachable: 0,
            unaddressed: 0,
            active_changed: 0,
            show_changed: 0,
            started_at,
            finished_at: started_at,
        };

        for ((target, current, address), outcome) in entities.into_iter().zip(outcomes) {
            let outcome = match (&address, outcome) {
                (None, _) => {
                    report.unaddressed += 1;
                    None
                }
                // A panicked probe task counts as down
                (Some(_), None) => Some(ProbeOutcome::Down),
                (Some(_), Some(outcome)) => Some(outcome),
            };
            match outcome {
                Some(ProbeOutcome::Alive) => report.reachable += 1,
                Some(_) => report.unreachable += 1,
                None => {}
            }

            let next = next_liveness(current, outcome);
            if next == current {
                continue;
            }
            if next.active != current.active {
                report.active_changed += 1;
            }
            if next.show != current.show {
                report.show_changed += 1;
            }
            debug!(entity = ?target, address = ?address, ?outcome, ?next, "Liveness changed");

            if address.is_none() {
                batch.push(target.update(LivenessChange::Hide));
                continue;
            }
            if next.active != current.active {
                batch.push(target.update(LivenessChange::SetActive(next.active)));
            }
            if next.show && !current.show {
                batch.push(target.update(LivenessChange::RaiseShow));
            }
        }

        if !batch.is_empty() {
            self.store.apply_batch(batch).await?;
        }

        report.finished_at = Utc::now();
        info!(
            reachable = report.reachable,
            unreachable = report.unreachable,
            unaddressed = report.unaddressed,
            active_changed = report.active_changed,
            show_changed = report.show_changed,
            "Liveness sweep finished"
        );
        Ok(report)
    }
}
