//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portwarden_core::{
    CableInfo, DeviceId, NewDevice, NewPatchPanel, NewSwitch, PatchLink, PatchPanelId, PortId,
    StoreError, SwitchId, TopologyError,
};
use portwarden_discovery::ReconcileError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn store_error(e: StoreError) -> Response {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_conflict() {
        StatusCode::CONFLICT
    } else if matches!(e, StoreError::Topology(TopologyError::NoPorts)) {
        StatusCode::BAD_REQUEST
    } else {
        error!(error = %e, "Store operation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ApiError::new(e.to_string()))).into_response()
}

/// Full inventory
pub async fn get_inventory(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().await)
}

/// Run a liveness sweep now
pub async fn trigger_sweep(State(state): State<Arc<AppState>>) -> Response {
    info!("Manual liveness sweep requested");
    match state.sweeper.sweep().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => store_error(e),
    }
}

/// Reconcile one switch against its MAC table
pub async fn reconcile_switch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SwitchId>,
) -> Response {
    info!(switch = %id, "Reconciliation requested");
    match state.reconciler.reconcile(id).await {
        Ok(report) => Json(report).into_response(),
        Err(ReconcileError::RemoteUnreachable { switch, reason }) => {
            warn!(switch = %switch, reason = %reason, "Switch unreachable");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiError::new("remote_unreachable").with_detail(reason)),
            )
                .into_response()
        }
        Err(ReconcileError::Store(e)) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct AvailablePortsQuery {
    #[serde(default)]
    floor: Option<i32>,
}

/// Switch ports without a patch panel cable
pub async fn available_ports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailablePortsQuery>,
) -> impl IntoResponse {
    Json(state.store.available_ports(query.floor).await)
}

/// Devices not connected to any port
pub async fn unlinked_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.unlinked_devices().await)
}

#[derive(Deserialize)]
pub struct LinkPortRequest {
    /// Device to connect; null disconnects
    #[serde(default)]
    device_id: Option<DeviceId>,
}

/// Manually set the device on a switch port
pub async fn link_switch_port(
    State(state): State<Arc<AppState>>,
    Path((switch, number)): Path<(SwitchId, u16)>,
    Json(req): Json<LinkPortRequest>,
) -> Response {
    match state.store.link_port_device(switch, number, req.device_id).await {
        Ok(port) => {
            info!(switch = %switch, port = number, device = ?req.device_id, "Switch port updated");
            Json(port).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct PatchPortRequest {
    /// Switch port to cable to; 0 disconnects, absent leaves the link alone
    #[serde(default)]
    switch_port_id: Option<u64>,
    #[serde(default)]
    cable_number: Option<String>,
    #[serde(default)]
    cable_length: Option<String>,
}

/// Update a patch panel port's link and cable metadata
pub async fn link_patch_panel_port(
    State(state): State<Arc<AppState>>,
    Path((panel, number)): Path<(PatchPanelId, u16)>,
    Json(req): Json<PatchPortRequest>,
) -> Response {
    let link = match req.switch_port_id {
        None => PatchLink::Keep,
        Some(0) => PatchLink::Disconnect,
        Some(id) => PatchLink::Connect(PortId(id)),
    };
    let cable = CableInfo {
        cable_number: req.cable_number,
        cable_length: req.cable_length,
    };

    match state.store.link_patch_panel_port(panel, number, link, cable).await {
        Ok(port) => Json(port).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewDevice>,
) -> Response {
    match state.store.create_device(new).await {
        Ok(device) => {
            info!(device = %device.id, name = %device.name, "Device created");
            (StatusCode::CREATED, Json(device)).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn create_switch(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewSwitch>,
) -> Response {
    match state.store.create_switch(new).await {
        Ok(switch) => {
            info!(switch = %switch.id, name = %switch.name, ports = switch.total_ports, "Switch created");
            (StatusCode::CREATED, Json(switch)).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn create_patch_panel(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewPatchPanel>,
) -> Response {
    match state.store.create_patch_panel(new).await {
        Ok(id) => {
            info!(panel = %id, "Patch panel created");
            (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response()
        }
        Err(e) => store_error(e),
    }
}
