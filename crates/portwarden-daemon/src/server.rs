//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api;
use crate::state::AppState;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/inventory", get(api::get_inventory))
        .route("/api/sweep", post(api::trigger_sweep))
        .route("/api/devices", post(api::create_device))
        .route("/api/devices/unlinked", get(api::unlinked_devices))
        .route("/api/switches", post(api::create_switch))
        .route("/api/switches/available-ports", get(api::available_ports))
        .route("/api/switches/{id}/reconcile", post(api::reconcile_switch))
        .route("/api/switches/{id}/ports/{number}", post(api::link_switch_port))
        .route("/api/patchpanels", post(api::create_patch_panel))
        .route("/api/patchpanels/{id}/ports/{number}", post(api::link_patch_panel_port))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Sweep every `interval` until the process exits
fn spawn_periodic_sweep(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = state.sweeper.sweep().await {
                error!(error = %e, "Periodic sweep failed");
            }
        }
    });
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let interval_secs = state.config.sweep.interval_secs;
    if interval_secs > 0 {
        info!(interval_secs, "Periodic liveness sweep enabled");
        spawn_periodic_sweep(state.clone(), Duration::from_secs(interval_secs));
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
