//! Maintenance control surface. Out of scope: authenticating the
//! caller as an operator - like the WS upgrade's `admin` query flag, this
//! stands in for whatever gatekeeping sits in front of the gateway.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::server::AppState;
use crate::types::Envelope;

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnterMaintenanceRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/admin/maintenance/enter",
    request_body = EnterMaintenanceRequest,
    responses((status = 200, description = "Maintenance entered; all connections force-closed")),
    tag = "admin",
)]
#[instrument(skip(state))]
pub async fn enter_maintenance(
    State(state): State<AppState>,
    Json(req): Json<EnterMaintenanceRequest>,
) -> Json<Envelope<serde_json::Value>> {
    let message = state.hub.enter_maintenance(req.reason.as_deref()).await;
    info!("maintenance entered");
    Json(Envelope::new("maintenance_state", serde_json::to_value(&message).unwrap_or_default()))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartDrainingRequest {
    pub deadline_seconds: Option<u64>,
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/admin/maintenance/drain",
    request_body = StartDrainingRequest,
    responses((status = 200, description = "Draining started; all connections force-closed")),
    tag = "admin",
)]
#[instrument(skip(state))]
pub async fn start_draining(
    State(state): State<AppState>,
    Json(req): Json<StartDrainingRequest>,
) -> Json<Envelope<serde_json::Value>> {
    let message = state.hub.start_draining(req.deadline_seconds, req.reason.as_deref()).await;
    info!("draining started");
    Json(Envelope::new("maintenance_state", serde_json::to_value(&message).unwrap_or_default()))
}

#[utoipa::path(
    post,
    path = "/admin/maintenance/exit",
    responses((status = 200, description = "Maintenance/draining exited; back to running")),
    tag = "admin",
)]
#[instrument(skip(state))]
pub async fn exit_maintenance(State(state): State<AppState>) -> Json<Envelope<serde_json::Value>> {
    let message = state.hub.exit_maintenance().await;
    info!("maintenance exited");
    Json(Envelope::new("maintenance_state", serde_json::to_value(&message).unwrap_or_default()))
}
