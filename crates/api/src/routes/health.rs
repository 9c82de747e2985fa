use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub maintenance_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Gateway liveness and maintenance state", body = HealthResponse)),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let maintenance_state = match state.hub.maintenance.state() {
        gateway_hub::MaintenanceState::Running => "running",
        gateway_hub::MaintenanceState::Maintenance => "maintenance",
        gateway_hub::MaintenanceState::Draining => "draining",
    };
    let retry_after_seconds = state.hub.maintenance.retry_after_seconds();
    Json(HealthResponse { status: "ok", maintenance_state, retry_after_seconds })
}
