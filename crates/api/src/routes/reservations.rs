//! Reservation and conflict REST surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gateway_common::ApiErrorEnvelope;
use gateway_reservations::{ConflictStatus, ReleaseCause, ReservationError, ReservationMode};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use utoipa::{IntoParams, ToSchema};

use crate::server::AppState;
use crate::types::Envelope;

type ErrorResponse = (StatusCode, Json<ApiErrorEnvelope>);

fn error_response(err: &ReservationError) -> ErrorResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut envelope = ApiErrorEnvelope::new(err.code(), err.to_string());
    if let ReservationError::Conflict { conflict_id, .. } = err {
        envelope = envelope.with_details(serde_json::json!({ "conflictId": conflict_id }));
    }
    (status, Json(envelope))
}

/// Request-side mirror of `ReservationMode` so this crate can derive
/// `ToSchema` without adding utoipa to `gateway-reservations`.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReservationModeDto {
    Exclusive,
    Shared,
}

impl From<ReservationModeDto> for ReservationMode {
    fn from(dto: ReservationModeDto) -> Self {
        match dto {
            ReservationModeDto::Exclusive => ReservationMode::Exclusive,
            ReservationModeDto::Shared => ReservationMode::Shared,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcquireRequest {
    pub project_id: String,
    pub agent_id: String,
    pub patterns: Vec<String>,
    pub mode: ReservationModeDto,
    pub ttl_secs: Option<u64>,
}

#[utoipa::path(
    post,
    path = "/reservations",
    request_body = AcquireRequest,
    responses(
        (status = 201, description = "Reservation acquired"),
        (status = 409, description = "Overlaps an active exclusive reservation"),
    ),
    tag = "reservations",
)]
#[instrument(skip(state), fields(project_id = %req.project_id, agent_id = %req.agent_id))]
pub async fn acquire(
    State(state): State<AppState>,
    Json(req): Json<AcquireRequest>,
) -> Result<(StatusCode, Json<Envelope<serde_json::Value>>), ErrorResponse> {
    match state
        .reservations
        .acquire(&req.project_id, &req.agent_id, req.patterns, req.mode.into(), req.ttl_secs)
        .await
    {
        Ok(reservation) => {
            info!(reservation_id = %reservation.id, "reservation acquired");
            let value = serde_json::to_value(&reservation).unwrap_or_default();
            Ok((StatusCode::CREATED, Json(Envelope::new("reservation", value))))
        }
        Err(e) => {
            warn!(error = %e, "reservation acquire refused");
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    responses((status = 200, description = "Reservation released"), (status = 404, description = "Not found")),
    tag = "reservations",
)]
pub async fn release(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<serde_json::Value>>, ErrorResponse> {
    match state.reservations.release(id, ReleaseCause::Explicit).await {
        Ok(reservation) => {
            let value = serde_json::to_value(&reservation).unwrap_or_default();
            Ok(Json(Envelope::new("reservation", value)))
        }
        Err(e) => Err(error_response(&e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    pub project_id: String,
    pub status: Option<String>,
}

#[utoipa::path(
    get,
    path = "/reservations/conflicts",
    params(ConflictQuery),
    responses((status = 200, description = "Conflicts for a project")),
    tag = "reservations",
)]
pub async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> Json<Envelope<serde_json::Value>> {
    let status = match query.status.as_deref() {
        Some("open") => Some(ConflictStatus::Open),
        Some("resolved") => Some(ConflictStatus::Resolved),
        _ => None,
    };
    let conflicts = state.reservations.list_conflicts(&query.project_id, status).await;
    let value = serde_json::to_value(&conflicts).unwrap_or_default();
    Json(Envelope::new("conflict_list", value))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub resolved_by: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictQuery {
    pub project_id: String,
}

#[utoipa::path(
    post,
    path = "/reservations/conflicts/{id}/resolve",
    params(ResolveConflictQuery),
    request_body = ResolveConflictRequest,
    responses((status = 200, description = "Conflict resolved"), (status = 404, description = "Not found")),
    tag = "reservations",
)]
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResolveConflictQuery>,
    Json(req): Json<ResolveConflictRequest>,
) -> Result<Json<Envelope<serde_json::Value>>, ErrorResponse> {
    match state.reservations.resolve_conflict(&query.project_id, id, &req.resolved_by, req.reason).await {
        Ok(conflict) => {
            let value = serde_json::to_value(&conflict).unwrap_or_default();
            Ok(Json(Envelope::new("conflict", value)))
        }
        Err(e) => Err(error_response(&e)),
    }
}
