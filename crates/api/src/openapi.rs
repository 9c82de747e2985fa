//! OpenAPI specification for the gateway's REST surface. WebSocket
//! framing is documented in `ws.rs`'s doc comments, not here -
//! utoipa has no vocabulary for a socket protocol.

use utoipa::OpenApi;

use crate::routes::admin::{EnterMaintenanceRequest, StartDrainingRequest};
use crate::routes::health::HealthResponse;
use crate::routes::reservations::{AcquireRequest, ReservationModeDto, ResolveConflictRequest};

#[derive(utoipa::OpenApi)]
#[openapi(
    info(
        title = "Realtime Orchestration Gateway API",
        description = "REST surface for the gateway's reservation and conflict endpoints, plus liveness. The WebSocket delivery fabric itself is reachable at `/ws`.",
        version = "0.1.0",
    ),
    paths(
        crate::routes::health::health,
        crate::routes::reservations::acquire,
        crate::routes::reservations::release,
        crate::routes::reservations::list_conflicts,
        crate::routes::reservations::resolve_conflict,
        crate::routes::admin::enter_maintenance,
        crate::routes::admin::start_draining,
        crate::routes::admin::exit_maintenance,
    ),
    components(schemas(
        HealthResponse,
        AcquireRequest,
        ReservationModeDto,
        ResolveConflictRequest,
        EnterMaintenanceRequest,
        StartDrainingRequest,
    )),
    tags(
        (name = "system", description = "Liveness and maintenance state"),
        (name = "reservations", description = "File reservations and conflict resolution"),
        (name = "admin", description = "Maintenance lifecycle control"),
    )
)]
pub struct ApiDoc;
