use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use gateway_hub::Hub;
use gateway_reservations::ReservationEngine;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub reservations: Arc<ReservationEngine>,
    pub heartbeat_interval_ms: u64,
}

pub struct GatewayServer {
    state: AppState,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl GatewayServer {
    pub fn new(hub: Arc<Hub>, reservations: Arc<ReservationEngine>, heartbeat_interval: Duration, heartbeat_timeout: Duration) -> Self {
        let heartbeat_interval_ms = heartbeat_interval.as_millis() as u64;
        Self { state: AppState { hub, reservations, heartbeat_interval_ms }, heartbeat_interval, heartbeat_timeout }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(crate::ws::ws_upgrade))
            .route("/health", get(crate::routes::health::health))
            .route("/reservations", post(crate::routes::reservations::acquire))
            .route("/reservations/:id", axum::routing::delete(crate::routes::reservations::release))
            .route("/reservations/conflicts", get(crate::routes::reservations::list_conflicts))
            .route("/reservations/conflicts/:id/resolve", post(crate::routes::reservations::resolve_conflict))
            .route("/admin/maintenance/enter", post(crate::routes::admin::enter_maintenance))
            .route("/admin/maintenance/drain", post(crate::routes::admin::start_draining))
            .route("/admin/maintenance/exit", post(crate::routes::admin::exit_maintenance))
            .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/api-doc/openapi.json", crate::openapi::ApiDoc::openapi()))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Starts the background heartbeat sweep and binds the HTTP/WS listener.
    pub async fn run(self, addr: &str) -> Result<()> {
        let connections = self.state.hub.connections_handle();
        gateway_hub::heartbeat::spawn_heartbeat_task(connections, self.heartbeat_interval, self.heartbeat_timeout);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "gateway server listening");
        axum::serve(listener, router).await?;
        Ok(())
    }
}
