//! REST-level coverage for the reservation/conflict surface: two agents
//! racing for an overlapping exclusive reservation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway_api::{AppState, GatewayServer};
use gateway_common::{GatewayConfig, NoAgentAccess};
use gateway_hub::{Hub, NullEventLog};
use gateway_reservations::{NoopPublisher, ReservationEngine};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_app() -> axum::Router {
    let mut config = GatewayConfig::default();
    config.event_log.enabled = false;
    let hub = Arc::new(Hub::new(config, Arc::new(NullEventLog), Arc::new(NoAgentAccess)));
    let reservations = Arc::new(ReservationEngine::new(Arc::new(NoopPublisher), 3600));
    let server = GatewayServer::new(hub, reservations, std::time::Duration::from_secs(30), std::time::Duration::from_secs(75));
    server.router()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_running_state() {
    let app = test_app();
    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["maintenance_state"], "running");
}

#[tokio::test]
async fn acquire_then_conflicting_acquire_returns_409_with_conflict_id() {
    let app = test_app();

    let first = app
        .clone()
        .oneshot(post_json(
            "/reservations",
            json!({
                "projectId": "proj-1",
                "agentId": "agent-a",
                "patterns": ["src/**/*.rs"],
                "mode": "exclusive",
                "ttlSecs": 60,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(post_json(
            "/reservations",
            json!({
                "projectId": "proj-1",
                "agentId": "agent-b",
                "patterns": ["src/lib.rs"],
                "mode": "exclusive",
                "ttlSecs": 60,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["error"]["code"], "RESERVATION_CONFLICT");
    assert!(body["error"]["details"]["conflictId"].is_string());
}

#[tokio::test]
async fn release_then_reacquire_succeeds() {
    let app = test_app();

    let acquired = app
        .clone()
        .oneshot(post_json(
            "/reservations",
            json!({
                "projectId": "proj-2",
                "agentId": "agent-a",
                "patterns": ["src/**/*.rs"],
                "mode": "exclusive",
                "ttlSecs": 60,
            }),
        ))
        .await
        .unwrap();
    let body = body_json(acquired).await;
    let reservation_id = body["data"]["id"].as_str().unwrap().to_string();

    let released = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(format!("/reservations/{reservation_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(released.status(), StatusCode::OK);

    let reacquired = app
        .oneshot(post_json(
            "/reservations",
            json!({
                "projectId": "proj-2",
                "agentId": "agent-b",
                "patterns": ["src/**/*.rs"],
                "mode": "exclusive",
                "ttlSecs": 60,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(reacquired.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn entering_maintenance_flips_health_state() {
    let app = test_app();

    let entered = app
        .clone()
        .oneshot(post_json("/admin/maintenance/enter", json!({ "reason": "deploy" })))
        .await
        .unwrap();
    assert_eq!(entered.status(), StatusCode::OK);
    let body = body_json(entered).await;
    assert_eq!(body["data"]["payload"]["mode"], "maintenance");

    let health = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    let body = body_json(health).await;
    assert_eq!(body["maintenance_state"], "maintenance");
}
