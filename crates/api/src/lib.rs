//! HTTP/WebSocket surface for the gateway: the axum router, the
//! WebSocket connection handler, and the REST endpoints that wrap
//! `gateway-hub` and `gateway-reservations`.

pub mod openapi;
pub mod routes;
pub mod server;
pub mod types;
pub mod ws;

pub use server::{AppState, GatewayServer};
