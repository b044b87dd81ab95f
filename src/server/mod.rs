//! C7 — the HTTP/WS surface: REST endpoints that read from C4/C5, and the
//! `/ws` upgrade that hands a client off to the broadcaster (C6).
//!
//! Every handler here is a thin delegate onto shared state: one handler,
//! one state read, no business logic of its own.

pub mod rest;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::core::broadcaster::Broadcaster;
use crate::core::ip_cache::IpInfoCache;
use crate::core::store::LiveStore;
use crate::db::Database;

/// Shared state reachable from every handler. Cheap to clone (every field is
/// already `Arc`-backed or a small `Clone` type).
///
/// No `ProcessTracker` here: process attribution happens entirely inside the
/// capture loop (`lib.rs::run_capture_loop`), which holds its own `Arc`; no
/// REST or WS handler needs live process/port data.
pub struct AppState {
    pub store: Arc<LiveStore>,
    pub db: Arc<Database>,
    pub ip_cache: IpInfoCache,
    pub broadcaster: Arc<Broadcaster>,
    pub interface: String,
}

/// Builds the full Axum router: the 8 REST endpoints of §6 plus `/ws`, with
/// CORS allow-all applied to every GET (§6 "CORS allow-all on all GETs").
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/packets", get(rest::get_packets))
        .route("/api/stats", get(rest::get_stats))
        .route("/api/connections", get(rest::get_connections))
        .route("/api/interfaces", get(rest::get_interfaces))
        .route("/api/database", get(rest::get_database))
        .route("/api/history", get(rest::get_history))
        .route("/api/history/stats", get(rest::get_history_stats))
        .route("/api/countries", get(rest::get_countries))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves the router until the process is terminated.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP/WS surface listening on {addr}");
    axum::serve(listener, app).await
}
