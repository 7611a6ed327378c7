//! Gateway server process wiring (C2-client, C3-client, C4-client, C5,
//! pool administration). Grounded on `portal/backend/src/main.rs`'s
//! `AppState` + `Router` shape.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use gw_common::Config;
use gw_pool::ContainerPool;
use gw_sessions::{SessionManager, TargetStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<ContainerPool>,
    pub targets: Arc<dyn TargetStore>,
    pub config: Arc<Config>,
    /// Base `ws://host:port` of the shared VNC gateway (C6) this server
    /// forwards browser legs to.
    pub vnc_gateway_url: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/init-status", get(crate::admin::init_status))
        .route("/vnc/:session_id/websockify", get(crate::ws::vnc_websocket))
        .route("/vnc/:session_id/*path", get(crate::viewer::proxy_asset))
        .merge(crate::admin::router())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "database": "connected" }))
}
