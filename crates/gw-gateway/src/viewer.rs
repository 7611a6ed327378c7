//! Viewer asset proxy: forwards the noVNC static assets a session's browser
//! page loads alongside the WebSocket connection (SPEC_FULL.md §10
//! supplemented feature (a), sourced from `routes/vnc.py::proxy_novnc_asset`).
//! Out of the `legacy-use` backend's own scope, but present in
//! `original_source/` and needed for the viewer page to render at all, so it
//! is carried here rather than left for a separate static file server.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::app::AppState;

/// Proxies `GET /vnc/{session_id}/{*path}` to the configured noVNC static
/// file host, used for everything under a session's viewer page besides the
/// WebSocket upgrade itself.
pub async fn proxy_asset(
    Path((session_id, path)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let Some(session) = state.sessions.get(&session_id).await else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    if session.state.is_terminal() {
        return (StatusCode::GONE, "session no longer active").into_response();
    }

    let upstream = format!(
        "http://{}:{}/{path}",
        state.config.novnc_proxy_host, state.config.novnc_proxy_port
    );
    let uri: Uri = match upstream.parse() {
        Ok(u) => u,
        Err(e) => {
            warn!(session_id, error = %e, "invalid noVNC asset URL");
            return (StatusCode::BAD_GATEWAY, "invalid upstream asset URL").into_response();
        }
    };

    match reqwest::get(uri.to_string()).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let bytes = resp.bytes().await.unwrap_or_default();
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
            if let Some(ct) = content_type {
                builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            warn!(session_id, path, error = %e, "failed to fetch noVNC asset");
            (StatusCode::BAD_GATEWAY, "upstream asset fetch failed").into_response()
        }
    }
}
