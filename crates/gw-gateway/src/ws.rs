//! Gateway WebSocket endpoint (C5): validates the session, rewrites pod IPs
//! to stable service names, and forwards the browser's WebSocket leg to the
//! shared VNC gateway (C6). Grounded on `routes/vnc.py::proxy_vnc_websocket`.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use gw_common::types::{Session, SessionState};
use gw_vnc_bridge::copy::pump_bidirectional;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{error, info, warn};

use crate::app::AppState;

pub async fn vnc_websocket(
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.protocols(["binary"])
        .on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: String) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let Some(session) = state.sessions.get(&session_id).await else {
        warn!(session_id, "websocket connect for unknown session");
        close_with(socket, 1008, "session not found".to_string()).await;
        return;
    };

    if session.state != SessionState::Ready && session.state != SessionState::Active {
        warn!(session_id, state = ?session.state, "websocket connect for session not ready");
        close_with(socket, 1008, format!("session not ready: {:?}", session.state)).await;
        return;
    }

    let Some((target_host, target_port)) = resolve_target(&state, &session).await else {
        error!(session_id, "session has no network coordinates");
        close_with(socket, 1008, "session not ready: missing coordinates".to_string()).await;
        return;
    };

    let _ = state.sessions.mark_active(&session_id).await;

    let mut request = match state.vnc_gateway_url.clone().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            error!(session_id, error = %e, "failed to build request to shared VNC gateway");
            close_with(socket, 1011, "gateway misconfigured".to_string()).await;
            return;
        }
    };

    let headers = request.headers_mut();
    headers.insert("x-session-id", HeaderValue::from_str(&session_id).unwrap());
    headers.insert("x-target-host", HeaderValue::from_str(&target_host).unwrap());
    headers.insert(
        "x-target-port",
        HeaderValue::from_str(&target_port.to_string()).unwrap(),
    );
    if session.is_vm() {
        if let Some(container_id) = &session.container_id {
            headers.insert("x-vmi-name", HeaderValue::from_str(container_id).unwrap());
        }
        headers.insert(
            "x-namespace",
            HeaderValue::from_str(&state.config.kubernetes_namespace).unwrap(),
        );
    }

    let upstream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!(session_id, error = %e, "failed to reach shared VNC gateway");
            close_with(socket, 1011, "upstream unreachable".to_string()).await;
            return;
        }
    };

    info!(session_id, target_host, target_port, "browser VNC proxy established");
    let _ = pump_bidirectional(socket, upstream).await;
}

/// Resolves `(host, port)` for the outbound leg, rewriting pod IPs to a
/// stable service name per spec §4.4 step 2.
async fn resolve_target(state: &AppState, session: &Session) -> Option<(String, u16)> {
    let ip = session.container_ip.as_ref()?;
    let port = session.vnc_port?;

    if session.is_vm() {
        return Some((ip.clone(), port));
    }

    if !state.config.is_pod_ip(ip) {
        return Some((ip.clone(), port));
    }

    let target = state.targets.get(&session.target_id).await?;
    let service_name = state.config.service_mapping.service_name_for(&target.target_type);
    Some((service_name, port))
}

#[cfg(test)]
mod tests {
    use gw_common::config::ServiceMapping;
    use gw_common::Config;

    #[test]
    fn pod_ip_rewrite_is_idempotent_for_non_pod_range() {
        let config = Config {
            legacy_use_url: None,
            api_key: None,
            orchestrator: gw_common::config::OrchestratorKind::Docker,
            kubernetes_namespace: "legacy-use".to_string(),
            novnc_proxy_host: "127.0.0.1".to_string(),
            novnc_proxy_port: 6080,
            log_retention_days: 7,
            pod_ip_cidr: "10.244.0.0/16".to_string(),
            service_mapping: ServiceMapping::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
            internal_network_trusted: false,
            vnc_gateway_url: "ws://127.0.0.1:6090/websockify".to_string(),
            vnc_gateway_bind_addr: "127.0.0.1:6090".to_string(),
        };
        assert!(!config.is_pod_ip("192.168.1.5"));
    }
}
