//! Shared VNC gateway (C6): the single internal `/websockify` endpoint that
//! every per-session browser leg (forwarded by `gw-gateway`'s C5) lands on.
//! Grounded on `infra/.../proxy.py::handle_websocket`'s header-driven mode
//! dispatch, reimplemented as an axum router instead of `aiohttp`.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::bridge::{BridgeTable, GenericBridgeConfig};
use crate::copy::pump_bidirectional;
use crate::kubevirt::{self, KubevirtConfig};

#[derive(Clone)]
pub struct GatewayState {
    pub bridges: Arc<BridgeTable>,
    pub kubevirt: Arc<RwLock<Option<KubevirtConfig>>>,
    pub default_namespace: String,
}

impl GatewayState {
    pub fn new(bridge_config: GenericBridgeConfig, default_namespace: impl Into<String>) -> Self {
        GatewayState {
            bridges: Arc::new(BridgeTable::new(bridge_config)),
            kubevirt: Arc::new(RwLock::new(None)),
            default_namespace: default_namespace.into(),
        }
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/websockify", get(websockify))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

struct ProxyHeaders {
    session_id: String,
    target_host: String,
    target_port: u16,
    vmi_name: Option<String>,
    namespace: Option<String>,
}

fn parse_headers(headers: &HeaderMap) -> Option<ProxyHeaders> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    Some(ProxyHeaders {
        session_id: get("x-session-id")?,
        target_host: get("x-target-host")?,
        target_port: get("x-target-port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(5900),
        vmi_name: get("x-vmi-name"),
        namespace: get("x-namespace"),
    })
}

async fn websockify(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(parsed) = parse_headers(&headers) else {
        warn!("websockify request missing required headers");
        return ws.on_upgrade(|socket| close_immediately(socket, 1008, "missing required headers"));
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, parsed))
}

async fn close_immediately(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: GatewayState, headers: ProxyHeaders) {
    if headers.vmi_name.is_some() {
        handle_vm(socket, state, headers).await;
    } else {
        handle_generic(socket, state, headers).await;
    }
}

async fn handle_generic(socket: WebSocket, state: GatewayState, headers: ProxyHeaders) {
    let port = match state
        .bridges
        .ensure(&headers.session_id, &headers.target_host, headers.target_port)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            error!(session_id = %headers.session_id, error = %e, "bridge startup failed");
            close_immediately(socket, 1011, "bridge startup failed").await;
            return;
        }
    };

    let local_url = format!("ws://127.0.0.1:{port}/");
    let upstream = match tokio_tungstenite::connect_async(&local_url).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!(session_id = %headers.session_id, error = %e, "failed to connect to local bridge adapter");
            close_immediately(socket, 1011, "upstream unreachable").await;
            state.bridges.terminate(&headers.session_id).await;
            return;
        }
    };

    info!(session_id = %headers.session_id, port, "generic VNC proxy established");
    let _ = pump_bidirectional(socket, upstream).await;
    state.bridges.terminate(&headers.session_id).await;
}

async fn handle_vm(socket: WebSocket, state: GatewayState, headers: ProxyHeaders) {
    let vmi_name = headers.vmi_name.expect("checked by caller");
    let namespace = headers.namespace.unwrap_or_else(|| state.default_namespace.clone());

    let config = {
        let cached = state.kubevirt.read().await;
        cached.clone()
    };
    let config = match config {
        Some(c) => c,
        None => match KubevirtConfig::discover(namespace).await {
            Ok(c) => {
                *state.kubevirt.write().await = Some(c.clone());
                c
            }
            Err(e) => {
                error!(session_id = %headers.session_id, error = %e, "failed to discover cluster credentials");
                close_immediately(socket, 1011, "cluster auth unavailable").await;
                return;
            }
        },
    };

    let upstream = match kubevirt::connect(&config, &vmi_name).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(session_id = %headers.session_id, vmi_name, error = %e, "KubeVirt VNC connect failed");
            close_immediately(socket, 1011, "kubevirt vnc unreachable").await;
            return;
        }
    };

    info!(session_id = %headers.session_id, vmi_name, "KubeVirt VM VNC proxy established");
    let _ = pump_bidirectional(socket, upstream).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parse_headers_defaults_port_when_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("s1"));
        headers.insert("x-target-host", HeaderValue::from_static("10.1.2.3"));
        let parsed = parse_headers(&headers).unwrap();
        assert_eq!(parsed.target_port, 5900);
    }

    #[test]
    fn parse_headers_none_without_session_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-target-host", HeaderValue::from_static("10.1.2.3"));
        assert!(parse_headers(&headers).is_none());
    }

    #[test]
    fn parse_headers_detects_vm_path() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("s1"));
        headers.insert("x-target-host", HeaderValue::from_static("kubevirt-vm"));
        headers.insert("x-vmi-name", HeaderValue::from_static("winxp-7bf"));
        headers.insert("x-namespace", HeaderValue::from_static("legacy-use"));
        let parsed = parse_headers(&headers).unwrap();
        assert_eq!(parsed.vmi_name.as_deref(), Some("winxp-7bf"));
        assert_eq!(parsed.namespace.as_deref(), Some("legacy-use"));
    }
}
