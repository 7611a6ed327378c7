//! Shared VNC gateway (C6) and RFB bridge (C7): receives WebSocket legs
//! forwarded from `gw-gateway`'s browser-facing endpoint, tagged with target
//! coordinates via headers, and either spawns/reuses a generic
//! WebSocket-to-TCP bridge or opens a direct WebSocket client to a cluster
//! VM's VNC sub-resource. Grounded on
//! `infra/.../proxy.py::start_websockify`/`handle_websocket`/`handle_kubevirt_vnc`,
//! generalized from the reference's single-process `aiohttp` app into a
//! standalone axum service (`gw-vnc-gateway`, the bin that wires this crate
//! up) plus the in-process bridge table below.

pub mod bridge;
pub mod copy;
pub mod gateway;
pub mod kubevirt;

pub use bridge::{BridgeTable, GenericBridgeConfig};
pub use gateway::{build_router, GatewayState};
pub use kubevirt::KubevirtConfig;
