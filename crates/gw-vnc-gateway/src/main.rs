//! Shared VNC gateway binary (C6 + C7): the standalone process the
//! `gw-server` binary forwards session-scoped browser WebSocket legs to, per
//! spec §2's two-process topology. Grounded on `portal/backend/src/main.rs`'s
//! `tracing_subscriber`/`axum::serve` wiring, with the generic bridge table
//! and KubeVirt VM path from `gw-vnc-bridge` standing in for `portal-api`'s
//! own route set.

use std::net::SocketAddr;

use gw_common::Config;
use gw_vnc_bridge::{GatewayState, GenericBridgeConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    warn_if_untrusted_bind(&config);

    let bridge_config = GenericBridgeConfig {
        websockify_bin: std::env::var("GW_WEBSOCKIFY_BIN")
            .unwrap_or_else(|_| "websockify".to_string()),
        web_root: std::env::var("GW_BRIDGE_WEB_ROOT").ok(),
        ..GenericBridgeConfig::default()
    };

    let state = GatewayState::new(bridge_config, config.kubernetes_namespace.clone());
    let app = gw_vnc_bridge::build_router(state.clone());

    let addr: SocketAddr = config.vnc_gateway_bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "shared VNC gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down: terminating all bridges");
    let terminated = state.bridges.shutdown().await;
    tracing::info!(terminated, "shared VNC gateway shutdown complete");

    Ok(())
}

/// Spec §9 open question (c): `/websockify` is not independently
/// authenticated, so the safe default is loopback/cluster-internal binding.
/// A non-local bind without the explicit opt-in is a misconfiguration
/// worth a loud warning rather than a silent accept.
fn warn_if_untrusted_bind(config: &Config) {
    let is_loopback = config
        .vnc_gateway_bind_addr
        .split(':')
        .next()
        .map(|host| host == "127.0.0.1" || host == "localhost" || host == "::1")
        .unwrap_or(false);

    if !is_loopback && !config.internal_network_trusted {
        tracing::warn!(
            bind_addr = %config.vnc_gateway_bind_addr,
            "binding the shared VNC gateway to a non-loopback address without \
             GW_INTERNAL_NETWORK_TRUSTED=1; this endpoint has no authentication \
             of its own and must stay on a trusted network"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
