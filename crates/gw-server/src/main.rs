//! Gateway server binary: C2 (container pool), C3-client (session/target
//! stores), C4 (session lifecycle manager), C5 (browser-facing WebSocket
//! endpoint) and pool administration, plus C8 (health monitor). Grounded on
//! `portal/backend/src/main.rs`'s `AppState`/`Router`/`tracing_subscriber`
//! wiring; the second half of the two-process topology spec §2 describes is
//! the sibling `gw-vnc-gateway` binary.

use std::sync::Arc;

use gw_common::Config;
use gw_gateway::AppState;
use gw_health::{HealthMonitor, HealthMonitorConfig};
use gw_pool::{ContainerPool, PoolConfig};
use gw_sessions::{InMemorySessionStore, InMemoryTargetStore, SessionManager, SessionManagerConfig};
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

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        orchestrator = ?config.orchestrator,
        namespace = %config.kubernetes_namespace,
        "starting gateway server"
    );

    let orchestrator = gw_orchestrator::build(&config).await?;

    let pool = Arc::new(ContainerPool::new(
        orchestrator.clone(),
        PoolConfig {
            service_mapping: config.service_mapping.clone(),
            ..PoolConfig::default()
        },
    ));

    // The relational session/target store (C3) is out of this crate's
    // scope (spec §1); these in-memory stores stand in for it the way
    // `gw_sessions::store`'s own doc comment describes. A production
    // deployment swaps these for a client of the shared database.
    let session_store: Arc<dyn gw_sessions::SessionStore> =
        Arc::new(InMemorySessionStore::default());
    let target_store: Arc<dyn gw_sessions::TargetStore> = Arc::new(InMemoryTargetStore::default());

    let sessions = Arc::new(SessionManager::new(
        session_store,
        pool.clone(),
        orchestrator.clone(),
        SessionManagerConfig::default(),
    ));

    let monitor = Arc::new(HealthMonitor::new(
        pool.clone(),
        sessions.clone(),
        None,
        HealthMonitorConfig {
            log_retention_days: config.log_retention_days,
            ..HealthMonitorConfig::default()
        },
    ));
    let monitor_handles = monitor.spawn();

    let state = AppState {
        sessions,
        pool: pool.clone(),
        targets: target_store,
        config: config.clone(),
        vnc_gateway_url: config.vnc_gateway_url.clone(),
    };
    let app = gw_gateway::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "gateway server listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    serve.await?;

    tracing::info!("shutting down: releasing all pool allocations");
    for handle in monitor_handles {
        handle.abort();
    }
    let released = pool.shutdown();
    tracing::info!(released, "gateway server shutdown complete");

    Ok(())
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
