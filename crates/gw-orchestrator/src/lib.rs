//! Orchestrator adapter (C1): a uniform async view over either a container
//! engine or a Kubernetes cluster, behind a single trait so the rest of the
//! workspace never branches on which backend is in play.

pub mod docker;
pub mod kubernetes;
mod traits;

pub use traits::Orchestrator;

use gw_common::config::{Config, OrchestratorKind};
use std::sync::Arc;

/// Builds the configured backend behind a single trait object, the way
/// `sase-orchestrator::provider::CloudProvider` exposes one closed variant
/// set behind uniform methods rather than letting callers match on it.
pub async fn build(config: &Config) -> anyhow::Result<Arc<dyn Orchestrator>> {
    match config.orchestrator {
        OrchestratorKind::Docker => {
            let backend = docker::DockerOrchestrator::new().await?;
            Ok(Arc::new(backend))
        }
        OrchestratorKind::Kubernetes => {
            let backend =
                kubernetes::KubernetesOrchestrator::new(config.kubernetes_namespace.clone())
                    .await?;
            Ok(Arc::new(backend))
        }
    }
}
