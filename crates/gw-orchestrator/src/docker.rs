use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::Docker;
use gw_common::types::{Workload, WorkloadStatus};
use tracing::{debug, error, info, warn};

use crate::traits::Orchestrator;

/// `stable service name (spec §6) -> compose service name`, mirrors
/// `docker_orchestrator.py::SERVICE_MAPPING`. Keyed by the same stable
/// names `gw_common::config::ServiceMapping` hands out, so a scale request
/// for a given target type resolves to the same compose service regardless
/// of which caller built the service name.
const SERVICE_MAPPING: &[(&str, &str)] = &[
    ("legacy-use-linux-target", "linux-machine"),
    ("legacy-use-wine-target", "wine-target"),
    ("legacy-use-android-target", "android-target"),
    ("legacy-use-android-aind-target", "android-aind-target"),
    ("legacy-use-dosbox-target", "dosbox-target"),
    ("legacy-use-windows-kubevirt", "windows-target"),
];

/// Container-engine backend of the orchestrator adapter. Talks to the
/// Docker Engine API via `bollard` rather than shelling out to the `docker`
/// CLI, an intentional upgrade over `docker_orchestrator.py`'s
/// `docker ps`/`docker inspect` approach (see DESIGN.md).
pub struct DockerOrchestrator {
    client: Docker,
    compose_project: String,
}

impl DockerOrchestrator {
    pub async fn new() -> anyhow::Result<Self> {
        let client = Docker::connect_with_local_defaults()?;
        client.ping().await?;
        Ok(DockerOrchestrator {
            client,
            compose_project: std::env::var("COMPOSE_PROJECT_NAME")
                .unwrap_or_else(|_| "legacy-use".to_string()),
        })
    }

    fn service_name_to_compose_service(service_name: &str) -> Option<&'static str> {
        SERVICE_MAPPING
            .iter()
            .find(|(stable, _)| *stable == service_name)
            .map(|(_, compose)| *compose)
    }
}

#[async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn list_containers(&self, label_filters: Option<HashMap<String, String>>) -> Vec<Workload> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(labels) = &label_filters {
            let specs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            if !specs.is_empty() {
                filters.insert("label".to_string(), specs);
            }
        }

        let summaries = match self
            .client
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list containers");
                return Vec::new();
            }
        };

        let mut workloads = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id.clone() else { continue };
            let inspect = match self
                .client
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
            {
                Ok(i) => i,
                Err(e) => {
                    warn!(container_id = %id, error = %e, "failed to inspect container");
                    continue;
                }
            };

            let name = summary
                .names
                .and_then(|n| n.first().cloned())
                .unwrap_or_else(|| id.clone())
                .trim_start_matches('/')
                .to_string();

            let labels: HashMap<String, String> = summary.labels.unwrap_or_default();

            let ip = inspect
                .network_settings
                .as_ref()
                .and_then(|ns| ns.networks.as_ref())
                .and_then(|nets| nets.values().next())
                .and_then(|n| n.ip_address.clone())
                .filter(|ip| !ip.is_empty());

            let mut ports = HashMap::new();
            if let Some(port_list) = inspect.network_settings.and_then(|ns| ns.ports) {
                for (container_port, bindings) in port_list {
                    if let Some(host_port) = bindings
                        .and_then(|b| b.into_iter().next())
                        .and_then(|b| b.host_port)
                    {
                        ports.insert(container_port, host_port);
                    }
                }
            }

            let status = match summary.state.as_deref() {
                Some("running") => WorkloadStatus::Running,
                Some("created") | Some("restarting") => WorkloadStatus::Pending,
                Some(_) => WorkloadStatus::Unhealthy,
                None => WorkloadStatus::Unknown,
            };

            workloads.push(Workload {
                id,
                name,
                labels,
                status,
                ip,
                ports,
            });
        }
        workloads
    }

    async fn get_container(&self, id: &str) -> Option<Workload> {
        let inspect = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .ok()?;

        let name = inspect
            .name
            .clone()
            .unwrap_or_else(|| id.to_string())
            .trim_start_matches('/')
            .to_string();

        let labels = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        let ip = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.networks.as_ref())
            .and_then(|nets| nets.values().next())
            .and_then(|n| n.ip_address.clone())
            .filter(|ip| !ip.is_empty());

        let status = match inspect.state.as_ref().and_then(|s| s.status) {
            Some(bollard::models::ContainerStateStatusEnum::RUNNING) => WorkloadStatus::Running,
            Some(bollard::models::ContainerStateStatusEnum::CREATED)
            | Some(bollard::models::ContainerStateStatusEnum::RESTARTING) => WorkloadStatus::Pending,
            Some(_) => WorkloadStatus::Unhealthy,
            None => WorkloadStatus::Unknown,
        };

        Some(Workload {
            id: id.to_string(),
            name,
            labels,
            status,
            ip,
            ports: HashMap::new(),
        })
    }

    async fn scale_service(&self, service_name: &str, replicas: u32) -> bool {
        let Some(compose_service) = Self::service_name_to_compose_service(service_name) else {
            warn!(service_name, "no compose service mapping for scale request");
            return false;
        };

        // Mirrors `docker_orchestrator.py::scale_service`, which shells out to
        // `docker-compose ... up -d --scale <svc>=<n> --no-recreate`: there is
        // no bollard equivalent of compose scaling, so this remains a
        // subprocess call, same as the reference implementation.
        let status = tokio::process::Command::new("docker-compose")
            .args([
                "--project-name",
                &self.compose_project,
                "up",
                "-d",
                "--scale",
                &format!("{compose_service}={replicas}"),
                "--no-recreate",
                compose_service,
            ])
            .status()
            .await;

        match status {
            Ok(s) if s.success() => {
                info!(compose_service, replicas, "scaled compose service");
                true
            }
            Ok(s) => {
                error!(compose_service, code = ?s.code(), "docker-compose scale failed");
                false
            }
            Err(e) => {
                error!(error = %e, "failed to invoke docker-compose");
                false
            }
        }
    }

    async fn check_health(&self, id: &str, health_check_url: &str) -> bool {
        let Some(workload) = self.get_container(id).await else {
            return false;
        };
        let Some(url) = workload.management_url(health_check_url) else {
            return false;
        };
        let client = match reqwest::Client::builder().timeout(Duration::from_secs(2)).build() {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to build health-check client");
                return false;
            }
        };
        match client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(container_id = id, error = %e, "health check failed");
                false
            }
        }
    }
}
