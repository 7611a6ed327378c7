use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gw_common::types::{Workload, WorkloadStatus};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, Config as KubeConfig};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::traits::Orchestrator;

/// `target_type -> (service name, deployment/statefulset/vmirs name)`,
/// mirrors `kubernetes_orchestrator.py::SERVICE_MAPPING`/`DEPLOYMENT_MAPPING`.
const SERVICE_MAPPING: &[(&str, &str, &str)] = &[
    ("linux", "legacy-use-linux-target", "legacy-use-linux-target"),
    ("wine", "legacy-use-wine-target", "legacy-use-wine-target"),
    (
        "android",
        "legacy-use-android-target",
        "legacy-use-android-target",
    ),
    (
        "windows",
        "legacy-use-windows-kubevirt",
        "legacy-use-windows-vmirs",
    ),
];

const KUBEVIRT_GROUP: &str = "kubevirt.io";
const KUBEVIRT_VERSION: &str = "v1";

/// Cluster backend of the orchestrator adapter: lists pods and KubeVirt
/// `VirtualMachineInstance` custom resources side by side, the way
/// `kubernetes_orchestrator.py::list_containers` does.
pub struct KubernetesOrchestrator {
    client: Client,
    namespace: String,
    vmi_resource: ApiResource,
    vmirs_resource: ApiResource,
}

impl KubernetesOrchestrator {
    pub async fn new(namespace: String) -> anyhow::Result<Self> {
        let client = match Client::try_default().await {
            Ok(c) => {
                info!("loaded in-cluster Kubernetes config");
                c
            }
            Err(_) => {
                let config = KubeConfig::infer().await?;
                info!("loaded kubeconfig from file");
                Client::try_from(config)?
            }
        };

        let vmi_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            KUBEVIRT_GROUP,
            KUBEVIRT_VERSION,
            "VirtualMachineInstance",
        ));
        let vmirs_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            KUBEVIRT_GROUP,
            KUBEVIRT_VERSION,
            "VirtualMachineInstanceReplicaSet",
        ));

        Ok(KubernetesOrchestrator {
            client,
            namespace,
            vmi_resource,
            vmirs_resource,
        })
    }

    fn vmi_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.vmi_resource)
    }

    fn vmirs_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.vmirs_resource)
    }

    fn pod_workload(pod: &Pod) -> Option<Workload> {
        let name = pod.metadata.name.clone()?;
        if name.starts_with("virt-launcher-") {
            return None;
        }
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default();
        if phase != "Running" {
            return None;
        }
        let ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        Some(Workload {
            id: name.clone(),
            name,
            labels,
            status: WorkloadStatus::Running,
            ip,
            ports: HashMap::new(),
        })
    }

    fn vmi_workload(obj: &DynamicObject) -> Option<Workload> {
        let phase = obj
            .data
            .get("status")
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str())
            .unwrap_or("");
        if phase != "Running" {
            return None;
        }
        let name = obj.metadata.name.clone()?;
        let labels = obj.metadata.labels.clone().unwrap_or_default();
        let ip = obj
            .data
            .get("status")
            .and_then(|s| s.get("interfaces"))
            .and_then(|i| i.as_array())
            .and_then(|arr| arr.first())
            .and_then(|i| i.get("ipAddress"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let mut ports = HashMap::new();
        ports.insert("5900".to_string(), "5900".to_string());
        Some(Workload {
            id: name.clone(),
            name,
            labels,
            status: WorkloadStatus::Running,
            ip,
            ports,
        })
    }

    fn deployment_name_for_service(service_name: &str) -> String {
        SERVICE_MAPPING
            .iter()
            .find(|(_, svc, _)| *svc == service_name)
            .map(|(_, _, deployment)| (*deployment).to_string())
            .unwrap_or_else(|| service_name.to_string())
    }

    async fn scale_vmirs(&self, vmirs_name: &str, replicas: u32) -> bool {
        let api = self.vmirs_api();
        let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));
        match api
            .patch(vmirs_name, &PatchParams::default(), &patch)
            .await
        {
            Ok(_) => {
                info!(vmirs_name, replicas, "scaled VirtualMachineInstanceReplicaSet");
                true
            }
            Err(e) => {
                error!(vmirs_name, error = %e, "failed to scale VMIRS");
                false
            }
        }
    }
}

#[async_trait]
impl Orchestrator for KubernetesOrchestrator {
    async fn list_containers(&self, label_filters: Option<HashMap<String, String>>) -> Vec<Workload> {
        let mut lp = ListParams::default();
        if let Some(labels) = &label_filters {
            let selector: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            if !selector.is_empty() {
                lp = lp.labels(&selector.join(","));
            }
        }

        let mut workloads = Vec::new();

        let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        match pods_api.list(&lp).await {
            Ok(pods) => {
                workloads.extend(pods.items.iter().filter_map(Self::pod_workload));
            }
            Err(e) => error!(error = %e, "failed to list pods"),
        }

        match self.vmi_api().list(&lp).await {
            Ok(vmis) => {
                workloads.extend(vmis.items.iter().filter_map(Self::vmi_workload));
            }
            Err(e) => error!(error = %e, "failed to list KubeVirt VMs"),
        }

        workloads
    }

    async fn get_container(&self, id: &str) -> Option<Workload> {
        let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        match pods_api.get(id).await {
            Ok(pod) => {
                if let Some(w) = Self::pod_workload(&pod) {
                    return Some(w);
                }
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                error!(pod = id, error = %e, "failed to get pod");
            }
        }

        match self.vmi_api().get(id).await {
            Ok(vmi) => Self::vmi_workload(&vmi),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(id, "container not found as pod or VMI");
                None
            }
            Err(e) => {
                error!(id, error = %e, "failed to get VMI");
                None
            }
        }
    }

    async fn scale_service(&self, service_name: &str, replicas: u32) -> bool {
        let deployment_name = Self::deployment_name_for_service(service_name);

        if deployment_name.ends_with("-vmirs") {
            return self.scale_vmirs(&deployment_name, replicas).await;
        }

        let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));
        let params = PatchParams::default();

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        match deployments.patch(&deployment_name, &params, &patch).await {
            Ok(_) => {
                info!(deployment_name, replicas, "scaled deployment");
                return true;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                error!(deployment_name, error = %e, "failed to scale deployment");
                return false;
            }
        }

        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
        match statefulsets.patch(&deployment_name, &params, &patch).await {
            Ok(_) => {
                info!(deployment_name, replicas, "scaled statefulset");
                true
            }
            Err(e) => {
                error!(deployment_name, error = %e, "resource not found as deployment or statefulset");
                let _ = e;
                false
            }
        }
    }

    async fn check_health(&self, id: &str, health_check_url: &str) -> bool {
        let Some(workload) = self.get_container(id).await else {
            return false;
        };
        let Some(ip) = workload.ip else {
            return false;
        };
        let url = format!("http://{ip}:8088{health_check_url}");
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
                debug!(id, error = %e, "health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_mapping_windows_uses_vmirs() {
        assert_eq!(
            KubernetesOrchestrator::deployment_name_for_service("legacy-use-windows-kubevirt"),
            "legacy-use-windows-vmirs"
        );
    }

    #[test]
    fn deployment_mapping_falls_back_to_service_name() {
        assert_eq!(
            KubernetesOrchestrator::deployment_name_for_service("unmapped-service"),
            "unmapped-service"
        );
    }
}
