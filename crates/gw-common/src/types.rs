use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workload discovered from the orchestrator backend: a running container
/// or VM instance that can serve VNC traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub status: WorkloadStatus,
    pub ip: Option<String>,
    pub ports: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Running,
    Pending,
    Unhealthy,
    Unknown,
}

impl Workload {
    /// Whether this workload can accept an allocation right now.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, WorkloadStatus::Running)
    }

    /// Cluster-internal management URL for health probes, rather than a pod
    /// IP that may not be reachable or stable from outside the pod's own
    /// node. Port 8088 is the well-known management port every workload
    /// image in this fleet exposes (mirrors `get_container_url` in the
    /// original implementation).
    pub fn management_url(&self, path: &str) -> Option<String> {
        let ip = self.ip.as_ref()?;
        Some(format!("http://{ip}:8088{path}"))
    }

    /// `legacy-use.scalable="true"` label, or a name that matches a known
    /// scalable pattern (mirrors `container_pool.py::_find_available_container`).
    pub fn is_scalable(&self) -> bool {
        self.labels
            .get("legacy-use.scalable")
            .map(|v| v == "true")
            .unwrap_or_else(|| {
                const SCALABLE_NAME_HINTS: &[&str] =
                    &["-target", "-machine", "-kubevirt", "-vmirs"];
                SCALABLE_NAME_HINTS.iter().any(|hint| self.name.contains(hint))
            })
    }

    /// Derives the logical target type from labels first, falling back to
    /// substring matching on the workload name.
    pub fn target_type(&self) -> String {
        if let Some(t) = self.labels.get("legacy-use.target-type") {
            return t.clone();
        }
        if let Some(t) = self.labels.get("app.kubernetes.io/component") {
            return t.clone();
        }
        const NAME_HINTS: &[(&str, &str)] = &[
            ("wine-target", "wine"),
            ("linux-target", "linux"),
            ("linux-machine", "linux"),
            ("android-aind-target", "android-aind"),
            ("android-target", "android"),
            ("dosbox-target", "dosbox"),
            ("windows", "windows"),
        ];
        for (hint, target_type) in NAME_HINTS {
            if self.name.contains(hint) {
                return (*target_type).to_string();
            }
        }
        "unknown".to_string()
    }
}

/// Descriptor of what a session of a given type requires, normally sourced
/// from the external session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub target_type: String,
    pub width: u32,
    pub height: u32,
    pub vnc_port: u16,
    pub novnc_port: u16,
    pub connection_type: ConnectionType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Goes through the container pool (C2).
    Pool,
    /// Uses the descriptor's own host/port directly, bypassing C2.
    Direct,
    /// Goes through the cluster's VM-VNC sub-resource.
    Vm,
}

/// A session's position in the state machine in spec §3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Provisioning,
    Ready,
    Active,
    Releasing,
    Destroyed,
    Error,
}

impl SessionState {
    /// Whether this session may still be health-polled / reconciled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Destroyed | SessionState::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub target_id: String,
    pub state: SessionState,
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub vnc_port: Option<u16>,
    pub novnc_port: Option<u16>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Session {
            id: id.into(),
            target_id: target_id.into(),
            state: SessionState::Initializing,
            container_id: None,
            container_ip: None,
            vnc_port: None,
            novnc_port: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sentinel used in `container_ip` to mark a session backed by a
    /// KubeVirt VM rather than a generic VNC-speaking container.
    pub const KUBEVIRT_SENTINEL: &'static str = "kubevirt-vm";

    pub fn is_vm(&self) -> bool {
        self.container_ip.as_deref() == Some(Self::KUBEVIRT_SENTINEL)
    }
}

/// A snapshot of the allocation ledger, returned by `ContainerPool::status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total: usize,
    pub allocated: usize,
    pub available: usize,
    pub by_type: HashMap<String, TypeStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeStatus {
    pub total: usize,
    pub allocated: usize,
    pub available: usize,
}
