use std::collections::HashMap;
use std::env;

use crate::error::GwResult;

/// Which orchestrator backend to talk to, selected by `CONTAINER_ORCHESTRATOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorKind {
    Docker,
    Kubernetes,
}

impl OrchestratorKind {
    fn from_env_str(s: &str) -> Self {
        match s {
            "kubernetes" | "k8s" => OrchestratorKind::Kubernetes,
            _ => OrchestratorKind::Docker,
        }
    }
}

/// Static `target_type -> service name` mapping (spec §6). Loaded from
/// configuration so operators can add target types without a rebuild,
/// per the open question in SPEC_FULL.md §9(a); defaults reproduce the
/// reference table exactly.
#[derive(Debug, Clone)]
pub struct ServiceMapping(HashMap<String, String>);

impl Default for ServiceMapping {
    fn default() -> Self {
        let mut m = HashMap::new();
        m.insert("linux".to_string(), "legacy-use-linux-target".to_string());
        m.insert("wine".to_string(), "legacy-use-wine-target".to_string());
        m.insert("android".to_string(), "legacy-use-android-target".to_string());
        m.insert(
            "android-aind".to_string(),
            "legacy-use-android-aind-target".to_string(),
        );
        m.insert("dosbox".to_string(), "legacy-use-dosbox-target".to_string());
        m.insert("windows".to_string(), "legacy-use-windows-kubevirt".to_string());
        m.insert(
            "windows-xp".to_string(),
            "legacy-use-windows-xp-kubevirt".to_string(),
        );
        m.insert(
            "windows-10".to_string(),
            "legacy-use-windows-10-kubevirt".to_string(),
        );
        m.insert(
            "macos-mojave".to_string(),
            "legacy-use-macos-mojave-kubevirt".to_string(),
        );
        ServiceMapping(m)
    }
}

impl ServiceMapping {
    pub fn service_name_for(&self, target_type: &str) -> String {
        self.0
            .get(target_type)
            .cloned()
            .unwrap_or_else(|| format!("legacy-use-{target_type}"))
    }

    pub fn insert(&mut self, target_type: impl Into<String>, service_name: impl Into<String>) {
        self.0.insert(target_type.into(), service_name.into());
    }
}

/// Process-wide configuration, assembled from environment variables.
///
/// Mirrors `settings.py`'s flat, env-backed settings object; kept as an
/// explicit struct with a manual `from_env` rather than full `config`-crate
/// deserialization because the field set is small and every default needs
/// to be documented at the call site.
#[derive(Debug, Clone)]
pub struct Config {
    pub legacy_use_url: Option<String>,
    pub api_key: Option<String>,
    pub orchestrator: OrchestratorKind,
    pub kubernetes_namespace: String,
    pub novnc_proxy_host: String,
    pub novnc_proxy_port: u16,
    pub log_retention_days: u32,
    pub pod_ip_cidr: String,
    pub service_mapping: ServiceMapping,
    pub bind_addr: String,
    pub internal_network_trusted: bool,
    /// Base `ws://host:port` of the shared VNC gateway (C6) that `gw-server`
    /// forwards browser legs to (spec §2 "process topology").
    pub vnc_gateway_url: String,
    /// Listen address for the `gw-vnc-gateway` (C6) binary itself. Defaults
    /// to loopback-only per §9 open question (c); override requires
    /// `GW_INTERNAL_NETWORK_TRUSTED=1` to acknowledge the exposure.
    pub vnc_gateway_bind_addr: String,
}

impl Config {
    pub fn from_env() -> GwResult<Self> {
        let orchestrator = env::var("CONTAINER_ORCHESTRATOR")
            .map(|v| OrchestratorKind::from_env_str(&v))
            .unwrap_or(OrchestratorKind::Docker);

        let log_retention_days: u32 = env::var("LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);

        let novnc_proxy_port: u16 = env::var("NOVNC_PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6080);

        Ok(Config {
            legacy_use_url: env::var("LEGACY_USE_URL").ok(),
            api_key: env::var("API_KEY").ok(),
            orchestrator,
            kubernetes_namespace: env::var("KUBERNETES_NAMESPACE")
                .unwrap_or_else(|_| "legacy-use".to_string()),
            novnc_proxy_host: env::var("NOVNC_PROXY_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            novnc_proxy_port,
            log_retention_days,
            pod_ip_cidr: env::var("POD_IP_CIDR").unwrap_or_else(|_| "10.244.0.0/16".to_string()),
            service_mapping: ServiceMapping::default(),
            bind_addr: env::var("GW_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            internal_network_trusted: env::var("GW_INTERNAL_NETWORK_TRUSTED")
                .map(|v| v == "1")
                .unwrap_or(false),
            vnc_gateway_url: env::var("GW_VNC_GATEWAY_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:6090/websockify".to_string()),
            vnc_gateway_bind_addr: env::var("GW_VNC_GATEWAY_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:6090".to_string()),
        })
    }

    /// Whether `ip` falls inside the configured pod-IP CIDR and therefore
    /// needs rewriting to a stable service name before use (spec §4.4 step 2).
    pub fn is_pod_ip(&self, ip: &str) -> bool {
        // Minimal /16-style prefix check; avoids pulling in a CIDR-parsing
        // crate for what is, in every deployment this gateway targets, a
        // fixed-prefix cluster pod range.
        let prefix = self
            .pod_ip_cidr
            .split('/')
            .next()
            .unwrap_or(&self.pod_ip_cidr);
        let octets: Vec<&str> = prefix.split('.').collect();
        if octets.len() < 2 {
            return false;
        }
        ip.starts_with(&format!("{}.{}.", octets[0], octets[1]))
    }
}
