use async_trait::async_trait;
use gw_common::types::Workload;
use std::collections::HashMap;

/// Uniform orchestrator contract (spec §4.1). Every operation is total: it
/// returns an empty/false/None result on backend failure rather than
/// propagating an error, so callers in C2/C8 can converge on the next
/// refresh cycle instead of threading retry logic through every call site.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_containers(&self, label_filters: Option<HashMap<String, String>>) -> Vec<Workload>;

    async fn get_container(&self, id: &str) -> Option<Workload>;

    async fn scale_service(&self, service_name: &str, replicas: u32) -> bool;

    async fn check_health(&self, id: &str, health_check_url: &str) -> bool;
}
