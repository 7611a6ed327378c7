//! Shared types, error handling, and configuration for the legacy-use
//! gateway workspace.
//!
//! Every other crate in this workspace depends on `gw-common` for its
//! error type ([`GwError`]), its wire-level data model ([`types`]), and
//! its environment-driven configuration ([`config::Config`]).

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{GwError, GwResult};
pub use types::{
    ConnectionType, PoolStatus, Session, SessionState, Target, TypeStatus, Workload,
    WorkloadStatus,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn workload(name: &str, labels: HashMap<String, String>) -> Workload {
        Workload {
            id: name.to_string(),
            name: name.to_string(),
            labels,
            status: WorkloadStatus::Running,
            ip: Some("10.1.2.3".to_string()),
            ports: HashMap::new(),
        }
    }

    #[test]
    fn target_type_prefers_label_over_name() {
        let mut labels = HashMap::new();
        labels.insert("legacy-use.target-type".to_string(), "wine".to_string());
        let w = workload("some-container-7f", labels);
        assert_eq!(w.target_type(), "wine");
    }

    #[test]
    fn target_type_falls_back_to_name_substring() {
        let w = workload("legacy-use-wine-target-abc123", HashMap::new());
        assert_eq!(w.target_type(), "wine");
    }

    #[test]
    fn target_type_unknown_when_unmatched() {
        let w = workload("nginx-deployment-5f", HashMap::new());
        assert_eq!(w.target_type(), "unknown");
    }

    #[test]
    fn scalable_label_wins_over_name_heuristic() {
        let mut labels = HashMap::new();
        labels.insert("legacy-use.scalable".to_string(), "false".to_string());
        let w = workload("legacy-use-wine-target", labels);
        assert!(!w.is_scalable());
    }

    #[test]
    fn scalable_name_hint_without_label() {
        let w = workload("legacy-use-wine-target-abc", HashMap::new());
        assert!(w.is_scalable());
    }

    #[test]
    fn unhealthy_workload_is_not_healthy() {
        let mut w = workload("x", HashMap::new());
        w.status = WorkloadStatus::Unhealthy;
        assert!(!w.is_healthy());
    }

    #[test]
    fn session_state_terminality() {
        assert!(SessionState::Destroyed.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Ready.is_terminal());
    }

    #[test]
    fn new_session_starts_initializing() {
        let s = Session::new("sess-1", "target-1");
        assert_eq!(s.state, SessionState::Initializing);
        assert!(s.container_ip.is_none());
    }

    #[test]
    fn kubevirt_sentinel_detected() {
        let mut s = Session::new("sess-1", "target-1");
        s.container_ip = Some(Session::KUBEVIRT_SENTINEL.to_string());
        assert!(s.is_vm());
    }

    #[test]
    fn service_mapping_defaults_match_reference_table() {
        let mapping = config::ServiceMapping::default();
        assert_eq!(mapping.service_name_for("linux"), "legacy-use-linux-target");
        assert_eq!(mapping.service_name_for("wine"), "legacy-use-wine-target");
        assert_eq!(
            mapping.service_name_for("windows"),
            "legacy-use-windows-kubevirt"
        );
    }

    #[test]
    fn service_mapping_unknown_type_falls_back_to_prefix() {
        let mapping = config::ServiceMapping::default();
        assert_eq!(mapping.service_name_for("freebsd"), "legacy-use-freebsd");
    }

    #[test]
    fn ws_close_codes_match_spec() {
        assert_eq!(
            GwError::SessionNotFound("x".into()).ws_close_code(),
            1008
        );
        assert_eq!(
            GwError::BridgeStartupFailure {
                session_id: "x".into(),
                reason: "timeout".into()
            }
            .ws_close_code(),
            1011
        );
        assert_eq!(GwError::UpstreamClosed.ws_close_code(), 1000);
    }
}
