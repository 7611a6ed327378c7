//! VM RFB bridge (C7-VM): no subprocess — the bridge IS a WebSocket client
//! to the cluster's `virtualmachineinstances/{name}/vnc` sub-resource,
//! authenticated with the in-cluster service-account bearer token.
//! Grounded on `infra/.../proxy.py::handle_kubevirt_vnc`.

use std::sync::Arc;

use gw_common::error::{GwError, GwResult};
use http::header::AUTHORIZATION;
use http::HeaderValue;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Clone)]
pub struct KubevirtConfig {
    pub cluster_url: String,
    pub token: String,
    pub namespace: String,
    /// PEM-encoded cluster CA, when discoverable, pinned into the rustls
    /// root store instead of trusting the platform's default roots.
    pub ca_pem: Option<Vec<u8>>,
}

impl KubevirtConfig {
    /// Loads cluster coordinates and a bearer token, preferring the
    /// in-cluster service-account mount and falling back to the local
    /// kubeconfig for development (DESIGN.md open question (c) / SPEC_FULL
    /// §10 supplemented feature (d)).
    pub async fn discover(namespace: String) -> GwResult<Self> {
        let sa_token = tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token")).await;
        if let Ok(token) = sa_token {
            info!("loaded in-cluster service-account token for KubeVirt VNC");
            let ca_pem = tokio::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")).await.ok();
            return Ok(KubevirtConfig {
                cluster_url: "https://kubernetes.default.svc".to_string(),
                token: token.trim().to_string(),
                namespace,
                ca_pem,
            });
        }

        warn!("no in-cluster service account found, falling back to local kubeconfig");
        let config = kube::Config::infer()
            .await
            .map_err(|e| GwError::ConfigError(format!("failed to infer kubeconfig: {e}")))?;
        let token = config
            .auth_info
            .token
            .as_ref()
            .map(|t| t.clone().expose())
            .ok_or_else(|| GwError::ConfigError("kubeconfig has no bearer token".to_string()))?;
        let ca_pem = config.root_cert.as_ref().and_then(|certs| certs.first().cloned());

        Ok(KubevirtConfig {
            cluster_url: config.cluster_url.to_string(),
            token,
            namespace,
            ca_pem,
        })
    }

    fn vnc_url(&self, vmi_name: &str) -> String {
        let base = self
            .cluster_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{base}/apis/kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{vmi_name}/vnc",
            self.namespace
        )
    }
}

pub type VmStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens an authenticated WebSocket to the VM's VNC sub-resource, SSL
/// verified against the cluster CA where the platform TLS store has it
/// (spec §4.5 "VM VNC").
pub async fn connect(config: &KubevirtConfig, vmi_name: &str) -> GwResult<VmStream> {
    let url = config.vnc_url(vmi_name);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| GwError::AuthFailure(format!("invalid KubeVirt VNC URL: {e}")))?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| GwError::AuthFailure(format!("invalid bearer token: {e}")))?,
    );

    let connector = Connector::Rustls(Arc::new(build_rustls_config(config.ca_pem.as_deref())?));

    let (stream, response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
            .await
            .map_err(|e| GwError::AuthFailure(format!("KubeVirt VNC upgrade failed: {e}")))?;

    if response.status() == http::StatusCode::UNAUTHORIZED
        || response.status() == http::StatusCode::FORBIDDEN
    {
        return Err(GwError::AuthFailure(format!(
            "cluster rejected VNC token: {}",
            response.status()
        )));
    }

    Ok(stream)
}

/// Pins the cluster CA into the root store when one was discovered,
/// otherwise trusts the platform's native roots.
fn build_rustls_config(ca_pem: Option<&[u8]>) -> GwResult<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(pem) = ca_pem {
        let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
            .map_err(|e| GwError::AuthFailure(format!("invalid cluster CA PEM: {e}")))?;
        for cert in certs {
            roots
                .add(&rustls::Certificate(cert))
                .map_err(|e| GwError::AuthFailure(format!("failed to pin cluster CA: {e}")))?;
        }
    } else {
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
    }

    Ok(rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth())
}
