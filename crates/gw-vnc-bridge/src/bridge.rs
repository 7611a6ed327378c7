//! Generic RFB bridge (C7-generic): a per-session WebSocket-to-TCP adapter
//! subprocess bound to an ephemeral local port. Grounded on
//! `infra/.../proxy.py::start_websockify`, which shells out to `websockify`
//! itself; kept as a subprocess here per spec §9's "subprocess-as-bridge"
//! design note rather than reimplemented in-process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::Duration;

use dashmap::DashMap;
use gw_common::error::{GwError, GwResult};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct GenericBridgeConfig {
    /// Base of the ephemeral port range (spec §4.6 / §9 open question (b)).
    pub base_port: u16,
    /// Width of the hashed offset range before collision scanning kicks in.
    pub port_range: u16,
    /// Path to the websocket-to-TCP adapter binary.
    pub websockify_bin: String,
    /// Static asset tree served by the adapter at `/`.
    pub web_root: Option<String>,
    pub probe_attempts: u32,
    pub probe_interval: Duration,
}

impl Default for GenericBridgeConfig {
    fn default() -> Self {
        GenericBridgeConfig {
            base_port: 6100,
            port_range: 1000,
            websockify_bin: "websockify".to_string(),
            web_root: None,
            probe_attempts: 10,
            probe_interval: Duration::from_millis(500),
        }
    }
}

struct BridgeEntry {
    port: u16,
    child: Child,
}

/// Bridge table (spec §4.6 "at most one live bridge per session_id"). A
/// single `DashMap` gives the per-entry atomicity the invariant requires
/// without a coarse lock serializing unrelated sessions' bridge starts.
#[derive(Default)]
pub struct BridgeTable {
    entries: DashMap<String, BridgeEntry>,
    config: GenericBridgeConfig,
}

impl BridgeTable {
    pub fn new(config: GenericBridgeConfig) -> Self {
        BridgeTable {
            entries: DashMap::new(),
            config,
        }
    }

    /// Ensures a bridge is running for `session_id`, forwarding to
    /// `target_host:target_port`, and returns the local port it listens on.
    /// Reuses an existing bridge for the same session (spec §4.6 step 1).
    pub async fn ensure(
        &self,
        session_id: &str,
        target_host: &str,
        target_port: u16,
    ) -> GwResult<u16> {
        if let Some(entry) = self.entries.get(session_id) {
            return Ok(entry.port);
        }

        let port = self.pick_port(session_id);
        let child = self.spawn_adapter(port, target_host, target_port)?;

        let mut child = child;
        if let Err(e) = self.probe_until_bound(port).await {
            let output = Self::drain_output(&mut child).await;
            let _ = child.kill().await;
            error!(session_id, port, output, "bridge adapter failed to bind");
            return Err(e);
        }

        self.entries.insert(
            session_id.to_string(),
            BridgeEntry { port, child },
        );
        info!(session_id, port, target_host, target_port, "generic VNC bridge ready");
        Ok(port)
    }

    /// Terminates and removes the bridge for `session_id`, if any (spec
    /// §4.6 step 5 / bridge table invariant).
    pub async fn terminate(&self, session_id: &str) {
        if let Some((_, mut entry)) = self.entries.remove(session_id) {
            if let Err(e) = entry.child.kill().await {
                warn!(session_id, error = %e, "failed to kill bridge adapter");
            }
            debug!(session_id, port = entry.port, "bridge terminated");
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// Terminates every live bridge. Part of the graceful-shutdown hook
    /// spec §9 requires of the bridge table's process-wide singleton.
    pub async fn shutdown(&self) -> usize {
        let session_ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let count = session_ids.len();
        for session_id in session_ids {
            self.terminate(&session_id).await;
        }
        count
    }

    /// `base + hash(session_id) % port_range`, scanning forward past any
    /// port already claimed by another session's bridge (spec §9 open
    /// question (b): explicit collision avoidance the reference lacks).
    fn pick_port(&self, session_id: &str) -> u16 {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        let offset = (hasher.finish() % self.config.port_range as u64) as u16;
        let mut candidate = self.config.base_port + offset;

        let taken: std::collections::HashSet<u16> =
            self.entries.iter().map(|e| e.port).collect();
        for _ in 0..self.config.port_range {
            if !taken.contains(&candidate) {
                return candidate;
            }
            candidate = self.config.base_port
                + (candidate - self.config.base_port + 1) % self.config.port_range;
        }
        candidate
    }

    fn spawn_adapter(&self, port: u16, target_host: &str, target_port: u16) -> GwResult<Child> {
        let mut cmd = Command::new(&self.config.websockify_bin);
        cmd.arg(port.to_string())
            .arg(format!("{target_host}:{target_port}"))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(web_root) = &self.config.web_root {
            cmd.arg("--web").arg(web_root);
        }
        cmd.spawn().map_err(GwError::IoError)
    }

    async fn probe_until_bound(&self, port: u16) -> GwResult<()> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        for attempt in 1..=self.config.probe_attempts {
            if TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            debug!(port, attempt, "bridge port not yet bound");
            sleep(self.config.probe_interval).await;
        }
        Err(GwError::BridgeStartupFailure {
            session_id: String::new(),
            reason: format!("adapter did not bind port {port} within deadline"),
        })
    }

    async fn drain_output(child: &mut Child) -> String {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        if let Some(stderr) = child.stderr.as_mut() {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_port_is_stable_for_same_session() {
        let table = BridgeTable::new(GenericBridgeConfig::default());
        assert_eq!(table.pick_port("s1"), table.pick_port("s1"));
    }

    #[test]
    fn pick_port_stays_within_configured_range() {
        let table = BridgeTable::new(GenericBridgeConfig::default());
        let port = table.pick_port("some-session-id");
        assert!(port >= table.config.base_port);
        assert!(port < table.config.base_port + table.config.port_range);
    }

    #[tokio::test]
    async fn terminate_unknown_session_is_noop() {
        let table = BridgeTable::new(GenericBridgeConfig::default());
        table.terminate("nope").await;
        assert!(!table.is_running("nope"));
    }

    #[tokio::test]
    async fn shutdown_on_empty_table_returns_zero() {
        let table = BridgeTable::new(GenericBridgeConfig::default());
        assert_eq!(table.shutdown().await, 0);
    }
}
