use std::sync::Arc;
use std::time::Duration;

use gw_common::error::{GwError, GwResult};
use gw_common::types::{ConnectionType, Session, SessionState, Target};
use gw_orchestrator::Orchestrator;
use gw_pool::ContainerPool;
use tracing::{error, info, warn};

use crate::store::SessionStore;

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub allocate_max_attempts: u32,
    pub allocate_retry_delay: Duration,
    pub health_poll_deadline: Duration,
    pub health_poll_interval: Duration,
    pub health_check_url: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        SessionManagerConfig {
            allocate_max_attempts: 10,
            allocate_retry_delay: Duration::from_secs(3),
            health_poll_deadline: Duration::from_secs(60),
            health_poll_interval: Duration::from_secs(2),
            health_check_url: "/health".to_string(),
        }
    }
}

/// Session lifecycle manager (C4). Drives a session through
/// `initializing -> provisioning -> ready -> active -> releasing -> destroyed`,
/// calling into C2 for allocation and C1 for readiness polling. Grounded on
/// `sase-rbi::session::SessionManager`'s struct shape, generalized from a
/// flat browser-session map to the allocate/poll/release flow in
/// SPEC_FULL.md §4.3.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    pool: Arc<ContainerPool>,
    orchestrator: Arc<dyn Orchestrator>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        pool: Arc<ContainerPool>,
        orchestrator: Arc<dyn Orchestrator>,
        config: SessionManagerConfig,
    ) -> Self {
        SessionManager {
            store,
            pool,
            orchestrator,
            config,
        }
    }

    /// Creates and fully provisions a session for `target`, blocking until
    /// the workload is ready or the allocate/health-poll deadlines expire.
    pub async fn create_session(&self, target: &Target) -> GwResult<Session> {
        let mut session = Session::new(uuid::Uuid::new_v4().to_string(), target.id.clone());
        self.store.put(session.clone()).await;

        session.state = SessionState::Provisioning;
        self.store.put(session.clone()).await;

        match target.connection_type {
            ConnectionType::Direct => {
                session.vnc_port = Some(target.vnc_port);
                session.novnc_port = Some(target.novnc_port);
            }
            ConnectionType::Pool | ConnectionType::Vm => {
                let workload = self.allocate_with_retry(&session.id, &target.target_type).await;
                let Some(workload) = workload else {
                    session.state = SessionState::Error;
                    session.error_message = Some("no capacity".to_string());
                    self.store.put(session.clone()).await;
                    return Err(GwError::NoCapacity(target.target_type.clone()));
                };

                session.container_id = Some(workload.id.clone());
                session.container_ip = if target.connection_type == ConnectionType::Vm {
                    Some(Session::KUBEVIRT_SENTINEL.to_string())
                } else {
                    workload.ip.clone()
                };
                session.vnc_port = Some(target.vnc_port);
                session.novnc_port = Some(target.novnc_port);
                self.store.put(session.clone()).await;

                if !self.wait_until_healthy(&workload.id).await {
                    session.state = SessionState::Error;
                    session.error_message = Some("workload never became healthy".to_string());
                    self.store.put(session.clone()).await;
                    return Err(GwError::TransientBackend(format!(
                        "workload {} did not become healthy within deadline",
                        workload.id
                    )));
                }
            }
        }

        session.state = SessionState::Ready;
        self.store.put(session.clone()).await;
        info!(session_id = %session.id, "session ready");
        Ok(session)
    }

    async fn allocate_with_retry(
        &self,
        session_id: &str,
        target_type: &str,
    ) -> Option<gw_common::types::Workload> {
        for attempt in 1..=self.config.allocate_max_attempts {
            if let Some(w) = self.pool.allocate(session_id, target_type).await {
                return Some(w);
            }
            warn!(session_id, target_type, attempt, "allocate attempt failed, retrying");
            tokio::time::sleep(self.config.allocate_retry_delay).await;
        }
        None
    }

    async fn wait_until_healthy(&self, workload_id: &str) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.health_poll_deadline;
        loop {
            if self
                .orchestrator
                .check_health(workload_id, &self.config.health_check_url)
                .await
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.health_poll_interval).await;
        }
    }

    /// Transitions a session from `ready` to `active` on the first
    /// successful browser WebSocket upgrade (spec §3 state machine).
    pub async fn mark_active(&self, session_id: &str) -> GwResult<()> {
        let mut session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| GwError::SessionNotFound(session_id.to_string()))?;
        if session.state == SessionState::Ready {
            session.state = SessionState::Active;
            self.store.put(session).await;
        }
        Ok(())
    }

    /// Releases a session's allocation and tears it down (spec §4.3 "On destroy").
    pub async fn destroy_session(&self, session_id: &str) -> GwResult<()> {
        let Some(mut session) = self.store.get(session_id).await else {
            return Ok(());
        };
        session.state = SessionState::Releasing;
        self.store.put(session.clone()).await;

        self.pool.release(session_id);

        session.container_ip = None;
        session.vnc_port = None;
        session.novnc_port = None;
        session.state = SessionState::Destroyed;
        self.store.put(session).await;
        info!(session_id, "session destroyed");
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.store.get(session_id).await
    }

    /// Re-checks health for every non-terminal session; transitions to
    /// `error` after `strikes` consecutive failures (spec §4.7, 3-strike rule).
    pub async fn reconcile(&self, strikes: u32) {
        for session in self.store.list_active().await {
            let Some(container_id) = session.container_id.clone() else {
                continue;
            };
            let mut consecutive_failures = 0;
            for _ in 0..strikes {
                if self
                    .orchestrator
                    .check_health(&container_id, &self.config.health_check_url)
                    .await
                {
                    break;
                }
                consecutive_failures += 1;
            }
            if consecutive_failures >= strikes {
                error!(session_id = %session.id, "session failed health reconciliation, marking error");
                let mut s = session;
                s.state = SessionState::Error;
                s.error_message = Some("workload failed health reconciliation".to_string());
                self.store.put(s).await;
            }
        }
    }
}
