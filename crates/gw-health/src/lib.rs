//! Health monitor (C8): three independent periodic tasks that keep the pool
//! ledger and the session store converged with reality. Grounded on
//! `sase-orchestrator::health::HealthMonitor`'s `consecutive_failures`
//! strike-counting pattern, generalized from a single simulated check into
//! the three real tasks spec §4.7 names (pool refresh, session
//! reconciliation, log prune), each on its own `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveTime, TimeZone};
use gw_pool::ContainerPool;
use gw_sessions::SessionManager;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Narrow C3 query surface for job-log retention, the same shape as
/// `gw_sessions::store::SessionStore`: the monitor only needs to ask the
/// store to prune itself, not to know its schema.
#[async_trait]
pub trait JobLogStore: Send + Sync {
    /// Deletes job logs older than `retention_days`, returning how many rows
    /// were removed.
    async fn prune_older_than(&self, retention_days: u32) -> u64;
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Spec §4.7 "Pool refresh (~30s)".
    pub pool_refresh_interval: Duration,
    /// Spec §4.7 "Session reconciliation (~60s)".
    pub session_reconcile_interval: Duration,
    /// Spec §4.7 "3 strikes" before a session is marked `error`.
    pub session_reconcile_strikes: u32,
    /// `LOG_RETENTION_DAYS`, default 7 (spec §6 environment).
    pub log_retention_days: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        HealthMonitorConfig {
            pool_refresh_interval: Duration::from_secs(30),
            session_reconcile_interval: Duration::from_secs(60),
            session_reconcile_strikes: 3,
            log_retention_days: 7,
        }
    }
}

/// Owns the three background loops named in spec §4.7. Each loop is an
/// independent `tokio::spawn`'d task; a panic or slow iteration in one never
/// blocks the others, matching §5's "no operation holds the pool mutex
/// across I/O" scheduling model.
pub struct HealthMonitor {
    pool: Arc<ContainerPool>,
    sessions: Arc<SessionManager>,
    job_logs: Option<Arc<dyn JobLogStore>>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<ContainerPool>,
        sessions: Arc<SessionManager>,
        job_logs: Option<Arc<dyn JobLogStore>>,
        config: HealthMonitorConfig,
    ) -> Self {
        HealthMonitor {
            pool,
            sessions,
            job_logs,
            config,
        }
    }

    /// Spawns the three periodic tasks and returns their handles so the
    /// caller's shutdown path (spec §9 "graceful-shutdown hook") can abort
    /// them before releasing allocations and closing bridges.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run_pool_refresh()),
            tokio::spawn(self.clone().run_session_reconciliation()),
            tokio::spawn(self.run_log_prune()),
        ]
    }

    async fn run_pool_refresh(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.pool_refresh_interval);
        loop {
            ticker.tick().await;
            debug!("pool refresh tick");
            self.pool.reconcile().await;
        }
    }

    async fn run_session_reconciliation(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.session_reconcile_interval);
        loop {
            ticker.tick().await;
            debug!("session reconciliation tick");
            self.sessions
                .reconcile(self.config.session_reconcile_strikes)
                .await;
        }
    }

    async fn run_log_prune(self: Arc<Self>) {
        let Some(store) = self.job_logs.clone() else {
            debug!("no job log store configured, log prune task idle");
            return;
        };
        loop {
            tokio::time::sleep(duration_until_next_midnight()).await;
            let removed = store.prune_older_than(self.config.log_retention_days).await;
            info!(removed, retention_days = self.config.log_retention_days, "pruned job logs");
        }
    }
}

/// How long until the next local midnight, for the daily, midnight-aligned
/// log prune task (spec §4.7).
fn duration_until_next_midnight() -> Duration {
    let now = Local::now();
    let today_midnight = match Local.from_local_datetime(&now.date_naive().and_time(NaiveTime::MIN)) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => now,
    };
    let next_midnight = today_midnight + chrono::Duration::days(1);
    let delta = next_midnight.signed_duration_since(now);
    if delta.num_milliseconds() <= 0 {
        warn!("computed non-positive delay to next midnight, falling back to 24h");
        Duration::from_secs(24 * 60 * 60)
    } else {
        Duration::from_millis(delta.num_milliseconds() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_attr;
    use gw_common::types::{Workload, WorkloadStatus};
    use gw_orchestrator::Orchestrator;
    use gw_pool::PoolConfig;
    use gw_sessions::{InMemorySessionStore, SessionManagerConfig, SessionStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct MockOrchestrator {
        workloads: Mutex<Vec<Workload>>,
    }

    #[async_trait_attr]
    impl Orchestrator for MockOrchestrator {
        async fn list_containers(&self, _: Option<HashMap<String, String>>) -> Vec<Workload> {
            self.workloads.lock().unwrap().clone()
        }
        async fn get_container(&self, id: &str) -> Option<Workload> {
            self.workloads.lock().unwrap().iter().find(|w| w.id == id).cloned()
        }
        async fn scale_service(&self, _: &str, _: u32) -> bool {
            true
        }
        async fn check_health(&self, _id: &str, _url: &str) -> bool {
            true
        }
    }

    struct CountingJobLogStore {
        calls: AtomicU64,
    }

    #[async_trait_attr]
    impl JobLogStore for CountingJobLogStore {
        async fn prune_older_than(&self, _retention_days: u32) -> u64 {
            self.calls.fetch_add(1, Ordering::Relaxed);
            0
        }
    }

    fn workload(id: &str, target_type: &str) -> Workload {
        let mut labels = HashMap::new();
        labels.insert("legacy-use.target-type".to_string(), target_type.to_string());
        labels.insert("legacy-use.scalable".to_string(), "true".to_string());
        Workload {
            id: id.to_string(),
            name: id.to_string(),
            labels,
            status: WorkloadStatus::Running,
            ip: Some("10.1.2.3".to_string()),
            ports: HashMap::new(),
        }
    }

    fn monitor_with(workloads: Vec<Workload>) -> (Arc<HealthMonitor>, Arc<ContainerPool>, Arc<SessionManager>) {
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(MockOrchestrator {
            workloads: Mutex::new(workloads),
        });
        let pool = Arc::new(ContainerPool::new(orchestrator.clone(), PoolConfig::default()));
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
        let sessions = Arc::new(SessionManager::new(
            store,
            pool.clone(),
            orchestrator,
            SessionManagerConfig::default(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            pool.clone(),
            sessions.clone(),
            None,
            HealthMonitorConfig::default(),
        ));
        (monitor, pool, sessions)
    }

    #[tokio::test]
    async fn pool_refresh_evicts_allocation_for_disappeared_workload() {
        let orchestrator = Arc::new(MockOrchestrator {
            workloads: Mutex::new(vec![workload("w1", "wine")]),
        });
        let pool = Arc::new(ContainerPool::new(
            orchestrator.clone() as Arc<dyn Orchestrator>,
            PoolConfig::default(),
        ));
        pool.allocate("s1", "wine").await.unwrap();

        // Workload vanishes from the orchestrator's view entirely.
        orchestrator.workloads.lock().unwrap().clear();

        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
        let sessions = Arc::new(SessionManager::new(
            store,
            pool.clone(),
            orchestrator as Arc<dyn Orchestrator>,
            SessionManagerConfig::default(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            pool.clone(),
            sessions,
            None,
            HealthMonitorConfig::default(),
        ));

        monitor.pool.reconcile().await;
        assert!(pool.get_for_session("s1").await.is_none());
    }

    #[tokio::test]
    async fn session_reconciliation_marks_session_error_after_strikes() {
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(AlwaysUnhealthy);
        let pool = Arc::new(ContainerPool::new(orchestrator.clone(), PoolConfig::default()));
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
        // Seed a non-terminal session directly; AlwaysUnhealthy would never
        // let create_session reach `ready`, so the store is populated by hand.
        let mut session = gw_common::types::Session::new("s1", "t1");
        session.state = gw_common::types::SessionState::Ready;
        session.container_id = Some("w1".to_string());
        session.container_ip = Some("10.1.2.3".to_string());
        store.put(session.clone()).await;

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            pool.clone(),
            orchestrator,
            SessionManagerConfig::default(),
        ));
        let _monitor = Arc::new(HealthMonitor::new(
            pool,
            sessions.clone(),
            None,
            HealthMonitorConfig {
                session_reconcile_strikes: 3,
                ..HealthMonitorConfig::default()
            },
        ));

        sessions.reconcile(3).await;
        let updated = store.get("s1").await.unwrap();
        assert_eq!(updated.state, gw_common::types::SessionState::Error);
    }

    struct AlwaysUnhealthy;

    #[async_trait_attr]
    impl Orchestrator for AlwaysUnhealthy {
        async fn list_containers(&self, _: Option<HashMap<String, String>>) -> Vec<Workload> {
            vec![]
        }
        async fn get_container(&self, _id: &str) -> Option<Workload> {
            None
        }
        async fn scale_service(&self, _: &str, _: u32) -> bool {
            false
        }
        async fn check_health(&self, _id: &str, _url: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn log_prune_invokes_store_once_when_triggered_manually() {
        let store = Arc::new(CountingJobLogStore {
            calls: AtomicU64::new(0),
        });
        let (_, pool, sessions) = monitor_with(vec![]);
        let monitor = Arc::new(HealthMonitor::new(
            pool,
            sessions,
            Some(store.clone() as Arc<dyn JobLogStore>),
            HealthMonitorConfig::default(),
        ));
        let removed = monitor.job_logs.as_ref().unwrap().prune_older_than(7).await;
        assert_eq!(removed, 0);
        assert_eq!(store.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn duration_until_next_midnight_is_positive_and_bounded() {
        let d = duration_until_next_midnight();
        assert!(d.as_secs() > 0);
        assert!(d.as_secs() <= 24 * 60 * 60);
    }
}
