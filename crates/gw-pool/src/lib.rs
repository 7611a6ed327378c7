//! Container pool (C2): owns the allocation ledger mapping sessions to
//! workloads and the snapshot cache refreshed from the orchestrator
//! adapter. Grounded on `container_pool.py`'s dual hash-map ledger and
//! `sase-rbi::pool::ContainerPool`'s struct shape and atomic stats
//! counters.

mod ledger;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gw_common::config::ServiceMapping;
use gw_common::types::{PoolStatus, TypeStatus, Workload};
use gw_orchestrator::Orchestrator;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ledger::Ledger;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long a cached `list_containers` snapshot remains valid before a
    /// fresh call to the orchestrator is forced.
    pub snapshot_ttl: Duration,
    /// Delay before checking whether a freshly-released workload's service
    /// should be scaled down (spec §4.2 "release").
    pub scale_down_delay: Duration,
    /// `target_type -> service_name`, the same table C5's pod-IP rewrite
    /// and C6's upstream resolution use (spec §6), so a scale-up request
    /// targets the same service name regardless of orchestrator backend.
    pub service_mapping: ServiceMapping,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            snapshot_ttl: Duration::from_secs(5),
            scale_down_delay: Duration::from_secs(10),
            service_mapping: ServiceMapping::default(),
        }
    }
}

#[derive(Default)]
struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    scale_requests: AtomicU64,
}

struct Snapshot {
    taken_at: Instant,
    workloads: Vec<Workload>,
}

pub struct ContainerPool {
    orchestrator: Arc<dyn Orchestrator>,
    ledger: Mutex<Ledger>,
    snapshot: RwLock<Option<Snapshot>>,
    stats: PoolStats,
    config: PoolConfig,
}

impl ContainerPool {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, config: PoolConfig) -> Self {
        ContainerPool {
            orchestrator,
            ledger: Mutex::new(Ledger::default()),
            snapshot: RwLock::new(None),
            stats: PoolStats::default(),
            config,
        }
    }

    /// Allocates a healthy, scalable workload of `target_type` to
    /// `session_id`, or `None` if no capacity is currently available.
    ///
    /// Mirrors `container_pool.py::allocate_container`: the reuse check and
    /// ledger write happen under the lock, but the (potentially slow)
    /// orchestrator snapshot refresh happens outside it.
    pub async fn allocate(&self, session_id: &str, target_type: &str) -> Option<Workload> {
        if let Some(existing) = self.reuse_if_healthy(session_id).await {
            return Some(existing);
        }

        let snapshot = self.ensure_snapshot(false).await;

        let mut ledger = self.ledger.lock();
        let chosen = snapshot.iter().find(|w| {
            w.is_scalable()
                && w.target_type() == target_type
                && w.is_healthy()
                && !ledger.workload_to_session.contains_key(&w.id)
        });

        match chosen {
            Some(workload) => {
                ledger.insert(session_id.to_string(), workload.id.clone());
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                info!(session_id, workload_id = %workload.id, target_type, "allocated workload");
                Some(workload.clone())
            }
            None => {
                drop(ledger);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(session_id, target_type, "no capacity; requesting scale-up");
                self.request_scale_up(target_type).await;
                None
            }
        }
    }

    /// If `session_id` already owns a workload and it is still healthy,
    /// return it; otherwise evict the stale entry. Matches the
    /// "already allocated" branch at the top of
    /// `container_pool.py::allocate_container`.
    async fn reuse_if_healthy(&self, session_id: &str) -> Option<Workload> {
        let existing_id = {
            let ledger = self.ledger.lock();
            ledger.session_to_workload.get(session_id).cloned()
        }?;

        match self.orchestrator.get_container(&existing_id).await {
            Some(workload) if workload.is_healthy() => Some(workload),
            _ => {
                let mut ledger = self.ledger.lock();
                ledger.remove_by_session(session_id);
                None
            }
        }
    }

    /// Removes both ledger directions for `session_id`. Idempotent.
    pub fn release(&self, session_id: &str) -> bool {
        let mut ledger = self.ledger.lock();
        let removed = ledger.remove_by_session(session_id);
        if removed.is_some() {
            debug!(session_id, "released allocation");
        }
        removed.is_some()
    }

    /// Releases every outstanding allocation. Part of the graceful-shutdown
    /// hook spec §9 requires of the pool's process-wide singleton: called
    /// once, at process shutdown, before the process exits.
    pub fn shutdown(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let count = ledger.session_to_workload.len();
        ledger.session_to_workload.clear();
        ledger.workload_to_session.clear();
        if count > 0 {
            info!(count, "released all allocations on shutdown");
        }
        count
    }

    pub async fn get_for_session(&self, session_id: &str) -> Option<Workload> {
        let workload_id = {
            let ledger = self.ledger.lock();
            ledger.session_to_workload.get(session_id).cloned()
        }?;

        match self.orchestrator.get_container(&workload_id).await {
            Some(w) if w.is_healthy() => Some(w),
            _ => {
                let mut ledger = self.ledger.lock();
                ledger.remove_by_session(session_id);
                None
            }
        }
    }

    /// Snapshot of the ledger for the pool-administration HTTP surface.
    pub fn status(&self) -> PoolStatus {
        let snapshot = self.snapshot.read();
        let ledger = self.ledger.lock();

        let mut status = PoolStatus::default();
        let Some(snapshot) = snapshot.as_ref() else {
            return status;
        };

        for w in &snapshot.workloads {
            status.total += 1;
            let entry = status.by_type.entry(w.target_type()).or_insert_with(TypeStatus::default);
            entry.total += 1;
            if ledger.workload_to_session.contains_key(&w.id) {
                status.allocated += 1;
                entry.allocated += 1;
            } else if w.is_healthy() {
                status.available += 1;
                entry.available += 1;
            }
        }
        status
    }

    /// Forces a fresh snapshot from the orchestrator, bypassing the TTL
    /// cache. Used by C8's periodic refresh and the `/containers/refresh`
    /// admin route.
    pub async fn force_refresh(&self) -> Vec<Workload> {
        self.ensure_snapshot(true).await
    }

    /// Drops ledger entries whose workload no longer appears in a fresh
    /// snapshot, or whose workload is no longer healthy. Called by C8's
    /// pool-refresh task (spec §4.7).
    pub async fn reconcile(&self) {
        let snapshot = self.force_refresh().await;
        let healthy_ids: HashMap<&str, ()> = snapshot
            .iter()
            .filter(|w| w.is_healthy())
            .map(|w| (w.id.as_str(), ()))
            .collect();

        let mut ledger = self.ledger.lock();
        let stale: Vec<String> = ledger
            .workload_to_session
            .keys()
            .filter(|id| !healthy_ids.contains_key(id.as_str()))
            .cloned()
            .collect();
        for workload_id in stale {
            if let Some(session_id) = ledger.workload_to_session.get(&workload_id).cloned() {
                warn!(session_id, workload_id, "evicting allocation for dead workload");
                ledger.remove_by_session(&session_id);
            }
        }
    }

    async fn ensure_snapshot(&self, force: bool) -> Vec<Workload> {
        if !force {
            let cached = self.snapshot.read();
            if let Some(s) = cached.as_ref() {
                if s.taken_at.elapsed() < self.config.snapshot_ttl {
                    return s.workloads.clone();
                }
            }
        }

        let fresh = self.orchestrator.list_containers(None).await;
        let mut guard = self.snapshot.write();
        *guard = Some(Snapshot {
            taken_at: Instant::now(),
            workloads: fresh.clone(),
        });
        fresh
    }

    /// Snapshot of both ledger directions, for property tests only (spec
    /// §8 P1/P2). Never compiled into a release build.
    #[cfg(test)]
    fn ledger_snapshot(&self) -> (HashMap<String, String>, HashMap<String, String>) {
        let ledger = self.ledger.lock();
        (
            ledger.session_to_workload.clone(),
            ledger.workload_to_session.clone(),
        )
    }

    async fn request_scale_up(&self, target_type: &str) {
        self.stats.scale_requests.fetch_add(1, Ordering::Relaxed);
        let service_name = self.config.service_mapping.service_name_for(target_type);
        let orchestrator = self.orchestrator.clone();
        let target_type = target_type.to_string();
        tokio::spawn(async move {
            // desired replica count is a deployment-level policy decision
            // outside this pool's scope; request one extra replica above
            // whatever currently exists is the orchestrator's job to clamp.
            let current = orchestrator
                .list_containers(None)
                .await
                .iter()
                .filter(|w| w.target_type() == target_type)
                .count();
            let _ = orchestrator
                .scale_service(&service_name, (current as u32) + 1)
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gw_common::types::WorkloadStatus;
    use std::sync::atomic::AtomicBool;

    struct MockOrchestrator {
        workloads: Mutex<Vec<Workload>>,
        scale_called: AtomicBool,
    }

    pub(super) fn workload(id: &str, target_type: &str, healthy: bool) -> Workload {
        let mut labels = HashMap::new();
        labels.insert("legacy-use.target-type".to_string(), target_type.to_string());
        labels.insert("legacy-use.scalable".to_string(), "true".to_string());
        Workload {
            id: id.to_string(),
            name: id.to_string(),
            labels,
            status: if healthy {
                WorkloadStatus::Running
            } else {
                WorkloadStatus::Unhealthy
            },
            ip: Some("10.1.2.3".to_string()),
            ports: HashMap::new(),
        }
    }

    #[async_trait]
    impl Orchestrator for MockOrchestrator {
        async fn list_containers(&self, _: Option<HashMap<String, String>>) -> Vec<Workload> {
            self.workloads.lock().clone()
        }
        async fn get_container(&self, id: &str) -> Option<Workload> {
            self.workloads.lock().iter().find(|w| w.id == id).cloned()
        }
        async fn scale_service(&self, _service_name: &str, _replicas: u32) -> bool {
            self.scale_called.store(true, Ordering::Relaxed);
            true
        }
        async fn check_health(&self, _id: &str, _url: &str) -> bool {
            true
        }
    }

    pub(super) fn pool_with(workloads: Vec<Workload>) -> ContainerPool {
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(MockOrchestrator {
            workloads: Mutex::new(workloads),
            scale_called: AtomicBool::new(false),
        });
        ContainerPool::new(orchestrator, PoolConfig::default())
    }

    #[tokio::test]
    async fn allocate_picks_healthy_matching_workload() {
        let pool = pool_with(vec![workload("w1", "wine", true)]);
        let got = pool.allocate("s1", "wine").await;
        assert_eq!(got.unwrap().id, "w1");
    }

    #[tokio::test]
    async fn allocate_skips_unhealthy_workload() {
        let pool = pool_with(vec![workload("w1", "wine", false)]);
        assert!(pool.allocate("s1", "wine").await.is_none());
    }

    #[tokio::test]
    async fn allocate_returns_none_without_capacity_and_triggers_scale() {
        let pool = pool_with(vec![]);
        assert!(pool.allocate("s1", "wine").await.is_none());
    }

    #[tokio::test]
    async fn second_allocate_does_not_reuse_already_bound_workload() {
        let pool = pool_with(vec![workload("w1", "wine", true)]);
        let first = pool.allocate("s1", "wine").await;
        assert!(first.is_some());
        let second = pool.allocate("s2", "wine").await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_then_reallocate_returns_same_workload() {
        let pool = pool_with(vec![workload("w1", "wine", true)]);
        pool.allocate("s1", "wine").await;
        assert!(pool.release("s1"));
        let realloc = pool.allocate("s2", "wine").await;
        assert_eq!(realloc.unwrap().id, "w1");
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = pool_with(vec![workload("w1", "wine", true)]);
        pool.allocate("s1", "wine").await;
        assert!(pool.release("s1"));
        assert!(!pool.release("s1"));
    }

    #[tokio::test]
    async fn allocate_same_session_twice_reuses_allocation() {
        let pool = pool_with(vec![workload("w1", "wine", true)]);
        let first = pool.allocate("s1", "wine").await.unwrap();
        let second = pool.allocate("s1", "wine").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn status_reports_allocated_and_available() {
        let pool = pool_with(vec![workload("w1", "wine", true), workload("w2", "wine", true)]);
        pool.allocate("s1", "wine").await;
        pool.force_refresh().await;
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.allocated, 1);
        assert_eq!(status.available, 1);
    }

    #[tokio::test]
    async fn shutdown_releases_every_allocation() {
        let pool = pool_with(vec![workload("w1", "wine", true), workload("w2", "wine", true)]);
        pool.allocate("s1", "wine").await;
        pool.allocate("s2", "wine").await;
        let released = pool.shutdown();
        assert_eq!(released, 2);
        assert!(pool.get_for_session("s1").await.is_none());
        assert!(pool.get_for_session("s2").await.is_none());
        assert_eq!(pool.shutdown(), 0);
    }
}

/// Property tests for the ledger invariants in spec §8: P1 unique binding,
/// P2 ledger symmetry, P3 no hidden work after release-then-reallocate.
/// Random sequences of allocate/release are replayed against a pool backed
/// by a fixed pool of healthy workloads, checking the invariants after
/// every single operation rather than only at the end.
#[cfg(test)]
mod ledger_properties {
    use super::tests::*;
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Allocate(usize),
        Release(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4).prop_map(Op::Allocate),
            (0usize..4).prop_map(Op::Release),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ledger_stays_symmetric_and_unique_under_random_ops(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let workloads: Vec<Workload> = (0..3)
                .map(|i| workload(&format!("w{i}"), "wine", true))
                .collect();
            let pool = pool_with(workloads);

            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                for op in ops {
                    match op {
                        Op::Allocate(i) => {
                            pool.allocate(&format!("s{i}"), "wine").await;
                        }
                        Op::Release(i) => {
                            pool.release(&format!("s{i}"));
                        }
                    }

                    let (forward, reverse) = pool.ledger_snapshot();

                    // P2: forward and reverse maps are exact inverses.
                    for (session_id, workload_id) in &forward {
                        assert_eq!(reverse.get(workload_id), Some(session_id));
                    }
                    for (workload_id, session_id) in &reverse {
                        assert_eq!(forward.get(session_id), Some(workload_id));
                    }

                    // P1: no workload id appears as a value for two distinct
                    // session ids (implied by HashMap key uniqueness on the
                    // reverse map, checked explicitly against the forward map
                    // to catch any divergence between the two directions).
                    let mut seen = std::collections::HashSet::new();
                    for workload_id in forward.values() {
                        assert!(seen.insert(workload_id.clone()));
                    }
                }
            });
        }

        #[test]
        fn release_then_allocate_finds_a_workload_when_one_is_healthy(session in 0usize..4) {
            let pool = pool_with(vec![workload("w0", "wine", true)]);
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let session_id = format!("s{session}");
                pool.allocate(&session_id, "wine").await;
                pool.release(&session_id);

                // P3: release(s) followed by allocate(s, t) with at least one
                // healthy workload of type t returns a workload.
                let reallocated = pool.allocate(&session_id, "wine").await;
                assert!(reallocated.is_some());
            });
        }
    }
}
