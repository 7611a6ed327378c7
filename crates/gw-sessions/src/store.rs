use async_trait::async_trait;
use dashmap::DashMap;
use gw_common::types::{Session, Target};

/// The narrow query surface this workspace needs from the external session
/// store (spec §1 "Out of scope"): enough to read/write a `Session` record
/// by id, nothing about how it is persisted. Production deployments back
/// this with the relational store the sessions API already uses;
/// `InMemorySessionStore` below is the harness this crate's own tests run
/// against.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Session>;
    async fn put(&self, session: Session);
    async fn remove(&self, id: &str) -> Option<Session>;
    async fn list_active(&self) -> Vec<Session>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    async fn put(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    async fn list_active(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| !s.state.is_terminal())
            .map(|s| s.clone())
            .collect()
    }
}

/// Read-only lookup of the `Target` descriptors a session's `target_id`
/// points at (spec §3 "Target"). Part of the same narrow C3 query surface
/// as `SessionStore`; production deployments back this with the same
/// relational store, queried read-only here.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Target>;
}

#[derive(Default)]
pub struct InMemoryTargetStore {
    targets: DashMap<String, Target>,
}

impl InMemoryTargetStore {
    pub fn insert(&self, target: Target) {
        self.targets.insert(target.id.clone(), target);
    }
}

#[async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn get(&self, id: &str) -> Option<Target> {
        self.targets.get(id).map(|t| t.clone())
    }
}
