//! Gate persistence
//!
//! Production deployments back [`GateStore`] with a database row per gate and
//! a `version` column. [`InMemoryGateStore`] gives the same compare-and-set
//! semantics for tests and the CLI.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::model::Gate;
use crate::error::StoreError;

#[async_trait::async_trait]
pub trait GateStore: Send + Sync {
    async fn create(&self, gate: Gate) -> Result<Gate, StoreError>;

    async fn find_by_id(&self, gate_id: &str) -> Result<Option<Gate>, StoreError>;

    /// Open gates currently assigned to `assignee`, oldest first
    async fn find_pending_by_assignee(&self, assignee: &str) -> Result<Vec<Gate>, StoreError>;

    /// Every open gate, oldest first
    async fn find_open(&self) -> Result<Vec<Gate>, StoreError>;

    /// Replace the stored gate if its version still equals `gate.version`.
    /// Returns the stored copy with the bumped version.
    async fn update(&self, gate: Gate) -> Result<Gate, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryGateStore {
    gates: RwLock<HashMap<String, Gate>>,
}

impl InMemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.gates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.read().is_empty()
    }

    fn collect_open<F>(&self, filter: F) -> Vec<Gate>
    where
        F: Fn(&Gate) -> bool,
    {
        let mut open: Vec<Gate> = self
            .gates
            .read()
            .values()
            .filter(|g| g.status.is_open() && filter(g))
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        open
    }
}

#[async_trait::async_trait]
impl GateStore for InMemoryGateStore {
    async fn create(&self, gate: Gate) -> Result<Gate, StoreError> {
        let mut gates = self.gates.write();
        if gates.contains_key(&gate.id) {
            return Err(StoreError::Backend(format!("duplicate gate id {}", gate.id)));
        }
        gates.insert(gate.id.clone(), gate.clone());
        Ok(gate)
    }

    async fn find_by_id(&self, gate_id: &str) -> Result<Option<Gate>, StoreError> {
        Ok(self.gates.read().get(gate_id).cloned())
    }

    async fn find_pending_by_assignee(&self, assignee: &str) -> Result<Vec<Gate>, StoreError> {
        Ok(self.collect_open(|g| g.assigned_to == assignee))
    }

    async fn find_open(&self) -> Result<Vec<Gate>, StoreError> {
        Ok(self.collect_open(|_| true))
    }

    async fn update(&self, mut gate: Gate) -> Result<Gate, StoreError> {
        let mut gates = self.gates.write();
        let stored = gates.get_mut(&gate.id).ok_or_else(|| StoreError::NotFound {
            gate_id: gate.id.clone(),
        })?;
        if stored.version != gate.version {
            return Err(StoreError::VersionConflict {
                gate_id: gate.id.clone(),
                expected: gate.version,
                actual: stored.version,
            });
        }
        gate.version += 1;
        *stored = gate.clone();
        Ok(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::model::{CreateGateInput, GateStatus, GateType};
    use chrono::{Duration, TimeZone, Utc};

    fn gate(id: &str, assignee: &str, offset_hours: i64) -> Gate {
        Gate::new(
            id.into(),
            CreateGateInput {
                experiment_id: "exp".into(),
                gate_type: GateType::Launch,
                question: "Launch?".into(),
                assigned_to: assignee.into(),
                escalation_chain: vec![],
                sla_hours: 4.0,
                experiment_title: String::new(),
                outcome_title: String::new(),
            },
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(offset_hours),
        )
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = InMemoryGateStore::new();
        let created = store.create(gate("g1", "alice", 0)).await.unwrap();

        let mut first = created.clone();
        first.status = GateStatus::Approved;
        let saved = store.update(first).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut stale = created;
        stale.status = GateStatus::Rejected;
        let err = store.update(stale).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                gate_id: "g1".into(),
                expected: 0,
                actual: 1
            }
        );
        let stored = store.find_by_id("g1").await.unwrap().unwrap();
        assert_eq!(stored.status, GateStatus::Approved);
    }

    #[tokio::test]
    async fn test_open_queries_skip_terminal_gates() {
        let store = InMemoryGateStore::new();
        store.create(gate("late", "alice", 2)).await.unwrap();
        store.create(gate("early", "alice", 0)).await.unwrap();
        let mut done = store.create(gate("done", "alice", 1)).await.unwrap();
        store.create(gate("other", "bob", 0)).await.unwrap();

        done.status = GateStatus::TimedOut;
        store.update(done).await.unwrap();

        let alice: Vec<String> = store
            .find_pending_by_assignee("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(alice, vec!["early", "late"]);
        assert_eq!(store.find_open().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_and_duplicate() {
        let store = InMemoryGateStore::new();
        assert!(store.find_by_id("nope").await.unwrap().is_none());
        assert!(matches!(
            store.update(gate("nope", "a", 0)).await,
            Err(StoreError::NotFound { .. })
        ));
        store.create(gate("g", "a", 0)).await.unwrap();
        assert!(store.create(gate("g", "a", 0)).await.is_err());
    }
}
