//! Checkpoint store (spec §4.4, §6.2, C8).
//!
//! Persists envelope snapshots keyed by `(envelope_id, checkpoint_id)`. The
//! checkpoint record is a tree rooted at the initial snapshot; `fork` creates
//! a sibling snapshot under a new envelope id, which is the time-travel
//! primitive used for divergent replay (spec §4.4, scenario S6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::types::{CheckpointId, EnvelopeId, Error, Result};

/// A single persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: CheckpointId,
    pub envelope_id: EnvelopeId,
    pub agent_name: String,
    pub stage_order: i64,
    pub state: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub parent_checkpoint_id: Option<CheckpointId>,
    pub created_at: DateTime<Utc>,
}

/// Narrow persistence contract the runtime and the kernel depend on
/// (spec §4.4). A concrete embedder may back this with any relational or
/// document store; `InMemoryCheckpointStore` is the fallback used when none
/// is configured.
#[async_trait]
pub trait CheckpointStore: std::fmt::Debug + Send + Sync {
    async fn save(
        &self,
        envelope_id: &EnvelopeId,
        checkpoint_id: &CheckpointId,
        agent_name: &str,
        state: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<CheckpointRecord>;

    async fn load(&self, checkpoint_id: &CheckpointId) -> Result<serde_json::Value>;

    async fn list(&self, envelope_id: &EnvelopeId, limit: Option<usize>) -> Result<Vec<CheckpointRecord>>;

    async fn delete(&self, envelope_id: &EnvelopeId, before_checkpoint_id: Option<&CheckpointId>) -> Result<usize>;

    async fn fork(&self, checkpoint_id: &CheckpointId, new_envelope_id: &EnvelopeId) -> Result<CheckpointId>;
}

/// In-memory checkpoint store. Acceptable per spec §4.7/§4.4 as the fallback
/// when no external store is configured; not durable across process restart.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: Mutex<HashMap<CheckpointId, CheckpointRecord>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        envelope_id: &EnvelopeId,
        checkpoint_id: &CheckpointId,
        agent_name: &str,
        state: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<CheckpointRecord> {
        let mut records = self.records.lock().await;

        let stage_order = records
            .values()
            .filter(|r| &r.envelope_id == envelope_id)
            .map(|r| r.stage_order)
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);

        let parent_checkpoint_id = records.get(checkpoint_id).and_then(|r| r.parent_checkpoint_id.clone());

        let record = CheckpointRecord {
            checkpoint_id: checkpoint_id.clone(),
            envelope_id: envelope_id.clone(),
            agent_name: agent_name.to_string(),
            stage_order,
            state,
            metadata,
            parent_checkpoint_id,
            created_at: Utc::now(),
        };

        records.insert(checkpoint_id.clone(), record.clone());
        Ok(record)
    }

    async fn load(&self, checkpoint_id: &CheckpointId) -> Result<serde_json::Value> {
        let records = self.records.lock().await;
        records
            .get(checkpoint_id)
            .map(|r| r.state.clone())
            .ok_or_else(|| Error::not_found(format!("unknown checkpoint: {checkpoint_id}")))
    }

    async fn list(&self, envelope_id: &EnvelopeId, limit: Option<usize>) -> Result<Vec<CheckpointRecord>> {
        let records = self.records.lock().await;
        let mut matching: Vec<CheckpointRecord> = records
            .values()
            .filter(|r| &r.envelope_id == envelope_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.stage_order);
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn delete(&self, envelope_id: &EnvelopeId, before_checkpoint_id: Option<&CheckpointId>) -> Result<usize> {
        let mut records = self.records.lock().await;

        let cutoff = before_checkpoint_id.and_then(|id| records.get(id)).map(|r| r.stage_order);

        let to_remove: Vec<CheckpointId> = records
            .values()
            .filter(|r| &r.envelope_id == envelope_id)
            .filter(|r| cutoff.map(|c| r.stage_order < c).unwrap_or(true))
            .map(|r| r.checkpoint_id.clone())
            .collect();

        let count = to_remove.len();
        for id in to_remove {
            records.remove(&id);
        }
        Ok(count)
    }

    async fn fork(&self, checkpoint_id: &CheckpointId, new_envelope_id: &EnvelopeId) -> Result<CheckpointId> {
        let mut records = self.records.lock().await;

        let source = records
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown checkpoint: {checkpoint_id}")))?;

        let new_checkpoint_id = CheckpointId::new();
        let forked = CheckpointRecord {
            checkpoint_id: new_checkpoint_id.clone(),
            envelope_id: new_envelope_id.clone(),
            agent_name: source.agent_name.clone(),
            stage_order: source.stage_order,
            state: source.state.clone(),
            metadata: source.metadata.clone(),
            parent_checkpoint_id: Some(checkpoint_id.clone()),
            created_at: Utc::now(),
        };

        records.insert(new_checkpoint_id.clone(), forked);
        Ok(new_checkpoint_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let envelope_id = EnvelopeId::must("e1");
        let checkpoint_id = CheckpointId::must("c1");

        store
            .save(&envelope_id, &checkpoint_id, "planner", json!({"ok": true}), None)
            .await
            .unwrap();

        let loaded = store.load(&checkpoint_id).await.unwrap();
        assert_eq!(loaded, json!({"ok": true}));
    }

    #[tokio::test]
    async fn load_missing_checkpoint_errors() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load(&CheckpointId::must("missing")).await.is_err());
    }

    #[tokio::test]
    async fn list_orders_by_stage_order_ascending() {
        let store = InMemoryCheckpointStore::new();
        let envelope_id = EnvelopeId::must("e1");

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let checkpoint_id = CheckpointId::must(format!("c{i}"));
            store
                .save(&envelope_id, &checkpoint_id, name, json!({"stage": name}), None)
                .await
                .unwrap();
        }

        let records = store.list(&envelope_id, None).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].stage_order <= w[1].stage_order));
    }

    #[tokio::test]
    async fn fork_creates_sibling_with_parent_pointer() {
        let store = InMemoryCheckpointStore::new();
        let envelope_id = EnvelopeId::must("e1");
        let checkpoint_id = CheckpointId::must("c1");
        store
            .save(&envelope_id, &checkpoint_id, "planner", json!({"ok": true}), None)
            .await
            .unwrap();

        let new_envelope_id = EnvelopeId::must("e2");
        let forked_id = store.fork(&checkpoint_id, &new_envelope_id).await.unwrap();

        let forked_state = store.load(&forked_id).await.unwrap();
        let original_state = store.load(&checkpoint_id).await.unwrap();
        assert_eq!(forked_state, original_state);

        let records = store.list(&new_envelope_id, None).await.unwrap();
        assert_eq!(records[0].parent_checkpoint_id.as_ref(), Some(&checkpoint_id));
    }

    #[tokio::test]
    async fn delete_purges_older_than_supplied_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let envelope_id = EnvelopeId::must("e1");

        let mut ids = Vec::new();
        for i in 0..3 {
            let checkpoint_id = CheckpointId::must(format!("c{i}"));
            store
                .save(&envelope_id, &checkpoint_id, "agent", json!({"i": i}), None)
                .await
                .unwrap();
            ids.push(checkpoint_id);
        }

        let removed = store.delete(&envelope_id, Some(&ids[2])).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = store.list(&envelope_id, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].checkpoint_id, ids[2]);
    }
}
