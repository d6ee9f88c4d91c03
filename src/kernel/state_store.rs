//! State store: best-effort envelope snapshotting keyed by a caller-supplied
//! thread id (spec §6.2, wired at §4.1.1 step 10 and §4.1.4).
//!
//! Distinct from `CheckpointStore` (C8): a checkpoint is an explicit,
//! listable point in an envelope's history that can be forked for time
//! travel. A `StateStore` snapshot is a single upsert per thread, meant for
//! resuming a long-lived conversation rather than branching from it.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::types::Result;

/// Narrow persistence contract the runtime depends on (spec §6.2). A
/// concrete embedder may back this with any key-value store;
/// `InMemoryStateStore` is the fallback used when none is configured.
#[async_trait]
pub trait StateStore: std::fmt::Debug + Send + Sync {
    /// Upsert a snapshot for `thread_id`. Best-effort: callers log a failure
    /// rather than treat it as fatal (spec §4.1.1 step 10).
    async fn save(&self, thread_id: &str, envelope_snapshot: serde_json::Value) -> Result<()>;

    /// Returns `None` if no snapshot has been saved for `thread_id`.
    async fn load(&self, thread_id: &str) -> Result<Option<serde_json::Value>>;
}

/// In-memory state store. Acceptable per spec §4.7 as the fallback when no
/// external store is configured; not durable across process restart.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    snapshots: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, thread_id: &str, envelope_snapshot: serde_json::Value) -> Result<()> {
        self.snapshots.lock().await.insert(thread_id.to_string(), envelope_snapshot);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.snapshots.lock().await.get(thread_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryStateStore::new();
        store.save("thread-1", json!({"stage": "plan"})).await.unwrap();
        let loaded = store.load("thread-1").await.unwrap();
        assert_eq!(loaded, Some(json!({"stage": "plan"})));
    }

    #[tokio::test]
    async fn load_missing_thread_returns_none() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_upserts_the_same_thread() {
        let store = InMemoryStateStore::new();
        store.save("thread-1", json!({"stage": "plan"})).await.unwrap();
        store.save("thread-1", json!({"stage": "execute"})).await.unwrap();
        assert_eq!(store.load("thread-1").await.unwrap(), Some(json!({"stage": "execute"})));
    }
}
