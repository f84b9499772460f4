//! Dual-generation store selection
//!
//! During a store migration, reads must transparently fall back from the
//! current store to the previous generation, and writes must land wherever
//! the record already lives so migrated-but-stale records never fork. The
//! fallback policy lives here and nowhere else.

use std::sync::Arc;

use capstan_core::domain::ExecutionType;

use crate::error::{RepositoryError, RepositoryResult};
use crate::kv::KeyValueStore;
use crate::repository::execution_key;

/// The configured store generations: the current store and, while a
/// migration is in flight, the previous one.
#[derive(Clone)]
pub struct StoreGenerations {
    current: Arc<dyn KeyValueStore>,
    previous: Option<Arc<dyn KeyValueStore>>,
}

impl StoreGenerations {
    pub fn new(current: Arc<dyn KeyValueStore>) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    pub fn with_previous(
        current: Arc<dyn KeyValueStore>,
        previous: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            current,
            previous: Some(previous),
        }
    }

    pub fn current(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.current)
    }

    /// Every generation, current first. Bulk scans merge results across all
    /// of these.
    pub fn all(&self) -> Vec<Arc<dyn KeyValueStore>> {
        let mut stores = vec![Arc::clone(&self.current)];
        if let Some(previous) = &self.previous {
            stores.push(Arc::clone(previous));
        }
        stores
    }

    /// The generation holding `id`, preferring current. Unknown ids resolve
    /// to current, so new records always land there.
    pub async fn store_for(
        &self,
        execution_type: ExecutionType,
        id: &str,
    ) -> RepositoryResult<Arc<dyn KeyValueStore>> {
        let Some(previous) = &self.previous else {
            return Ok(Arc::clone(&self.current));
        };

        let key = execution_key(execution_type, id);
        if self.current.exists(&key).await? {
            return Ok(Arc::clone(&self.current));
        }
        if previous.exists(&key).await? {
            return Ok(Arc::clone(previous));
        }
        Ok(Arc::clone(&self.current))
    }

    /// The generation holding `key`, preferring current; unknown keys
    /// resolve to current.
    pub async fn store_for_key(&self, key: &str) -> RepositoryResult<Arc<dyn KeyValueStore>> {
        let Some(previous) = &self.previous else {
            return Ok(Arc::clone(&self.current));
        };

        if self.current.exists(key).await? {
            return Ok(Arc::clone(&self.current));
        }
        if previous.exists(key).await? {
            return Ok(Arc::clone(previous));
        }
        Ok(Arc::clone(&self.current))
    }

    /// Finds an execution by id alone, probing both key shapes across both
    /// generations. Fails with NotFound when no generation holds the id.
    pub async fn locate(
        &self,
        id: &str,
    ) -> RepositoryResult<(ExecutionType, String, Arc<dyn KeyValueStore>)> {
        for store in self.all() {
            for execution_type in [ExecutionType::Pipeline, ExecutionType::Orchestration] {
                let key = execution_key(execution_type, id);
                if store.exists(&key).await? {
                    return Ok((execution_type, key, store));
                }
            }
        }
        Err(RepositoryError::NotFoundAny(format!("with id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryStore, WriteBatch};
    use std::collections::HashMap;

    async fn seed(store: &MemoryStore, key: &str) {
        let mut fields = HashMap::new();
        fields.insert("application".to_string(), "myapp".to_string());
        let mut batch = WriteBatch::new();
        batch.hash_set(key, fields);
        store.write(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_generation_always_current() {
        let current = Arc::new(MemoryStore::new());
        let generations = StoreGenerations::new(current.clone());

        let store = generations
            .store_for(ExecutionType::Pipeline, "unknown")
            .await
            .unwrap();
        seed_dyn(store.as_ref(), "pipeline:unknown").await;
        assert!(current.exists("pipeline:unknown").await.unwrap());
    }

    async fn seed_dyn(store: &dyn KeyValueStore, key: &str) {
        let mut fields = HashMap::new();
        fields.insert("application".to_string(), "myapp".to_string());
        let mut batch = WriteBatch::new();
        batch.hash_set(key, fields);
        store.write(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_fallback_prefers_current() {
        let current = Arc::new(MemoryStore::new());
        let previous = Arc::new(MemoryStore::new());
        seed(&current, "pipeline:both").await;
        seed(&previous, "pipeline:both").await;
        seed(&previous, "pipeline:old-only").await;

        let generations = StoreGenerations::with_previous(current.clone(), previous.clone());

        let resolved = generations
            .store_for(ExecutionType::Pipeline, "both")
            .await
            .unwrap();
        assert!(resolved.exists("pipeline:both").await.unwrap());

        let resolved = generations
            .store_for(ExecutionType::Pipeline, "old-only")
            .await
            .unwrap();
        // Resolves to the previous generation, where the record lives.
        assert!(resolved.exists("pipeline:old-only").await.unwrap());
        assert!(!current.exists("pipeline:old-only").await.unwrap());
    }

    #[tokio::test]
    async fn test_locate_probes_both_shapes() {
        let current = Arc::new(MemoryStore::new());
        let previous = Arc::new(MemoryStore::new());
        seed(&previous, "orchestration:x").await;

        let generations = StoreGenerations::with_previous(current, previous);
        let (execution_type, key, _) = generations.locate("x").await.unwrap();
        assert_eq!(execution_type, ExecutionType::Orchestration);
        assert_eq!(key, "orchestration:x");

        assert!(generations.locate("missing").await.is_err());
    }
}
