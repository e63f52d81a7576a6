//! # In-Memory Entity Store
//!
//! DashMap-backed implementation of the entity store adapter. Versions are a
//! per-record counter bumped on every committed write; compare-and-swap is
//! evaluated under the shard lock for the key, which is what makes the
//! optimistic-concurrency protocol sound without any global lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{QueueError, Result};
use crate::store::{EntityStore, SwapOutcome, Versioned};

/// Concurrent keyed table of versioned records.
#[derive(Debug)]
pub struct MemoryTable<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    records: DashMap<K, Versioned<V>>,
}

impl<K, V> MemoryTable<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K, V> Default for MemoryTable<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> EntityStore<K, V> for MemoryTable<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn create(&self, key: K, value: V) -> Result<Versioned<V>> {
        match self.records.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Err(QueueError::conflict(format!(
                "record {:?} already exists",
                entry.key(),
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let versioned = Versioned { value, version: 1 };
                entry.insert(versioned.clone());
                Ok(versioned)
            }
        }
    }

    async fn load(&self, key: &K) -> Result<Option<Versioned<V>>> {
        Ok(self.records.get(key).map(|entry| entry.clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &K,
        expected_version: u64,
        value: V,
    ) -> Result<SwapOutcome> {
        match self.records.get_mut(key) {
            None => Ok(SwapOutcome::Missing),
            Some(mut entry) => {
                if entry.version != expected_version {
                    return Ok(SwapOutcome::VersionMismatch);
                }
                let version = entry.version + 1;
                *entry = Versioned { value, version };
                Ok(SwapOutcome::Applied(version))
            }
        }
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn entries(&self) -> Result<Vec<(K, V)>> {
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_load() {
        let table: MemoryTable<String, String> = MemoryTable::new();
        table
            .create("k".to_string(), "v".to_string())
            .await
            .unwrap();
        let loaded = table.load(&"k".to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.value, "v");
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_double_create_conflicts() {
        let table: MemoryTable<String, u32> = MemoryTable::new();
        table.create("k".to_string(), 1).await.unwrap();
        let err = table.create("k".to_string(), 2).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_cas_version_mismatch() {
        let table: MemoryTable<String, u32> = MemoryTable::new();
        table.create("k".to_string(), 1).await.unwrap();
        assert_eq!(
            table.compare_and_swap(&"k".to_string(), 1, 2).await.unwrap(),
            SwapOutcome::Applied(2),
        );
        assert_eq!(
            table.compare_and_swap(&"k".to_string(), 1, 3).await.unwrap(),
            SwapOutcome::VersionMismatch,
        );
        let loaded = table.load(&"k".to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.value, 2);
    }

    #[tokio::test]
    async fn test_cas_missing() {
        let table: MemoryTable<String, u32> = MemoryTable::new();
        assert_eq!(
            table.compare_and_swap(&"k".to_string(), 1, 2).await.unwrap(),
            SwapOutcome::Missing,
        );
    }

    #[tokio::test]
    async fn test_remove_and_entries() {
        let table: MemoryTable<String, u32> = MemoryTable::new();
        table.create("a".to_string(), 1).await.unwrap();
        table.create("b".to_string(), 2).await.unwrap();
        assert_eq!(table.entries().await.unwrap().len(), 2);
        assert!(table.remove(&"a".to_string()).await.unwrap());
        assert!(!table.remove(&"a".to_string()).await.unwrap());
        assert_eq!(table.len(), 1);
    }
}
