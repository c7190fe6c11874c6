use crate::chord::types::{between, Key, NodeId, Value};
use crate::error::StorageError;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Local key-value state of a node.
///
/// `primary` holds the keys this node owns. `backup` mirrors the primary of
/// the node's predecessor and is only read as a replica, never as the source
/// of truth while that predecessor is reachable. Each mapping has its own lock.
#[derive(Debug, Default)]
pub struct DataStore {
    primary: RwLock<HashMap<Key, Value>>,
    backup: RwLock<HashMap<Key, Value>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &Key) -> Result<Value, StorageError> {
        self.primary
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    pub async fn put(&self, key: Key, value: Value) {
        self.primary.write().await.insert(key, value);
    }

    pub async fn get_backup(&self, key: &Key) -> Result<Value, StorageError> {
        self.backup
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    pub async fn put_backup(&self, key: Key, value: Value) {
        self.backup.write().await.insert(key, value);
    }

    pub async fn remove_backup(&self, key: &Key) -> Option<Value> {
        self.backup.write().await.remove(key)
    }

    pub async fn clear_backup(&self) {
        self.backup.write().await.clear();
    }

    /// Copies every primary pair whose hashed key lies in `(from, to]`.
    pub async fn range(&self, from: &NodeId, to: &NodeId, width: usize) -> Vec<(Key, Value)> {
        self.primary
            .read()
            .await
            .iter()
            .filter(|(k, _)| between(from, &NodeId::from_key(k, width), to, false, true))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Removes `key` from the primary unless it was overwritten with a value
    /// other than `value` in the meantime.
    pub async fn remove_if_unchanged(&self, key: &Key, value: &Value) -> bool {
        let mut primary = self.primary.write().await;
        if primary.get(key) == Some(value) {
            primary.remove(key);
            true
        } else {
            false
        }
    }

    /// Moves the whole backup mapping into the primary and returns the moved
    /// pairs. Existing primary values win over backup copies.
    pub async fn promote_backup(&self) -> Vec<(Key, Value)> {
        let drained: Vec<(Key, Value)> = self.backup.write().await.drain().collect();
        let mut primary = self.primary.write().await;
        for (k, v) in &drained {
            primary.entry(k.clone()).or_insert_with(|| v.clone());
        }
        drained
    }

    pub async fn snapshot(&self) -> Vec<(Key, Value)> {
        self.primary
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn backup_snapshot(&self) -> Vec<(Key, Value)> {
        self.backup
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.primary.read().await.len()
    }

    pub async fn backup_len(&self) -> usize {
        self.backup.read().await.len()
    }
}
