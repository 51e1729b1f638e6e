//! Generic entity store abstraction.
//!
//! The durable store for subscriptions, workflow instances, and deferred
//! edges is abstracted behind [`EntityStore`] rather than tied to a
//! specific database driver, since persistence is an external collaborator
//! this workspace doesn't own. [`MemoryEntityStore`] is the in-memory
//! implementation used by every test in this workspace.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Error type for entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No entity with the given id exists.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A durable keyed store for a single entity kind.
///
/// Implementations must be safe to share across concurrent readers and
/// writers; the in-process implementation here uses a single
/// reader-writer lock, but a production backend is free to use whatever
/// transactional storage it likes as long as `put`/`delete` are
/// atomic per key.
#[async_trait]
pub trait EntityStore<T>: Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetch an entity by id.
    async fn get(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Insert or replace an entity.
    async fn put(&self, id: &str, value: T) -> Result<(), StoreError>;

    /// Remove an entity; no-op if it doesn't exist.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// List all entities currently stored.
    async fn list(&self) -> Result<Vec<T>, StoreError>;
}

/// In-memory [`EntityStore`], used in tests and as a reference
/// implementation.
pub struct MemoryEntityStore<T> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T> MemoryEntityStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemoryEntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> EntityStore<T> for MemoryEntityStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.entries.read().get(id).cloned())
    }

    async fn put(&self, id: &str, value: T) -> Result<(), StoreError> {
        self.entries.write().insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.entries.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store: MemoryEntityStore<String> = MemoryEntityStore::new();
        store.put("a", "hello".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("hello".to_string()));
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_all_entries() {
        let store: MemoryEntityStore<i32> = MemoryEntityStore::new();
        store.put("a", 1).await.unwrap();
        store.put("b", 2).await.unwrap();
        let mut values = store.list().await.unwrap();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }
}
