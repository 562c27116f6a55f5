use tokio::sync::RwLock;

use crate::error::{DatastoreError, DatastoreErrorKind};
use crate::key::{Entity, Key, Query};
use crate::table::Table;
use crate::Datastore;

/// Datastore which keeps entities in memory.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    namespace: Option<String>,
    table: RwLock<Table>,
}

impl MemoryDatastore {
    /// Create an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty datastore scoped to a namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            table: RwLock::default(),
        }
    }

    /// The namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

pub(crate) fn require_complete(engine: &'static str, key: &Key) -> Result<(), DatastoreError> {
    if key.is_complete() {
        Ok(())
    } else {
        Err(
            DatastoreError::new(engine, DatastoreErrorKind::InvalidRequest, "incomplete key")
                .entity(key),
        )
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>, DatastoreError> {
        require_complete(self.name(), key)?;
        Ok(self.table.read().await.get(key))
    }

    async fn put(&self, entity: Entity) -> Result<Key, DatastoreError> {
        let key = self.table.write().await.put(entity);
        tracing::trace!(%key, namespace = ?self.namespace, "put entity");
        Ok(key)
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        require_complete(self.name(), key)?;
        let removed = self.table.write().await.delete(key);
        tracing::trace!(%key, removed, "delete entity");
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError> {
        Ok(self.table.read().await.query(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryDatastore::with_namespace("project");
        assert_eq!(store.namespace(), Some("project"));

        let key = store
            .put(Entity::new(Key::incomplete("PackageStoreIndex")).with("name", "left-pad"))
            .await
            .unwrap();
        assert!(key.is_complete());

        let entity = store.get(&key).await.unwrap().unwrap();
        assert_eq!(entity.get("name"), Some(&"left-pad".into()));

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());

        // Deleting again is not an error.
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn upsert_by_name() {
        let store = MemoryDatastore::new();
        let key = Key::name("Secret", "secret");

        store
            .put(Entity::new(key.clone()).with("secret", "abc"))
            .await
            .unwrap();
        store
            .put(Entity::new(key.clone()).with("secret", "xyz"))
            .await
            .unwrap();

        let found = store.run_query(&Query::new("Secret")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("secret"), Some(&"xyz".into()));
    }

    #[tokio::test]
    async fn incomplete_key_rejected() {
        let store = MemoryDatastore::new();
        let err = store
            .get(&Key::incomplete("PackageStoreIndex"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DatastoreErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn query_filters() {
        let store = MemoryDatastore::new();
        for name in ["a", "b", "a"] {
            store
                .put(Entity::new(Key::incomplete("PackageStoreIndex")).with("name", name))
                .await
                .unwrap();
        }

        let all = store
            .run_query(&Query::new("PackageStoreIndex"))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let only_a = store
            .run_query(&Query::new("PackageStoreIndex").filter("name", "a"))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
    }
}
