//! # Document datastore
//!
//! A small schemaless document store contract: entities addressed by a
//! [`Key`] (kind plus numeric id or name), holding JSON properties, and
//! queried by kind with equality filters.
//!
//! Backends implement [`Datastore`]. [`MemoryDatastore`] keeps everything in
//! memory and [`LocalDatastore`] persists to a JSON file.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Deserialize;

mod error;
mod key;
mod local;
mod memory;
mod table;

pub use error::{DatastoreError, DatastoreErrorKind};
pub use key::{Entity, Filter, Key, KeyId, Query};
pub use local::LocalDatastore;
pub use memory::MemoryDatastore;

/// A document datastore.
#[async_trait::async_trait]
pub trait Datastore: fmt::Debug + Send + Sync {
    /// The name of the backend, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Fetch one entity. Missing entities are `None`, not an error.
    async fn get(&self, key: &Key) -> Result<Option<Entity>, DatastoreError>;

    /// Insert or replace an entity.
    ///
    /// An incomplete key is given a freshly allocated numeric id; the
    /// complete key is returned.
    async fn put(&self, entity: Entity) -> Result<Key, DatastoreError>;

    /// Delete one entity. Deleting a missing entity succeeds.
    async fn delete(&self, key: &Key) -> Result<(), DatastoreError>;

    /// Run a query, returning every matching entity in key order.
    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError>;
}

#[async_trait::async_trait]
impl<D> Datastore for Arc<D>
where
    D: Datastore + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>, DatastoreError> {
        (**self).get(key).await
    }

    async fn put(&self, entity: Entity) -> Result<Key, DatastoreError> {
        (**self).put(entity).await
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        (**self).delete(key).await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError> {
        (**self).run_query(query).await
    }
}

/// Which datastore backend to use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "driver")]
pub enum DatastoreConfig {
    /// Keep entities in memory.
    #[default]
    Memory,

    /// Persist entities to a JSON file.
    Local {
        /// File path.
        path: Utf8PathBuf,
    },
}

impl DatastoreConfig {
    /// Construct the configured datastore, scoped to `namespace` if given.
    #[tracing::instrument]
    pub fn build(self, namespace: Option<&str>) -> Arc<dyn Datastore> {
        match (self, namespace) {
            (DatastoreConfig::Memory, Some(namespace)) => {
                Arc::new(MemoryDatastore::with_namespace(namespace))
            }
            (DatastoreConfig::Memory, None) => Arc::new(MemoryDatastore::new()),
            (DatastoreConfig::Local { path }, Some(namespace)) => {
                Arc::new(LocalDatastore::new(path).with_namespace(namespace))
            }
            (DatastoreConfig::Local { path }, None) => Arc::new(LocalDatastore::new(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Datastore);

    #[test]
    fn deserialize_config() {
        let config: DatastoreConfig =
            serde_json::from_str(r#"{"driver": "local", "path": "/var/lib/index.json"}"#).unwrap();
        assert!(matches!(config, DatastoreConfig::Local { .. }));

        let config: DatastoreConfig = serde_json::from_str(r#"{"driver": "memory"}"#).unwrap();
        assert!(matches!(config, DatastoreConfig::Memory));
    }

    #[tokio::test]
    async fn build_memory() {
        let store = DatastoreConfig::Memory.build(Some("project"));
        assert_eq!(store.name(), "memory");
        let key = store
            .put(Entity::new(Key::incomplete("PackageStoreIndex")))
            .await
            .unwrap();
        assert!(key.is_complete());
    }
}
