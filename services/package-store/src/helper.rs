//! Shared access to the datastore and object store

use std::sync::Arc;

use camino::Utf8PathBuf;
use datastore::{Datastore, DatastoreError, Entity, Query};
use storage::StorageBucket;

use crate::config::ResolvedConfig;

/// An index entity, reduced to its allocated id and package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Datastore id.
    pub id: i64,
    /// Package name.
    pub name: String,
}

/// Holds the datastore and object store clients for one plugin instance,
/// along with the configuration they were built from.
///
/// Shared by every package handler through an `Arc`.
#[derive(Debug)]
pub struct StorageHelper {
    datastore: Arc<dyn Datastore>,
    bucket: StorageBucket,
    config: ResolvedConfig,
}

impl StorageHelper {
    /// Compose a helper from existing clients.
    pub fn new(datastore: Arc<dyn Datastore>, bucket: StorageBucket, config: ResolvedConfig) -> Self {
        Self {
            datastore,
            bucket,
            config,
        }
    }

    /// The object store bucket.
    pub fn bucket(&self) -> &StorageBucket {
        &self.bucket
    }

    /// The datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// The configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The blob path for a file belonging to a package: `<package>/<file>`.
    pub fn build_blob_path(&self, package: &str, file: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{package}/{file}"))
    }

    /// A query for entities of `kind` whose `name` is `name`. Not executed.
    pub fn query_by_name(&self, kind: &str, name: &str) -> Query {
        Query::new(kind).filter("name", name)
    }

    /// Execute a query, returning every matching entity.
    #[tracing::instrument(skip(self), fields(datastore=self.datastore.name()))]
    pub async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError> {
        let entities = self.datastore.run_query(query).await?;
        tracing::trace!(count = entities.len(), "query results");
        Ok(entities)
    }

    /// List every entity of `kind` as `{id, name}` records.
    ///
    /// Entities without a string `name` or a numeric id are skipped.
    #[tracing::instrument(skip(self), fields(datastore=self.datastore.name()))]
    pub async fn list_entities(&self, kind: &str) -> Result<Vec<IndexRecord>, DatastoreError> {
        let entities = self.run_query(&Query::new(kind)).await?;

        Ok(entities
            .iter()
            .filter_map(|entity| {
                let id = entity.key().as_id()?;
                let name = entity.get("name")?.as_str()?;
                Some(IndexRecord {
                    id,
                    name: name.to_owned(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use datastore::{Key, MemoryDatastore};
    use storage::MemoryStorage;

    use super::*;

    fn helper() -> StorageHelper {
        let storage = storage::Storage::new(MemoryStorage::new());
        StorageHelper::new(
            Arc::new(MemoryDatastore::new()),
            storage.bucket("packages"),
            ResolvedConfig::new("packages"),
        )
    }

    #[test]
    fn blob_paths() {
        let helper = helper();
        assert_eq!(
            helper.build_blob_path("left-pad", "package.json"),
            "left-pad/package.json"
        );
        assert_eq!(
            helper.build_blob_path("@scope/pkg", "pkg-1.0.0.tgz"),
            "@scope/pkg/pkg-1.0.0.tgz"
        );
    }

    #[test]
    fn query_shape() {
        let query = helper().query_by_name("PackageStoreIndex", "left-pad");
        assert_eq!(query.kind(), "PackageStoreIndex");
        assert_eq!(query.filters()[0].property(), "name");
        assert_eq!(query.filters()[0].value(), "left-pad");
    }

    #[tokio::test]
    async fn list_entities_skips_incomplete_rows() {
        let helper = helper();
        let datastore = helper.datastore();

        datastore
            .put(Entity::new(Key::incomplete("PackageStoreIndex")).with("name", "left-pad"))
            .await
            .unwrap();
        datastore
            .put(Entity::new(Key::incomplete("PackageStoreIndex")).with("other", "x"))
            .await
            .unwrap();
        datastore
            .put(Entity::new(Key::name("PackageStoreIndex", "named")).with("name", "named"))
            .await
            .unwrap();
        datastore
            .put(Entity::new(Key::incomplete("PackageStoreIndex")).with("name", 42))
            .await
            .unwrap();

        let records = helper.list_entities("PackageStoreIndex").await.unwrap();
        assert_eq!(
            records,
            vec![IndexRecord {
                id: 1,
                name: "left-pad".into()
            }]
        );

        let found = helper
            .run_query(&helper.query_by_name("PackageStoreIndex", "named"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
