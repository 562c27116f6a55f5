//! The registry-wide index of packages

use std::sync::Arc;

use datastore::{Entity, Key};
use secret::Secret;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::error::{ConfigError, PackageError, PackageResult};
use crate::handler::PackageStorageHandler;
use crate::helper::StorageHelper;

/// Entity kind of the signing secret.
pub const SECRET_KIND: &str = "Secret";

/// Entity name of the signing secret.
pub const SECRET_NAME: &str = "secret";

/// Property holding the signing secret.
const SECRET_PROPERTY: &str = "secret";

/// The registry-wide view of the store: which packages exist, the token
/// signing secret, and handlers for individual packages.
#[derive(Debug, Clone)]
pub struct RegistryIndex {
    helper: Arc<StorageHelper>,
}

impl RegistryIndex {
    /// Wrap an existing helper.
    pub fn new(helper: Arc<StorageHelper>) -> Self {
        Self { helper }
    }

    /// Build the datastore and object store described by `config`.
    ///
    /// The project id scopes the datastore namespace.
    #[tracing::instrument(skip(config), fields(bucket = %config.bucket))]
    pub fn from_config(config: ResolvedConfig) -> Result<Self, ConfigError> {
        let namespace = Some(config.project_id.as_str()).filter(|project| !project.is_empty());
        let datastore = config.datastore.clone().build(namespace);
        let storage = config.storage.clone().build()?;
        let bucket = storage.bucket(config.bucket.clone());

        tracing::debug!(
            datastore = datastore.name(),
            storage = storage.name(),
            "Package store ready"
        );
        Ok(Self::new(Arc::new(StorageHelper::new(
            datastore, bucket, config,
        ))))
    }

    /// The shared helper.
    pub fn helper(&self) -> &Arc<StorageHelper> {
        &self.helper
    }

    fn kind(&self) -> &str {
        &self.helper.config().kind
    }

    /// Record a package name in the index.
    ///
    /// Adding the same name twice records it twice.
    #[tracing::instrument(skip(self))]
    pub async fn add(&self, name: &str) -> PackageResult<()> {
        let entity = Entity::new(Key::incomplete(self.kind())).with("name", name);
        let key = self.helper.datastore().put(entity).await.map_err(|error| {
            tracing::error!("Adding package failed: {error}");
            PackageError::internal(&error)
        })?;

        tracing::debug!(%key, "Package added");
        Ok(())
    }

    /// Remove every index entry for a package name.
    ///
    /// Entries are found by listing the whole index, then deleted by id.
    /// A failed deletion does not stop the others; the first failure is
    /// reported once all have been attempted.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> PackageResult<()> {
        let records = self.helper.list_entities(self.kind()).await.map_err(|error| {
            tracing::error!("Listing packages failed: {error}");
            PackageError::internal(&error)
        })?;

        let mut first_failure = None;
        let mut removed = 0usize;
        for record in records.iter().filter(|record| record.name == name) {
            let key = Key::id(self.kind(), record.id);
            match self.helper.datastore().delete(&key).await {
                Ok(()) => removed += 1,
                Err(error) => {
                    tracing::warn!(%key, "Removing index entry failed: {error}");
                    first_failure.get_or_insert(PackageError::internal(&error));
                }
            }
        }

        tracing::debug!(removed, "Package removed from index");
        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Every package name in the index, in backend order.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> PackageResult<Vec<String>> {
        let query = datastore::Query::new(self.kind());
        let entities = self.helper.run_query(&query).await.map_err(|error| {
            tracing::error!("Listing packages failed: {error}");
            PackageError::internal(&error)
        })?;

        let names: Vec<String> = entities
            .iter()
            .filter_map(|entity| entity.get("name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        tracing::trace!(?names, "Listed packages");
        Ok(names)
    }

    fn secret_key() -> Key {
        Key::name(SECRET_KIND, SECRET_NAME)
    }

    /// The token signing secret, if one has been set.
    #[tracing::instrument(skip(self))]
    pub async fn get_secret(&self) -> PackageResult<Option<Secret>> {
        let entity = self
            .helper
            .datastore()
            .get(&Self::secret_key())
            .await
            .map_err(|error| {
                tracing::error!("Reading secret failed: {error}");
                PackageError::internal(&error)
            })?;

        let Some(value) = entity.and_then(|entity| entity.get(SECRET_PROPERTY).cloned()) else {
            tracing::debug!("No secret stored");
            return Ok(None);
        };

        serde_json::from_value(value).map(Some).map_err(|error| {
            tracing::error!("Stored secret is malformed: {error}");
            PackageError::internal(error)
        })
    }

    /// Store the token signing secret, replacing any previous one.
    #[tracing::instrument(skip(self, secret))]
    pub async fn set_secret(&self, secret: &Secret) -> PackageResult<()> {
        let value = serde_json::to_value(secret).map_err(PackageError::internal)?;
        let entity = Entity::new(Self::secret_key()).with(SECRET_PROPERTY, value);
        self.helper.datastore().put(entity).await.map_err(|error| {
            tracing::error!("Storing secret failed: {error}");
            PackageError::internal(&error)
        })?;

        tracing::debug!("Secret stored");
        Ok(())
    }

    /// A handler for one package.
    pub fn get_package_storage(&self, name: &str) -> PackageStorageHandler {
        PackageStorageHandler::new(name, self.helper.clone())
    }

    /// Search is not supported.
    pub async fn search(&self, query: &str) -> PackageResult<Vec<String>> {
        tracing::warn!(%query, "search has not been implemented");
        Err(PackageError::not_implemented("search"))
    }

    /// Token storage is not supported.
    pub async fn save_token(&self, user: &str, token: &Secret) -> PackageResult<()> {
        tracing::warn!(%user, ?token, "save token has not been implemented");
        Err(PackageError::not_implemented("saveToken"))
    }

    /// Token storage is not supported.
    pub async fn delete_token(&self, user: &str, token_key: &str) -> PackageResult<()> {
        tracing::warn!(%user, %token_key, "delete token has not been implemented");
        Err(PackageError::not_implemented("deleteToken"))
    }

    /// Token storage is not supported.
    pub async fn read_tokens(&self, user: &str) -> PackageResult<Vec<Secret>> {
        tracing::warn!(%user, "read tokens has not been implemented");
        Err(PackageError::not_implemented("readTokens"))
    }

    /// Replication is not supported.
    pub async fn sync(&self) -> PackageResult<()> {
        tracing::warn!("sync has not been implemented");
        Err(PackageError::not_implemented("sync"))
    }
}
