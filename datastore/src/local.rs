use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Mutex;

use crate::error::{DatastoreError, DatastoreErrorKind};
use crate::key::{Entity, Key, Query};
use crate::memory::require_complete;
use crate::table::Table;
use crate::Datastore;

/// Datastore which persists entities to a single JSON file.
///
/// The file is loaded on first use and rewritten after every mutation by
/// writing a sibling file and renaming it over the original.
#[derive(Debug)]
pub struct LocalDatastore {
    path: Utf8PathBuf,
    namespace: Option<String>,
    table: Mutex<Option<Table>>,
}

impl LocalDatastore {
    /// A datastore backed by the file at `path`. The file need not exist.
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            namespace: None,
            table: Mutex::new(None),
        }
    }

    /// Scope the datastore to a namespace.
    ///
    /// Each namespace is stored in its own file next to `path`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let stem = self.path.file_stem().unwrap_or("datastore");
        let file = format!("{stem}.{namespace}.json");
        self.path = self.path.with_file_name(file);
        self.namespace = Some(namespace);
        self
    }

    /// The backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    async fn load(&self) -> Result<Table, DatastoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|err| {
                DatastoreError::new(self.name(), DatastoreErrorKind::Corrupt, err)
                    .context(format!("decode {}", self.path))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path, "Starting empty datastore");
                Ok(Table::default())
            }
            Err(err) => Err(DatastoreError::io(self.name(), err).context(format!("read {}", self.path))),
        }
    }

    async fn persist(&self, table: &Table) -> Result<(), DatastoreError> {
        let data = serde_json::to_vec_pretty(table).map_err(|err| {
            DatastoreError::new(self.name(), DatastoreErrorKind::Other, err).context("encode")
        })?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| DatastoreError::io(self.name(), err).context("create directory"))?;
        }

        let name = self.path.file_name().unwrap_or("datastore.json");
        let staging = self
            .path
            .with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4()));

        if let Err(err) = tokio::fs::write(&staging, &data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(DatastoreError::io(self.name(), err).context("write staging file"));
        }

        if let Err(err) = tokio::fs::rename(&staging, &self.path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(DatastoreError::io(self.name(), err).context("commit staging file"));
        }

        tracing::trace!(path = %self.path, entities = table.len(), "Persisted datastore");
        Ok(())
    }

    /// Run `f` against the loaded table, persisting it afterwards if `f`
    /// reports a change.
    async fn with_table<T, F>(&self, f: F) -> Result<T, DatastoreError>
    where
        F: FnOnce(&mut Table) -> (T, bool),
    {
        let mut guard = self.table.lock().await;
        let mut table = match guard.take() {
            Some(table) => table,
            None => self.load().await?,
        };

        // Mutate a copy so a failed write leaves the cached table untouched.
        let mut updated = table.clone();
        let (value, changed) = f(&mut updated);
        if changed {
            if let Err(err) = self.persist(&updated).await {
                *guard = Some(table);
                return Err(err);
            }
            table = updated;
        }
        *guard = Some(table);
        Ok(value)
    }
}

#[async_trait::async_trait]
impl Datastore for LocalDatastore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>, DatastoreError> {
        require_complete(self.name(), key)?;
        self.with_table(|table| (table.get(key), false)).await
    }

    async fn put(&self, entity: Entity) -> Result<Key, DatastoreError> {
        self.with_table(|table| (table.put(entity), true)).await
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        require_complete(self.name(), key)?;
        self.with_table(|table| {
            let removed = table.delete(key);
            ((), removed)
        })
        .await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError> {
        self.with_table(|table| (table.query(query), false)).await
    }
}
