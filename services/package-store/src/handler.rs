//! Per-package storage operations

use std::future::Future;
use std::sync::Arc;

use camino::Utf8Path;
use serde::Serialize as _;
use serde_json::Value;

use crate::download::TarballDownload;
use crate::error::{PackageError, PackageResult};
use crate::helper::StorageHelper;
use crate::upload::TarballUpload;
use crate::{BoxError, PACKAGE_JSON};

/// Storage operations for a single package.
///
/// Cheap to create; all handlers share the clients held by the
/// [`StorageHelper`].
///
/// Concurrent updates to the same package are not serialized: two
/// [`update_package`](Self::update_package) calls can race, and the last
/// write wins.
#[derive(Debug, Clone)]
pub struct PackageStorageHandler {
    name: String,
    helper: Arc<StorageHelper>,
}

impl PackageStorageHandler {
    /// A handler for `name`.
    pub fn new(name: impl Into<String>, helper: Arc<StorageHelper>) -> Self {
        Self {
            name: name.into(),
            helper,
        }
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store the metadata for a new package.
    ///
    /// Fails with `Conflict` if the package already has metadata.
    #[tracing::instrument(skip(self, metadata), fields(package = %self.name))]
    pub async fn create_package(&self, metadata: &Value) -> PackageResult<()> {
        let path = self.helper.build_blob_path(&self.name, PACKAGE_JSON);
        let exists = self.helper.bucket().exists(&path).await.map_err(|error| {
            tracing::error!("Checking package failed: {error}");
            PackageError::internal(&error)
        })?;

        if exists {
            tracing::debug!("Package already exists");
            return Err(PackageError::already_exists(&self.name));
        }

        tracing::debug!("Creating package");
        self.save_package(metadata).await
    }

    /// Store the metadata, replacing whatever was there.
    #[tracing::instrument(skip(self, metadata), fields(package = %self.name))]
    pub async fn save_package(&self, metadata: &Value) -> PackageResult<()> {
        let path = self.helper.build_blob_path(&self.name, PACKAGE_JSON);
        let document = to_document(metadata).map_err(|error| {
            tracing::error!("Serializing package failed: {error}");
            PackageError::internal(error)
        })?;

        let options = self.helper.config().upload_options();
        let mut reader = document.as_slice();
        self.helper
            .bucket()
            .upload(&path, &mut reader, &options)
            .await
            .map_err(|error| {
                tracing::error!("Saving package failed: {error}");
                PackageError::internal(&error)
            })?;

        tracing::debug!("Package saved");
        Ok(())
    }

    /// Read the metadata.
    ///
    /// Fails with `NotFound` if the package has none.
    #[tracing::instrument(skip(self), fields(package = %self.name))]
    pub async fn read_package(&self) -> PackageResult<Value> {
        let path = self.helper.build_blob_path(&self.name, PACKAGE_JSON);
        let mut buf = Vec::new();
        self.helper
            .bucket()
            .download(&path, &mut buf)
            .await
            .map_err(|error| {
                if error.is_not_found() {
                    tracing::debug!("Package not found");
                    PackageError::not_found()
                } else {
                    tracing::error!("Reading package failed: {error}");
                    PackageError::internal(&error)
                }
            })?;

        serde_json::from_slice(&buf).map_err(|error| {
            tracing::error!("Parsing package failed: {error}");
            PackageError::internal(error)
        })
    }

    /// Read, mutate and write back the metadata.
    ///
    /// `update` receives the current metadata and returns the mutated
    /// document. On success `on_write` is called with the package name and
    /// `transform` applied to it, and is responsible for persisting it.
    ///
    /// A package which cannot be read is `NotFound`. Failures from `update`
    /// or `on_write` become `Internal` unless they already are a
    /// [`PackageError`]. Nothing is written when `update` fails.
    #[tracing::instrument(skip_all, fields(package = %self.name))]
    pub async fn update_package<U, UF, T, W, WF>(
        &self,
        update: U,
        transform: T,
        on_write: W,
    ) -> PackageResult<()>
    where
        U: FnOnce(Value) -> UF,
        UF: Future<Output = Result<Value, BoxError>>,
        T: FnOnce(Value) -> Value,
        W: FnOnce(String, Value) -> WF,
        WF: Future<Output = Result<(), BoxError>>,
    {
        let metadata = match self.read_package().await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::error!("Package to update could not be read: {error}");
                return Err(PackageError::not_found());
            }
        };

        let metadata = update(metadata).await.map_err(|error| {
            let error = into_package_error(error);
            tracing::error!("Updating package failed: {error}");
            error
        })?;

        on_write(self.name.clone(), transform(metadata))
            .await
            .map_err(|error| {
                let error = into_package_error(error);
                tracing::error!("Writing updated package failed: {error}");
                error
            })
    }

    /// Delete one file belonging to the package.
    #[tracing::instrument(skip(self), fields(package = %self.name))]
    pub async fn delete_package(&self, file: &str) -> PackageResult<()> {
        let path = self.helper.build_blob_path(&self.name, file);
        tracing::debug!(%path, "Deleting file");
        self.helper.bucket().delete(&path).await.map_err(|error| {
            tracing::error!(%path, "Deleting file failed: {error}");
            PackageError::internal(&error)
        })?;

        tracing::debug!(%path, "File deleted");
        Ok(())
    }

    /// Delete every file belonging to the package.
    #[tracing::instrument(skip(self), fields(package = %self.name))]
    pub async fn remove_package(&self) -> PackageResult<()> {
        tracing::debug!("Removing package");
        self.helper
            .bucket()
            .delete_prefix(Utf8Path::new(&self.name))
            .await
            .map_err(|error| {
                tracing::error!("Removing package failed: {error}");
                PackageError::internal(&error)
            })?;

        tracing::debug!("Package removed");
        Ok(())
    }

    /// Start uploading a tarball. See [`TarballUpload`].
    pub fn write_tarball(&self, file: &str) -> TarballUpload {
        TarballUpload::spawn(self.helper.clone(), &self.name, file)
    }

    /// Start downloading a tarball. See [`TarballDownload`].
    pub fn read_tarball(&self, file: &str) -> TarballDownload {
        TarballDownload::spawn(self.helper.clone(), &self.name, file)
    }
}

/// Serialize metadata as tab-indented JSON.
fn to_document(metadata: &Value) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    metadata.serialize(&mut serializer)?;
    Ok(buf)
}

fn into_package_error(error: BoxError) -> PackageError {
    match error.downcast::<PackageError>() {
        Ok(error) => *error,
        Err(error) => PackageError::internal(error),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tab_indented_document() {
        let document = to_document(&json!({"name": "left-pad", "versions": {}})).unwrap();
        assert_eq!(
            String::from_utf8(document).unwrap(),
            "{\n\t\"name\": \"left-pad\",\n\t\"versions\": {}\n}"
        );
    }

    #[test]
    fn package_errors_pass_through() {
        let error = into_package_error(Box::new(PackageError::already_exists("left-pad")));
        assert_eq!(error, PackageError::already_exists("left-pad"));

        let error = into_package_error("handler failed".into());
        assert_eq!(error, PackageError::Internal("handler failed".into()));
    }
}
