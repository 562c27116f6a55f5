//! Shared fixtures for the package store tests

#![allow(dead_code)]

use std::sync::Arc;

use camino::Utf8Path;
use datastore::{Datastore, DatastoreError, DatastoreErrorKind, Entity, Key, MemoryDatastore, Query};
use package_store::{
    DownloadEvent, RegistryIndex, ResolvedConfig, StorageHelper, TarballDownload, TarballUpload,
    UploadEvent,
};
use storage::{
    BlobReader, Driver, Metadata, MemoryStorage, Reader, Storage, StorageError, StorageErrorKind,
    UploadOptions,
};

pub const BUCKET: &str = "test-packages";

/// An index over in-memory backends.
pub fn memory_index() -> RegistryIndex {
    index_with(MemoryStorage::new(), MemoryDatastore::new())
}

/// An index over the given backends.
pub fn index_with<D, S>(driver: D, datastore: S) -> RegistryIndex
where
    D: Driver + Send + Sync + 'static,
    S: Datastore + 'static,
{
    let storage = Storage::new(driver);
    let helper = StorageHelper::new(
        Arc::new(datastore),
        storage.bucket(BUCKET),
        ResolvedConfig::new(BUCKET),
    );
    RegistryIndex::new(Arc::new(helper))
}

/// Collect every remaining upload event.
pub async fn upload_events(upload: &mut TarballUpload) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Some(event) = upload.next_event().await {
        events.push(event);
    }
    events
}

/// Collect every remaining download event.
pub async fn download_events(download: &mut TarballDownload) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Some(event) = download.next_event().await {
        events.push(event);
    }
    events
}

fn denied(remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        "unauthenticated",
        StorageErrorKind::PermissionDenied,
        "Could not authenticate request",
    )
    .path(remote.as_str())
    .build()
}

/// An object store which rejects every request, as a backend does when the
/// credentials are wrong. Objects always appear to be absent.
#[derive(Debug, Default)]
pub struct UnauthenticatedDriver;

#[async_trait::async_trait]
impl Driver for UnauthenticatedDriver {
    fn name(&self) -> &'static str {
        "unauthenticated"
    }

    async fn metadata(&self, _bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        Err(StorageError::new(
            self.name(),
            StorageErrorKind::NotFound,
            format!("no such object: {remote}"),
        ))
    }

    async fn upload(
        &self,
        _bucket: &str,
        remote: &Utf8Path,
        _reader: &mut Reader<'_>,
        _options: &UploadOptions,
    ) -> Result<(), StorageError> {
        Err(denied(remote))
    }

    async fn open(&self, _bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        Err(denied(remote))
    }

    async fn delete(&self, _bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        Err(denied(remote))
    }

    async fn list(
        &self,
        _bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        Err(denied(prefix.unwrap_or(Utf8Path::new(""))))
    }
}

/// An object store whose existence checks fail, while everything else
/// works like [`MemoryStorage`].
#[derive(Debug, Default)]
pub struct BrokenMetadataDriver {
    inner: MemoryStorage,
}

#[async_trait::async_trait]
impl Driver for BrokenMetadataDriver {
    fn name(&self) -> &'static str {
        "broken-metadata"
    }

    async fn metadata(&self, _bucket: &str, _remote: &Utf8Path) -> Result<Metadata, StorageError> {
        Err(StorageError::new(
            self.name(),
            StorageErrorKind::ServiceUnavailable,
            "metadata service down",
        ))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        self.inner.upload(bucket, remote, reader, options).await
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        self.inner.open(bucket, remote).await
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.inner.delete(bucket, remote).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

/// A datastore which refuses to delete one particular id.
#[derive(Debug)]
pub struct StuckDatastore {
    inner: MemoryDatastore,
    stuck: i64,
}

impl StuckDatastore {
    pub fn new(stuck: i64) -> Self {
        Self {
            inner: MemoryDatastore::new(),
            stuck,
        }
    }
}

#[async_trait::async_trait]
impl Datastore for StuckDatastore {
    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>, DatastoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, entity: Entity) -> Result<Key, DatastoreError> {
        self.inner.put(entity).await
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        if key.as_id() == Some(self.stuck) {
            return Err(
                DatastoreError::new(self.name(), DatastoreErrorKind::ServiceUnavailable, "busy")
                    .entity(key),
            );
        }
        self.inner.delete(key).await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>, DatastoreError> {
        self.inner.run_query(query).await
    }
}

/// An object store which never declares a content length when opening
/// objects, while everything else works like [`MemoryStorage`].
#[derive(Debug, Default)]
pub struct UnsizedDriver {
    inner: MemoryStorage,
}

#[async_trait::async_trait]
impl Driver for UnsizedDriver {
    fn name(&self) -> &'static str {
        "unsized"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.inner.metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        self.inner.upload(bucket, remote, reader, options).await
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        let blob = self.inner.open(bucket, remote).await?;
        Ok(BlobReader::new(blob.into_inner(), None))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.inner.delete(bucket, remote).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

/// A log sink shared between a subscriber and the test inspecting it.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Everything logged so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// A subscriber writing plain, uncoloured lines into this sink.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || sink.clone())
            .finish()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
