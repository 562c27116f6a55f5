use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use storage_driver::{
    BlobReader, ChecksumReader, Driver, Metadata, Reader, StorageError, StorageErrorKind,
    UploadOptions,
};

type Bucket = BTreeMap<Utf8PathBuf, MemoryFileItem>;

#[derive(Debug, Clone)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Bytes,
    checksum: Option<storage_driver::Checksum>,
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
            checksum: value.checksum.clone(),
        }
    }
}

/// Storage driver that keeps objects in memory.
///
/// Buckets are created on first upload. Prefix deletes are native.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), Bucket::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new, empty bucket.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket).or_default();
    }

    fn not_found(&self, bucket: &str, remote: Option<&Utf8Path>) -> StorageError {
        let builder = match remote {
            Some(remote) => StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("Path not found: {remote}"),
            )
            .path(remote.as_str()),
            None => StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("Bucket not found: {bucket}"),
            ),
        };
        builder.bucket(bucket).build()
    }

    async fn item(&self, bucket: &str, remote: &Utf8Path) -> Result<MemoryFileItem, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.not_found(bucket, None))?;
        bucket_map
            .get(remote)
            .cloned()
            .ok_or_else(|| self.not_found(bucket, Some(remote)))
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.item(bucket, remote).await.map(|item| (&item).into())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        let mut hashing = ChecksumReader::new(reader, options.validation);
        let mut buf = Vec::new();

        tokio::io::copy(&mut hashing, &mut buf).await.map_err(|err| {
            StorageError::io(self.name(), err)
                .bucket(bucket)
                .path(remote.as_str())
                .context("read upload")
                .build()
        })?;

        let item = MemoryFileItem {
            created: Utc::now(),
            data: buf.into(),
            checksum: hashing.finish(),
        };

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), item);

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        let item = self.item(bucket, remote).await?;
        let size = item.data.len() as u64;
        Ok(BlobReader::new(Cursor::new(item.data), Some(size)))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.not_found(bucket, None))?;
        bucket_map
            .remove(remote)
            .map(|_| ())
            .ok_or_else(|| self.not_found(bucket, Some(remote)))
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket_map) = buckets.get_mut(bucket) {
            let before = bucket_map.len();
            bucket_map.retain(|path, _| !path.starts_with(prefix));
            tracing::trace!(%bucket, %prefix, "Deleted {} objects", before - bucket_map.len());
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(bucket_map) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(bucket_map
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use storage_driver::{Checksum, ChecksumAlgorithm};
    use tokio::io::AsyncReadExt as _;

    use super::*;

    async fn put(storage: &MemoryStorage, remote: &str, data: &[u8]) {
        let mut reader = data;
        storage
            .upload(
                "bucket",
                Utf8Path::new(remote),
                &mut reader,
                &UploadOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_then_open() {
        let storage = MemoryStorage::new();
        put(&storage, "left-pad/left-pad-1.0.0.tgz", b"BINARYDATA").await;

        let mut reader = storage
            .open("bucket", Utf8Path::new("left-pad/left-pad-1.0.0.tgz"))
            .await
            .unwrap();
        assert_eq!(reader.content_length(), Some(10));

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"BINARYDATA");

        let metadata = storage
            .metadata("bucket", Utf8Path::new("left-pad/left-pad-1.0.0.tgz"))
            .await
            .unwrap();
        assert_eq!(
            metadata.checksum,
            Some(Checksum::compute(ChecksumAlgorithm::Crc32c, b"BINARYDATA"))
        );
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let storage = MemoryStorage::with_buckets(&["bucket"]);
        let err = storage
            .open("bucket", Utf8Path::new("nope/package.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(!storage
            .exists("bucket", Utf8Path::new("nope/package.json"))
            .await
            .unwrap());

        let err = storage
            .metadata("other", Utf8Path::new("nope/package.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn prefix_delete_respects_components() {
        let storage = MemoryStorage::new();
        put(&storage, "left-pad/package.json", b"{}").await;
        put(&storage, "left-pad/left-pad-1.0.0.tgz", b"tgz").await;
        put(&storage, "left-pad-extra/package.json", b"{}").await;

        storage
            .delete_prefix("bucket", Utf8Path::new("left-pad"))
            .await
            .unwrap();

        let remaining = storage.list("bucket", None).await.unwrap();
        assert_eq!(remaining, vec!["left-pad-extra/package.json".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_object() {
        let storage = MemoryStorage::with_buckets(&["bucket"]);
        let err = storage
            .delete("bucket", Utf8Path::new("left-pad/package.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
