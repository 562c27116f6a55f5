use std::{fmt, ops::Deref, pin::Pin, sync::Arc, task};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io::{self, AsyncWriteExt as _};

use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::error::{DeleteErrors, StorageError, StorageErrorKind};

/// A reader stream for uploaded content.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for downloaded content.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// An owned reader, handed out by [`Driver::open`].
pub type BoxReader = Box<dyn io::AsyncRead + Unpin + Send + Sync + 'static>;

/// Object metadata common to all drivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// When the object was written.
    pub created: DateTime<Utc>,

    /// The checksum recorded when the object was uploaded, if validation was on.
    pub checksum: Option<Checksum>,
}

/// Per-upload options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Checksum to compute while streaming and validate once written.
    /// `None` disables validation.
    pub validation: Option<ChecksumAlgorithm>,

    /// Whether the upload should be staged so that it can survive an
    /// interrupted connection, rather than sent as a single request.
    pub resumable: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            validation: Some(ChecksumAlgorithm::default()),
            resumable: true,
        }
    }
}

impl UploadOptions {
    /// Set the validation algorithm.
    pub fn validation(mut self, validation: Option<ChecksumAlgorithm>) -> Self {
        self.validation = validation;
        self
    }

    /// Set whether uploads are resumable.
    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }
}

/// A readable object, along with the content length the backend declared
/// for it (if any).
pub struct BlobReader {
    content_length: Option<u64>,
    reader: BoxReader,
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl BlobReader {
    /// Wrap a reader with its declared content length.
    pub fn new<R>(reader: R, content_length: Option<u64>) -> Self
    where
        R: io::AsyncRead + Unpin + Send + Sync + 'static,
    {
        Self {
            content_length,
            reader: Box::new(reader),
        }
    }

    /// The content length the backend declared.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> BoxReader {
        self.reader
    }
}

impl io::AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut io::ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// An object store driver.
///
/// Paths are relative to the bucket and use `/` separators. A path which is
/// a prefix of other paths (e.g. `left-pad` for `left-pad/package.json`)
/// is not itself an object.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Get the metadata for an object.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Check whether an object exists.
    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(bucket, remote).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Upload an object, streaming its contents from `reader`.
    ///
    /// The object must not become visible to readers until the upload has
    /// completed and passed validation.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError>;

    /// Open an object for streaming reads.
    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError>;

    /// Download an object into a writer, returning the number of bytes copied.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<u64, StorageError> {
        let mut reader = self.open(bucket, remote).await?;
        let copied = io::copy(&mut reader, writer).await.map_err(|err| {
            StorageError::io(self.name(), err)
                .bucket(bucket)
                .path(remote.as_str())
                .context("copy download")
                .build()
        })?;
        writer.flush().await.map_err(|err| {
            StorageError::io(self.name(), err)
                .bucket(bucket)
                .path(remote.as_str())
                .context("flush download")
                .build()
        })?;
        Ok(copied)
    }

    /// Delete a single object.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Delete every object under `prefix`.
    ///
    /// Drivers without a native prefix delete fall back to [`delete_each`].
    async fn delete_prefix(&self, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError> {
        delete_each(self, bucket, prefix).await
    }

    /// List the objects in a bucket, optionally under a prefix.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

/// Delete every object under `prefix` by listing it and deleting objects one
/// at a time.
///
/// Keeps going after a failed deletion and reports all failures together at
/// the end, so running it again after a partial failure finishes the job.
/// Objects which vanish in between count as deleted.
pub async fn delete_each<D>(driver: &D, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError>
where
    D: Driver + Sync + ?Sized,
{
    let objects = driver.list(bucket, Some(prefix)).await?;
    let attempted = objects.len();
    let mut failures = Vec::new();

    for object in objects {
        match driver.delete(bucket, Utf8Path::new(&object)).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => {
                tracing::warn!(%bucket, %object, "Failed to delete object: {error}");
                failures.push(error);
            }
        }
    }

    if failures.is_empty() {
        tracing::trace!(%bucket, %prefix, "Deleted {attempted} objects");
        return Ok(());
    }

    let kind = failures
        .first()
        .map(StorageError::kind)
        .unwrap_or(StorageErrorKind::Other);
    Err(
        StorageError::builder(driver.name(), kind, DeleteErrors::new(attempted, failures))
            .bucket(bucket)
            .path(prefix.as_str())
            .context("prefix delete")
            .build(),
    )
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        self.deref().exists(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader, options).await
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        self.deref().open(bucket, remote).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<u64, StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete_prefix(bucket, prefix).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Driver);

    #[test]
    fn default_upload_options() {
        let options = UploadOptions::default();
        assert_eq!(options.validation, Some(ChecksumAlgorithm::Crc32c));
        assert!(options.resumable);

        let options = options.validation(None).resumable(false);
        assert_eq!(options.validation, None);
        assert!(!options.resumable);
    }
}
