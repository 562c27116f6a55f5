use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use eyre::WrapErr as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing::Instrument;

use storage_driver::{
    delete_each, BlobReader, Checksum, ChecksumReader, Driver, Metadata, Reader, StorageError,
    StorageErrorKind, UploadOptions,
};

/// Suffix for uploads which have not yet been committed.
const STAGING_SUFFIX: &str = ".partial";

/// Storage driver which keeps objects as files under a root directory.
///
/// Objects live at `<root>/<bucket>/<remote>`. Uploads are written to a
/// hidden staging file next to the destination and renamed into place once
/// they have been validated, so readers never observe partial content.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn invalid(&self, bucket: &str, remote: &Utf8Path, message: &str) -> StorageError {
        StorageError::builder(self.name(), StorageErrorKind::InvalidRequest, message.to_owned())
            .bucket(bucket)
            .path(remote.as_str())
            .build()
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket == ".." {
            return Err(self.invalid(bucket, remote, "invalid bucket name"));
        }

        if remote
            .components()
            .any(|component| !matches!(component, Utf8Component::Normal(_)))
        {
            return Err(self.invalid(
                bucket,
                remote,
                "remote path must be relative and normalized",
            ));
        }

        let mut path = self.root.join(bucket);
        path.push(remote);
        Ok(path)
    }

    fn staging_path(path: &Utf8Path) -> Utf8PathBuf {
        let name = path.file_name().unwrap_or_default();
        path.with_file_name(format!(".{name}.{}{STAGING_SUFFIX}", uuid::Uuid::new_v4()))
    }

    fn error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &str,
        err: std::io::Error,
    ) -> StorageError {
        StorageError::io(self.name(), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context.to_owned())
            .build()
    }

    /// Write a staged upload, returning the checksum of what was streamed.
    async fn stage(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        staging: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<Option<Checksum>, StorageError> {
        let mut hashing = ChecksumReader::new(reader, options.validation);

        if options.resumable {
            let file = tokio::fs::File::create(staging)
                .await
                .map_err(|err| self.error(bucket, remote, "create staging file", err))?;
            let mut writer = tokio::io::BufWriter::new(file);
            tokio::io::copy(&mut hashing, &mut writer)
                .await
                .map_err(|err| self.error(bucket, remote, "stream upload", err))?;
            writer
                .shutdown()
                .await
                .map_err(|err| self.error(bucket, remote, "shutdown writer", err))?;
        } else {
            let mut buf = Vec::new();
            hashing
                .read_to_end(&mut buf)
                .await
                .map_err(|err| self.error(bucket, remote, "buffer upload", err))?;
            tokio::fs::write(staging, &buf)
                .await
                .map_err(|err| self.error(bucket, remote, "write staging file", err))?;
        }

        tracing::trace!(%remote, bytes = hashing.length(), "Staged upload");
        Ok(hashing.finish())
    }

    /// Re-read the staged file and compare it against the streamed checksum.
    async fn validate(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        staging: &Utf8Path,
        expected: &Checksum,
    ) -> Result<(), StorageError> {
        let file = tokio::fs::File::open(staging)
            .await
            .map_err(|err| self.error(bucket, remote, "open staging file", err))?;
        let mut hashing = ChecksumReader::new(
            tokio::io::BufReader::new(file),
            Some(expected.algorithm()),
        );
        tokio::io::copy(&mut hashing, &mut tokio::io::sink())
            .await
            .map_err(|err| self.error(bucket, remote, "read staging file", err))?;

        match hashing.finish() {
            Some(actual) if &actual == expected => Ok(()),
            actual => Err(StorageError::builder(
                self.name(),
                StorageErrorKind::Checksum,
                format!(
                    "expected {expected}, found {}",
                    actual.map(|c| c.to_string()).unwrap_or_default()
                ),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build()),
        }
    }

    async fn remove_prefix_dir(&self, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, prefix)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.error(bucket, prefix, "remove package directory", err)),
        }
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.error(bucket, remote, "metadata", err))?;

        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("Not a file: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|err| self.error(bucket, remote, "timestamps", err))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
            checksum: None,
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        if remote.file_name().is_none() {
            return Err(self.invalid(bucket, remote, "empty remote path"));
        }
        let path = self.path(bucket, remote)?;
        let Some(parent) = path.parent() else {
            return Err(self.invalid(bucket, remote, "empty remote path"));
        };

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| self.error(bucket, remote, "create_dir_all", err))?;

        let mut staging = Staging::new(Self::staging_path(&path));
        let checksum = self
            .stage(bucket, remote, &staging.path, reader, options)
            .await?;
        if let Some(expected) = checksum {
            self.validate(bucket, remote, &staging.path, &expected)
                .await?;
        }
        tokio::fs::rename(&staging.path, &path)
            .await
            .map_err(|err| self.error(bucket, remote, "commit upload", err))?;
        staging.committed = true;

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<BlobReader, StorageError> {
        let path = self.path(bucket, remote)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|err| self.error(bucket, remote, "open", err))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| self.error(bucket, remote, "metadata", err))?
            .len();

        Ok(BlobReader::new(tokio::io::BufReader::new(file), Some(size)))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| self.error(bucket, remote, "remove_file", err))
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &Utf8Path) -> Result<(), StorageError> {
        if prefix.file_name().is_none() {
            return Err(self.invalid(bucket, prefix, "refusing to delete an empty prefix"));
        }
        delete_each(self, bucket, prefix).await?;
        self.remove_prefix_dir(bucket, prefix).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let root = self.path(bucket, Utf8Path::new(""))?;
        let start = match prefix {
            Some(prefix) => self.path(bucket, prefix)?,
            None => root.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &start))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items)
    }
}

/// A staging file which is removed on drop unless it was committed.
///
/// Covers failed uploads and upload futures which are dropped part way.
struct Staging {
    path: Utf8PathBuf,
    committed: bool,
}

impl Staging {
    fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::trace!(staging = %self.path, "Staging file not removed: {err}");
            }
        }
    }
}

/// Walk `start`, returning `/`-separated paths relative to `root`.
#[tracing::instrument(level = "trace")]
fn collect_list(root: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<String>> {
    let mut files = Vec::new();
    if start.is_dir() {
        visit(start, &mut files)?;
    } else if start.is_file() {
        files.push(start.to_owned());
    }

    let mut items: Vec<String> = files
        .into_iter()
        .filter(|path| {
            !path
                .file_name()
                .is_some_and(|name| name.starts_with('.') && name.ends_with(STAGING_SUFFIX))
        })
        .filter_map(|path| {
            path.strip_prefix(root).ok().map(|relative| {
                relative
                    .components()
                    .map(|component| component.as_str())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        })
        .collect();
    items.sort();
    Ok(items)
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use storage_driver::ChecksumAlgorithm;

    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalDriver::new(root))
    }

    async fn put(driver: &LocalDriver, remote: &str, data: &[u8], options: &UploadOptions) {
        let mut reader = data;
        driver
            .upload("bucket", Utf8Path::new(remote), &mut reader, options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_and_download() {
        let (_dir, driver) = driver();

        for resumable in [true, false] {
            let options = UploadOptions::default().resumable(resumable);
            put(&driver, "left-pad/left-pad-1.0.0.tgz", b"BINARYDATA", &options).await;

            let mut buf = Vec::new();
            let copied = driver
                .download("bucket", Utf8Path::new("left-pad/left-pad-1.0.0.tgz"), &mut buf)
                .await
                .unwrap();
            assert_eq!(copied, 10);
            assert_eq!(buf, b"BINARYDATA");
        }

        // Staging files never show up in listings.
        let listed = driver.list("bucket", None).await.unwrap();
        assert_eq!(listed, vec!["left-pad/left-pad-1.0.0.tgz".to_string()]);
    }

    #[tokio::test]
    async fn md5_validation() {
        let (_dir, driver) = driver();
        let options = UploadOptions::default().validation(Some(ChecksumAlgorithm::Md5));
        put(&driver, "pkg/package.json", b"{}", &options).await;

        let metadata = driver
            .metadata("bucket", Utf8Path::new("pkg/package.json"))
            .await
            .unwrap();
        assert_eq!(metadata.size, 2);
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, driver) = driver();
        let mut reader: &[u8] = b"oops";
        let err = driver
            .upload(
                "bucket",
                Utf8Path::new("../outside"),
                &mut reader,
                &UploadOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn prefix_delete_enumerates() {
        let (_dir, driver) = driver();
        let options = UploadOptions::default();
        put(&driver, "left-pad/package.json", b"{}", &options).await;
        put(&driver, "left-pad/left-pad-1.0.0.tgz", b"tgz", &options).await;
        put(&driver, "left-pad-extra/package.json", b"{}", &options).await;

        driver
            .delete_prefix("bucket", Utf8Path::new("left-pad"))
            .await
            .unwrap();

        let listed = driver.list("bucket", None).await.unwrap();
        assert_eq!(listed, vec!["left-pad-extra/package.json".to_string()]);

        // A second removal is a no-op.
        driver
            .delete_prefix("bucket", Utf8Path::new("left-pad"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_object() {
        let (_dir, driver) = driver();
        let err = driver
            .open("bucket", Utf8Path::new("nope/package.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!driver
            .exists("bucket", Utf8Path::new("nope/package.json"))
            .await
            .unwrap());
    }
}
