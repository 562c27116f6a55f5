//! # Package store
//!
//! A storage backend for a package registry. Package manifests and tarballs
//! live in an object store under `<package>/<file>`, while the index of
//! package names and the token signing secret live in a document datastore.
//!
//! The entry point is [`RegistryIndex`], built from a [`PackageStoreConfig`]:
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use package_store::{PackageStoreConfig, RegistryIndex};
//!
//! let config: PackageStoreConfig =
//!     serde_json::from_str(r#"{"bucket": "packages", "projectId": "acme"}"#)?;
//! let index = RegistryIndex::from_config(config.resolve()?)?;
//!
//! index.add("left-pad").await?;
//! let package = index.get_package_storage("left-pad");
//! package
//!     .create_package(&serde_json::json!({"name": "left-pad", "versions": {}}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod download;
mod error;
mod handler;
mod helper;
mod index;
mod upload;

pub use config::{PackageStoreConfig, ResolvedConfig, DEFAULT_KIND, KEY_FILE_ENV, PROJECT_ID_ENV};
pub use download::{DownloadEvent, DownloadState, TarballDownload};
pub use error::{ConfigError, PackageError, PackageErrorKind, PackageResult};
pub use handler::PackageStorageHandler;
pub use helper::{IndexRecord, StorageHelper};
pub use index::{RegistryIndex, SECRET_KIND, SECRET_NAME};
pub use secret::Secret;
pub use upload::{TarballUpload, UploadEvent, UploadState};

/// File name of the package manifest.
pub const PACKAGE_JSON: &str = "package.json";

/// Capacity of the in-memory pipe between a tarball handle and its backend.
pub(crate) const PIPE_CAPACITY: usize = 64 * 1024;

/// Error type accepted from caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
