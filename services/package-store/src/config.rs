//! Plugin configuration

use camino::Utf8PathBuf;
use datastore::DatastoreConfig;
use serde::{Deserialize, Deserializer};
use storage::{ChecksumAlgorithm, StorageConfig, UploadOptions};

use crate::error::ConfigError;

/// Entity kind used for the package index when none is configured.
pub const DEFAULT_KIND: &str = "PackageStoreIndex";

/// Environment variable consulted when `projectId` is not configured.
pub const PROJECT_ID_ENV: &str = "PACKAGE_STORE_PROJECT_ID";

/// Environment variable consulted when `keyFilename` is not configured.
pub const KEY_FILE_ENV: &str = "PACKAGE_STORE_KEY";

/// Configuration as written by the registry host.
///
/// Keys are camelCase, e.g.
///
/// ```json
/// { "bucket": "packages", "projectId": "acme", "validation": "md5" }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStoreConfig {
    /// Object store bucket holding manifests and tarballs.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Entity kind for the package index.
    #[serde(default)]
    pub kind: Option<String>,

    /// Upload checksum: `"crc32c"`, `"md5"`, or `false` to disable.
    #[serde(
        default = "default_validation",
        deserialize_with = "deserialize_validation"
    )]
    pub validation: Option<ChecksumAlgorithm>,

    /// Whether uploads are staged so they can be resumed. Defaults to `true`.
    #[serde(default)]
    pub resumable: Option<bool>,

    /// Project scoping the datastore namespace.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Path to a credentials file.
    #[serde(default)]
    pub key_filename: Option<Utf8PathBuf>,

    /// Object store backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Datastore backend.
    #[serde(default)]
    pub datastore: DatastoreConfig,
}

impl Default for PackageStoreConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            kind: None,
            validation: default_validation(),
            resumable: None,
            project_id: None,
            key_filename: None,
            storage: StorageConfig::default(),
            datastore: DatastoreConfig::default(),
        }
    }
}

fn default_validation() -> Option<ChecksumAlgorithm> {
    Some(ChecksumAlgorithm::default())
}

fn deserialize_validation<'de, D>(deserializer: D) -> Result<Option<ChecksumAlgorithm>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Toggle(bool),
        Algorithm(ChecksumAlgorithm),
    }

    Ok(match Setting::deserialize(deserializer)? {
        Setting::Toggle(false) => None,
        Setting::Toggle(true) => default_validation(),
        Setting::Algorithm(algorithm) => Some(algorithm),
    })
}

impl PackageStoreConfig {
    /// Apply environment fallbacks and check required settings.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Like [`resolve`](Self::resolve), reading the environment through `env`.
    pub fn resolve_with<F>(self, env: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket = self
            .bucket
            .filter(|bucket| !bucket.is_empty())
            .ok_or(ConfigError::MissingBucket)?;

        let project_id = self
            .project_id
            .or_else(|| env(PROJECT_ID_ENV))
            .filter(|project| !project.is_empty())
            .ok_or(ConfigError::MissingProjectId)?;

        let key_filename = self
            .key_filename
            .or_else(|| env(KEY_FILE_ENV).map(Utf8PathBuf::from));
        if let Some(path) = &key_filename {
            tracing::warn!(%path, "Using credentials in a file might be insecure and is only recommended for local development");
        }

        let resolved = ResolvedConfig {
            bucket,
            kind: self.kind.unwrap_or_else(|| DEFAULT_KIND.to_owned()),
            validation: self.validation,
            resumable: self.resumable.unwrap_or(true),
            project_id,
            key_filename,
            storage: self.storage,
            datastore: self.datastore,
        };

        tracing::debug!(
            bucket = %resolved.bucket,
            kind = %resolved.kind,
            project = %resolved.project_id,
            validation = ?resolved.validation,
            resumable = resolved.resumable,
            "Package store settings"
        );
        Ok(resolved)
    }
}

/// Configuration with defaults applied and required values present.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Object store bucket.
    pub bucket: String,
    /// Entity kind for the package index.
    pub kind: String,
    /// Upload checksum, `None` when disabled.
    pub validation: Option<ChecksumAlgorithm>,
    /// Whether uploads are resumable.
    pub resumable: bool,
    /// Project scoping the datastore namespace.
    pub project_id: String,
    /// Path to a credentials file.
    pub key_filename: Option<Utf8PathBuf>,
    /// Object store backend.
    pub storage: StorageConfig,
    /// Datastore backend.
    pub datastore: DatastoreConfig,
}

impl ResolvedConfig {
    /// A config for the given bucket with every other setting defaulted,
    /// and in-memory backends.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            kind: DEFAULT_KIND.to_owned(),
            validation: default_validation(),
            resumable: true,
            project_id: String::new(),
            key_filename: None,
            storage: StorageConfig::default(),
            datastore: DatastoreConfig::default(),
        }
    }

    /// The options every blob upload is made with.
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions::default()
            .validation(self.validation)
            .resumable(self.resumable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PackageStoreConfig {
        serde_json::from_str(json).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults() {
        let config = parse(r#"{"bucket": "packages", "projectId": "acme"}"#)
            .resolve_with(no_env)
            .unwrap();

        assert_eq!(config.bucket, "packages");
        assert_eq!(config.kind, DEFAULT_KIND);
        assert_eq!(config.validation, Some(ChecksumAlgorithm::Crc32c));
        assert!(config.resumable);
        assert_eq!(config.project_id, "acme");
        assert!(config.key_filename.is_none());
        assert!(matches!(config.storage, StorageConfig::Memory));
    }

    #[test]
    fn validation_settings() {
        let config = parse(r#"{"validation": "md5"}"#);
        assert_eq!(config.validation, Some(ChecksumAlgorithm::Md5));

        let config = parse(r#"{"validation": false}"#);
        assert_eq!(config.validation, None);

        let config = parse(r#"{"validation": true}"#);
        assert_eq!(config.validation, Some(ChecksumAlgorithm::Crc32c));

        assert!(serde_json::from_str::<PackageStoreConfig>(r#"{"validation": "sha1"}"#).is_err());
    }

    #[test]
    fn missing_bucket() {
        let err = parse(r#"{"projectId": "acme"}"#)
            .resolve_with(no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingBucket));
    }

    #[test]
    fn missing_project() {
        let err = parse(r#"{"bucket": "packages"}"#)
            .resolve_with(no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectId));
    }

    #[test]
    fn environment_fallbacks() {
        let env = |name: &str| match name {
            PROJECT_ID_ENV => Some("from-env".to_owned()),
            KEY_FILE_ENV => Some("/etc/keys/service.json".to_owned()),
            _ => None,
        };

        let config = parse(r#"{"bucket": "packages"}"#)
            .resolve_with(env)
            .unwrap();
        assert_eq!(config.project_id, "from-env");
        assert_eq!(
            config.key_filename,
            Some(Utf8PathBuf::from("/etc/keys/service.json"))
        );

        let config = parse(r#"{"bucket": "packages", "projectId": "explicit"}"#)
            .resolve_with(env)
            .unwrap();
        assert_eq!(config.project_id, "explicit");
    }

    #[test]
    fn upload_options() {
        let config = parse(r#"{"bucket": "b", "projectId": "p", "validation": false, "resumable": false}"#)
            .resolve_with(no_env)
            .unwrap();
        let options = config.upload_options();
        assert_eq!(options.validation, None);
        assert!(!options.resumable);
    }
}
