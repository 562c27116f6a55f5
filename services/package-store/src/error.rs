//! Error types for the package store

use http::StatusCode;
use storage::{StorageError, StorageErrorKind};

/// Result type for package store operations
pub type PackageResult<T> = Result<T, PackageError>;

/// Message used when a package or file is missing.
pub(crate) const NOT_FOUND_MESSAGE: &str = "no such package available";

/// The category of a [`PackageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageErrorKind {
    /// The package or file does not exist.
    NotFound,
    /// The package or file already exists.
    Conflict,
    /// The backend rejected the request.
    BadRequest,
    /// Anything unexpected.
    Internal,
    /// The operation is not supported.
    ServiceUnavailable,
}

/// Error types reported to the registry host.
///
/// Every backend failure is translated into one of these at the boundary of
/// a public operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackageError {
    /// Package or file not found
    #[error("{0}")]
    NotFound(String),

    /// Package or file already exists
    #[error("{0}")]
    Conflict(String),

    /// Backend rejected the request
    #[error("{0}")]
    BadRequest(String),

    /// Internal error
    #[error("{0}")]
    Internal(String),

    /// Operation not supported
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl PackageError {
    /// A `NotFound` error with the standard message.
    pub fn not_found() -> Self {
        PackageError::NotFound(NOT_FOUND_MESSAGE.to_owned())
    }

    /// An `Internal` error from any displayable error.
    pub fn internal(error: impl std::fmt::Display) -> Self {
        PackageError::Internal(error.to_string())
    }

    /// The `Conflict` raised when publishing over an existing package or file.
    pub fn already_exists(name: &str) -> Self {
        PackageError::Conflict(format!("{name} package already exist"))
    }

    /// The `ServiceUnavailable` raised by operations this backend does not support.
    pub fn not_implemented(operation: &str) -> Self {
        PackageError::ServiceUnavailable(format!("[{operation}] method not implemented"))
    }

    /// The error category.
    pub fn kind(&self) -> PackageErrorKind {
        match self {
            PackageError::NotFound(_) => PackageErrorKind::NotFound,
            PackageError::Conflict(_) => PackageErrorKind::Conflict,
            PackageError::BadRequest(_) => PackageErrorKind::BadRequest,
            PackageError::Internal(_) => PackageErrorKind::Internal,
            PackageError::ServiceUnavailable(_) => PackageErrorKind::ServiceUnavailable,
        }
    }

    /// The message carried by the error.
    pub fn message(&self) -> &str {
        match self {
            PackageError::NotFound(message)
            | PackageError::Conflict(message)
            | PackageError::BadRequest(message)
            | PackageError::Internal(message)
            | PackageError::ServiceUnavailable(message) => message,
        }
    }

    /// The HTTP status code the host should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            PackageErrorKind::NotFound => StatusCode::NOT_FOUND,
            PackageErrorKind::Conflict => StatusCode::CONFLICT,
            PackageErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            PackageErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            PackageErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Translate a failure to read a blob: missing objects are `NotFound`,
    /// anything else is the backend rejecting the request.
    pub(crate) fn from_read(error: &StorageError) -> Self {
        match error.kind() {
            StorageErrorKind::NotFound => PackageError::not_found(),
            StorageErrorKind::PermissionDenied
            | StorageErrorKind::AuthExpired
            | StorageErrorKind::Io
            | StorageErrorKind::ServiceUnavailable
            | StorageErrorKind::InvalidRequest
            | StorageErrorKind::Checksum
            | StorageErrorKind::Other => PackageError::BadRequest(error.to_string()),
        }
    }

    /// Translate a failure while streaming a blob to the backend.
    pub(crate) fn from_write(error: &StorageError) -> Self {
        match error.kind() {
            StorageErrorKind::NotFound
            | StorageErrorKind::PermissionDenied
            | StorageErrorKind::AuthExpired
            | StorageErrorKind::Io
            | StorageErrorKind::ServiceUnavailable
            | StorageErrorKind::InvalidRequest
            | StorageErrorKind::Checksum
            | StorageErrorKind::Other => PackageError::BadRequest(error.to_string()),
        }
    }
}

/// Errors raised while resolving configuration or building backends.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No bucket was configured
    #[error("package store requires a bucket name, please define one")]
    MissingBucket,

    /// No project id was configured or found in the environment
    #[error("package store requires a project id (set `projectId` or PACKAGE_STORE_PROJECT_ID)")]
    MissingProjectId,

    /// The object store could not be built
    #[error("building object store: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(PackageError::not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            PackageError::already_exists("left-pad").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PackageError::BadRequest("denied".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PackageError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PackageError::not_implemented("saveToken").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn messages() {
        assert_eq!(
            PackageError::already_exists("left-pad").to_string(),
            "left-pad package already exist"
        );
        assert_eq!(
            PackageError::not_implemented("readTokens").message(),
            "[readTokens] method not implemented"
        );
        assert_eq!(PackageError::not_found().kind(), PackageErrorKind::NotFound);
    }

    #[test]
    fn read_translation() {
        let missing = StorageError::new("memory", StorageErrorKind::NotFound, "gone");
        assert_eq!(PackageError::from_read(&missing).kind(), PackageErrorKind::NotFound);

        let denied = StorageError::new("memory", StorageErrorKind::PermissionDenied, "nope");
        assert_eq!(
            PackageError::from_read(&denied).kind(),
            PackageErrorKind::BadRequest
        );
        assert_eq!(
            PackageError::from_write(&missing).kind(),
            PackageErrorKind::BadRequest
        );
    }
}
