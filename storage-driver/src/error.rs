use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes object store errors by their meaning, independent of the
/// backend which produced them.
///
/// Callers translate on this kind rather than on error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The object or bucket does not exist.
    NotFound,

    /// The credentials were rejected, or lack access to the object.
    PermissionDenied,

    /// Authentication credentials have expired.
    AuthExpired,

    /// Local or network I/O failed.
    Io,

    /// The backend is temporarily unavailable.
    ServiceUnavailable,

    /// The request was malformed (bad path, bad bucket, unsupported option).
    InvalidRequest,

    /// Uploaded content did not match the checksum computed while streaming.
    Checksum,

    /// Anything else.
    Other,
}

impl StorageErrorKind {
    /// Whether this error kind usually clears up if the operation is tried again.
    ///
    /// Advisory only, nothing in the driver layer retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::ServiceUnavailable | StorageErrorKind::AuthExpired | StorageErrorKind::Io
        )
    }

    /// Whether this error was raised while talking to the backend (as opposed
    /// to a missing object or a rejected request).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::PermissionDenied
                | StorageErrorKind::AuthExpired
                | StorageErrorKind::Io
                | StorageErrorKind::ServiceUnavailable
        )
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::AuthExpired => write!(f, "authentication expired"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::Checksum => write!(f, "checksum mismatch"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An object store error.
///
/// Carries the semantic [`StorageErrorKind`], the engine that raised it,
/// optional bucket/path/context, the underlying error, and a backtrace and
/// span trace captured at construction.
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such object"),
/// )
/// .bucket("packages")
/// .path("left-pad/package.json")
/// .build();
///
/// assert_eq!(error.kind(), StorageErrorKind::NotFound);
/// assert_eq!(error.path(), Some("left-pad/package.json"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Start building an error which carries bucket, path or context.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            bucket: None,
            path: None,
            context: None,
        }
    }

    /// A closure converting a downstream error, for use with `map_err`.
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn open() -> Result<std::fs::File, StorageError> {
    ///     std::fs::File::open("missing.tgz")
    ///         .map_err(StorageError::with("local", StorageErrorKind::Io))
    /// }
    /// ```
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// Convert an I/O error, mapping `NotFound` and `PermissionDenied` to
    /// their storage kinds and everything else to [`StorageErrorKind::Io`].
    pub fn io(engine: &'static str, error: std::io::Error) -> StorageErrorBuilder {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        Self::builder(engine, kind, error)
    }

    /// The error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// The engine which raised this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The bucket, if known.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// The object path, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Additional context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether the error is retryable, see [`StorageErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether the error is not found.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// The backtrace captured at construction.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// The span trace captured at construction.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(bucket) = &self.bucket {
            write!(f, " (bucket: {})", bucket)?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for [`StorageError`] with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the object path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the error, capturing traces at this point.
    #[track_caller]
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            bucket: self.bucket,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

/// Failures collected while deleting a set of objects one at a time.
///
/// Deletion continues past individual failures, so this carries every
/// failure along with the number of objects attempted.
#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} deletions failed", .failures.len())]
pub struct DeleteErrors {
    attempted: usize,
    failures: Vec<StorageError>,
}

impl DeleteErrors {
    /// Collect deletion failures out of `attempted` objects.
    pub fn new(attempted: usize, failures: Vec<StorageError>) -> Self {
        Self { attempted, failures }
    }

    /// The individual failures, in the order they occurred.
    pub fn failures(&self) -> &[StorageError] {
        &self.failures
    }

    /// How many deletions were attempted.
    pub fn attempted(&self) -> usize {
        self.attempted
    }
}
