use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes datastore errors independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreErrorKind {
    /// The request was malformed, e.g. an incomplete key passed to `get`.
    InvalidRequest,

    /// The credentials were rejected.
    PermissionDenied,

    /// Local or network I/O failed.
    Io,

    /// Stored data could not be decoded.
    Corrupt,

    /// The backend is temporarily unavailable.
    ServiceUnavailable,

    /// Anything else.
    Other,
}

impl fmt::Display for DatastoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastoreErrorKind::InvalidRequest => write!(f, "invalid request"),
            DatastoreErrorKind::PermissionDenied => write!(f, "permission denied"),
            DatastoreErrorKind::Io => write!(f, "I/O error"),
            DatastoreErrorKind::Corrupt => write!(f, "corrupt data"),
            DatastoreErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            DatastoreErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// A datastore error.
///
/// Carries the [`DatastoreErrorKind`], the engine which raised it, the
/// entity kind and context where known, and a span trace.
#[derive(Debug)]
pub struct DatastoreError {
    kind: DatastoreErrorKind,
    engine: &'static str,
    entity: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    span_trace: Box<SpanTrace>,
}

impl StdError for DatastoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl DatastoreError {
    /// Create a new error.
    pub fn new<E>(engine: &'static str, kind: DatastoreErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            entity: None,
            context: None,
            source: error.into(),
            span_trace: Box::new(SpanTrace::capture()),
        }
    }

    /// Convert an I/O error.
    pub fn io(engine: &'static str, error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::PermissionDenied => DatastoreErrorKind::PermissionDenied,
            _ => DatastoreErrorKind::Io,
        };
        Self::new(engine, kind, error)
    }

    /// Record the entity (key or kind) involved.
    pub fn entity(mut self, entity: impl fmt::Display) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    /// Record additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The error kind.
    pub fn kind(&self) -> DatastoreErrorKind {
        self.kind
    }

    /// The engine which raised this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The span trace captured at construction.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl fmt::Display for DatastoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datastore error [{}] from {}", self.kind, self.engine)?;

        if let Some(entity) = &self.entity {
            write!(f, " (entity: {})", entity)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}
