//! Error types for the caching executor

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types that can occur while serving a request through the cache
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache storage error: {0}")]
    StorageError(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            CacheError::Interrupted
        } else {
            CacheError::IoError(err.to_string())
        }
    }
}

impl From<http::Error> for CacheError {
    fn from(err: http::Error) -> Self {
        CacheError::HttpError(err.to_string())
    }
}

impl CacheError {
    /// Whether this error is the result of a cancelled asynchronous step
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CacheError::Interrupted)
    }

    /// Whether this error came from reading or writing the cache store
    ///
    /// Storage failures on the cache-hit path are recovered locally, either
    /// by answering 504 or by forwarding the request to the backend.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, CacheError::StorageError(_))
    }

    /// Convert error to HTTP status code
    ///
    /// Maps internal errors to the status a surrounding server would answer with:
    /// - Protocol violations: 400 Bad Request
    /// - Backend failures: 502 Bad Gateway
    /// - Interrupted requests: 503 Service Unavailable
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            CacheError::ProtocolError(_) => 400,
            CacheError::BackendError(_) => 502,
            CacheError::HttpError(_) => 502,
            CacheError::Interrupted => 503,
            CacheError::ConfigError(_) => 500,
            CacheError::StorageError(_) => 500,
            CacheError::IoError(_) => 500,
            CacheError::InternalError(_) => 500,
        }
    }

    /// Create a storage error from anything printable
    pub fn storage(message: impl Into<String>) -> Self {
        CacheError::StorageError(message.into())
    }

    /// Create a backend error from anything printable
    pub fn backend(message: impl Into<String>) -> Self {
        CacheError::BackendError(message.into())
    }
}
