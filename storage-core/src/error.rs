use std::fmt;

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Machine-readable cause attached to [`StorageError::Backend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCause {
    /// The server could not be reached or the session dropped
    Connection,
    /// Credentials were rejected
    Authentication,
    /// An operation was issued before `connect()`
    NotConnected,
    /// The server answered with an error
    Server,
    /// A bucket was only partially removed
    PartialDrop,
    /// The server answered with something we could not interpret
    Protocol,
}

impl BackendCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendCause::Connection => "connection",
            BackendCause::Authentication => "authentication",
            BackendCause::NotConnected => "not-connected",
            BackendCause::Server => "server",
            BackendCause::PartialDrop => "partial-drop",
            BackendCause::Protocol => "protocol",
        }
    }
}

impl fmt::Display for BackendCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage {scheme} is not supported")]
    UnsupportedBackend { scheme: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Backend error ({cause}): {message}")]
    Backend {
        cause: BackendCause,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Integrity check failed for '{name}': local hash {local} didn't match server one {remote}")]
    Integrity {
        name: String,
        local: String,
        remote: String,
    },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Create a server-side backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::backend_with(BackendCause::Server, error)
    }

    /// Create a backend error with an explicit cause
    pub fn backend_with<E>(cause: BackendCause, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            cause,
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Create a backend error that has no underlying source error
    pub fn backend_message<S: Into<String>>(cause: BackendCause, message: S) -> Self {
        Self::Backend {
            cause,
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(kind: &'static str, name: S) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn not_connected() -> Self {
        Self::backend_message(BackendCause::NotConnected, "connect() was not called")
    }

    /// Backend cause, if this is a backend error
    pub fn cause(&self) -> Option<BackendCause> {
        match self {
            StorageError::Backend { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, StorageError::Integrity { .. })
    }
}
