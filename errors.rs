// Error types for kvtree
// Every fatal condition surfaces here and is returned to the caller

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for kvtree operations
#[derive(Debug)]
pub enum KvTreeError {
    /// I/O operation failed
    Io {
        context: String,
        source: io::Error,
    },

    /// JSON could not be parsed or produced
    Json {
        context: String,
        source: serde_json::Error,
    },

    /// HTTP request to the store failed before a response was read
    Http {
        context: String,
        source: reqwest::Error,
    },

    /// A value kind that has no canonical byte form
    UnsupportedValue {
        path: String,
        kind: &'static str,
    },

    /// Store address that cannot carry a key path
    InvalidAddress {
        address: String,
        reason: String,
    },

    /// The store rejected or failed a single write
    WriteFailed {
        key: String,
        reason: String,
    },

    /// Listing a prefix from the store failed
    ReadFailed {
        prefix: String,
        reason: String,
    },

    /// A blocking task panicked or was cancelled
    TaskFailed {
        reason: String,
    },
}

impl fmt::Display for KvTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvTreeError::Io { context, source } => {
                write!(f, "I/O error during {}: {}", context, source)
            }

            KvTreeError::Json { context, source } => {
                write!(f, "JSON error during {}: {}", context, source)
            }

            KvTreeError::Http { context, source } => {
                write!(f, "HTTP error during {}: {}", context, source)
            }

            KvTreeError::UnsupportedValue { path, kind } => {
                write!(f, "Unsupported value at '{}': {} cannot be stored as bytes. \
                           Only strings, numbers and objects are allowed", path, kind)
            }

            KvTreeError::InvalidAddress { address, reason } => {
                write!(f, "Invalid store address '{}': {}", address, reason)
            }

            KvTreeError::WriteFailed { key, reason } => {
                write!(f, "Failed to write '{}': {}", key, reason)
            }

            KvTreeError::ReadFailed { prefix, reason } => {
                write!(f, "Failed to list prefix '{}': {}", prefix, reason)
            }

            KvTreeError::TaskFailed { reason } => {
                write!(f, "Background task failed: {}", reason)
            }
        }
    }
}

impl Error for KvTreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            KvTreeError::Io { source, .. } => Some(source),
            KvTreeError::Json { source, .. } => Some(source),
            KvTreeError::Http { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for kvtree operations
pub type Result<T> = std::result::Result<T, KvTreeError>;

/// Helper trait for adding context to io::Errors
pub trait IoContext<T> {
    fn io_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| KvTreeError::Io {
            context: context.into(),
            source: e,
        })
    }
}

/// Same as [`IoContext`] for serde_json errors
pub trait JsonContext<T> {
    fn json_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> JsonContext<T> for serde_json::Result<T> {
    fn json_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| KvTreeError::Json {
            context: context.into(),
            source: e,
        })
    }
}
