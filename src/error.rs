//! Error types for the storage backend.

use std::fmt;

use thiserror::Error;

/// Which pending queue an operation was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// The write (upload) queue.
    Writes,
    /// The delete queue.
    Deletes,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writes => f.write_str("write"),
            Self::Deletes => f.write_str("delete"),
        }
    }
}

/// One entry that could not be flushed, with the reason.
#[derive(Debug, Clone)]
pub struct FlushFailure {
    /// Storage key of the failed entry.
    pub key: String,
    /// Underlying client error message.
    pub message: String,
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.key, self.message)
    }
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Credentials or configuration are unusable. Raised at adapter
    /// construction, never deferred to first use.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// A remote call failed for a specific storage key. Distinct from a
    /// clean not-found result on existence checks.
    #[error("remote operation failed for '{key}': {message}")]
    Remote {
        /// Storage key the call was addressed to.
        key: String,
        /// Underlying transport or API error message.
        message: String,
    },

    /// One or more queued entries failed to flush. Successes were removed
    /// from the queue; the listed entries remain queued for retry.
    #[error("flush incomplete, {} entries still queued: {}", .failures.len(), format_failures(.failures))]
    FlushIncomplete {
        /// The entries that failed, with their storage keys and causes.
        failures: Vec<FlushFailure>,
    },

    /// A flush was attempted while a prior flush of the same queue on this
    /// adapter instance was still in progress.
    #[error("{queue} queue is already flushing")]
    QueueBusy {
        /// The queue that was busy.
        queue: QueueKind,
    },
}

fn format_failures(failures: &[FlushFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a remote error for a storage key.
    #[must_use]
    pub fn remote(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Storage keys retained in the queue after an incomplete flush.
    #[must_use]
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            Self::FlushIncomplete { failures } => {
                failures.iter().map(|f| f.key.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Classified failure from the object-storage client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// The object does not exist. A clean miss, not a transport failure.
    NotFound,
    /// The call did not complete within the configured deadline.
    Timeout,
    /// Any other transport or API failure.
    Transport,
}

/// Error returned by an [`ObjectClient`](crate::client::ObjectClient).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClientError {
    kind: ClientErrorKind,
    message: String,
}

impl ClientError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self {
            kind: ClientErrorKind::NotFound,
            message: format!("object not found: {}", key.into()),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self {
            kind: ClientErrorKind::Timeout,
            message: msg.into(),
        }
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self {
            kind: ClientErrorKind::Transport,
            message: msg.into(),
        }
    }

    /// The failure classification.
    #[must_use]
    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    /// Whether this is a clean not-found result.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ClientErrorKind::NotFound
    }
}

impl From<opendal::Error> for ClientError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self {
                kind: ClientErrorKind::NotFound,
                message: err.to_string(),
            },
            _ => Self::transport(err.to_string()),
        }
    }
}
