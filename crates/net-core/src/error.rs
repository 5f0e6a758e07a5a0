//! Error types for capture, persistence and apply operations

use std::io;
use std::path::Path;
use std::time::Duration;

use netstate_types::{SharedTypeError, Violation};
use thiserror::Error;

/// Main error type for netstate operations
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation failed: {0}")]
    Validation(#[from] Violation),

    #[error("Apply step '{step}' failed: {reason}")]
    ApplyStepFailed { step: String, reason: String },

    #[error("Invalid value: {0}")]
    Shared(#[from] SharedTypeError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetworkError {
    /// Whether the error means persisted state could not be read at all.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, NetworkError::Store(StoreError::Corrupt { .. }))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, NetworkError::Store(StoreError::PermissionDenied { .. }))
    }
}

/// Failures reported by interface, rule and declarative backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("Interface not found: {name}")]
    InterfaceNotFound { name: String },

    #[error("Rule not found in {chain}: {rule}")]
    RuleNotFound { chain: String, rule: String },

    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },
}

/// Snapshot persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Permission denied: {path}")]
    PermissionDenied {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt snapshot {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("File operation failed: {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Classify an I/O failure on `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.display().to_string();
        if source.kind() == io::ErrorKind::PermissionDenied {
            StoreError::PermissionDenied { path, source }
        } else {
            StoreError::Io { path, source }
        }
    }
}
