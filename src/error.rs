//! Error types for trails-core.
//!
//! Audit failures are never surfaced to the code performing a mutation.
//! These errors travel between the pipeline, the registry and the external
//! collaborators, and end up in the log when a trail cannot be recorded.

use thiserror::Error;

/// Errors that can occur while resolving configuration or recording a trail.
#[derive(Debug, Error)]
pub enum Error {
    /// A wildcard pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern {
        /// The offending pattern as configured
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// A trail reached the pipeline without an action kind
    #[error("Trail action must be present")]
    MissingAction,

    /// The configured pipeline names a step that is not registered
    #[error("Unknown pipeline step '{0}'")]
    UnknownStep(String),

    /// A pipeline step failed
    #[error("Pipeline step '{step}' failed: {reason}")]
    Step {
        /// Name of the failing step
        step: String,
        /// Failure description
        reason: String,
    },

    /// Writing a trail or marker failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// TOML configuration could not be parsed
    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure reported by a [`TrailStore`](crate::audit::TrailStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error ({kind}): {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
}

impl StorageError {
    /// Creates a new storage error.
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Kind of storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The backing store could not be reached.
    Unavailable,
    /// The record was rejected by the store.
    Rejected,
    /// The marker references a trail the store does not know.
    UnknownTrail,
}

impl std::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Rejected => write!(f, "rejected"),
            Self::UnknownTrail => write!(f, "unknown trail"),
        }
    }
}

/// Failure reported by an [`EntityLoader`](crate::model::EntityLoader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load {entity}: {reason}")]
pub struct LoadError {
    /// Label of the entity type being loaded
    pub entity: String,
    /// Failure description
    pub reason: String,
}

impl LoadError {
    /// Creates a new load error.
    pub fn new(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for trails operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_display() {
        let err = StorageError::new(StorageErrorKind::Unavailable, "disk full");
        assert_eq!(err.to_string(), "storage error (unavailable): disk full");
        assert_eq!(err.kind(), StorageErrorKind::Unavailable);
        assert_eq!(err.message(), "disk full");
    }

    #[test]
    fn storage_error_converts_transparently() {
        let err: Error = StorageError::new(StorageErrorKind::Rejected, "constraint").into();
        assert_eq!(err.to_string(), "storage error (rejected): constraint");
    }

    #[test]
    fn step_error_names_the_step() {
        let err = Error::Step {
            step: "create_database_trail".to_string(),
            reason: "boom".to_string(),
        };
        assert!(err.to_string().contains("create_database_trail"));
    }

    #[test]
    fn load_error_display() {
        let err = LoadError::new("app.user", "connection reset");
        assert_eq!(err.to_string(), "failed to load app.user: connection reset");
    }
}
