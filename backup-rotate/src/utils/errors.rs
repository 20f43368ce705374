//! Custom error types for backup rotation.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RotateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another run is active (lock held at {path}{holder})")]
    LockHeld { path: PathBuf, holder: String },

    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Archive creation failed: {0}")]
    ArchivalFailure(String),

    #[error("Integrity check failed for {path}: {reason}")]
    Integrity { path: PathBuf, reason: String },

    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("Run interrupted by signal")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used to label a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    LockHeld,
    SourceNotFound,
    PermissionDenied,
    ArchivalFailure,
    Integrity,
    ArchiveNotFound,
    Interrupted,
    Io,
}

impl RotateError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RotateError::Config(_) => FailureKind::Config,
            RotateError::LockHeld { .. } => FailureKind::LockHeld,
            RotateError::SourceNotFound(_) => FailureKind::SourceNotFound,
            RotateError::PermissionDenied(_) => FailureKind::PermissionDenied,
            RotateError::ArchivalFailure(_) => FailureKind::ArchivalFailure,
            RotateError::Integrity { .. } => FailureKind::Integrity,
            RotateError::ArchiveNotFound(_) => FailureKind::ArchiveNotFound,
            RotateError::Interrupted => FailureKind::Interrupted,
            RotateError::Io(_) | RotateError::Serialization(_) => FailureKind::Io,
        }
    }

    pub(crate) fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RotateError::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for RotateError {
    fn from(err: config::ConfigError) -> Self {
        RotateError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RotateError>;
