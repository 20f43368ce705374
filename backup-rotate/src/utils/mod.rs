//! Utility modules for backup rotation.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{FailureKind, Result, RotateError};
