//! Backup Rotate Library
//!
//! Archives a source directory into compressed, checksummed bundles and keeps
//! daily, weekly and monthly tiers pruned to their configured sizes.

pub mod archive;
pub mod config;
pub mod digest;
pub mod fs;
pub mod inventory;
pub mod restore;
pub mod retention;
pub mod root;
pub mod rotation;
pub mod shutdown;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::RotateError;
pub type Result<T> = std::result::Result<T, RotateError>;
