//! On-disk layout of a backup root.
//!
//! ```text
//! <root>/
//!   daily/   weekly/   monthly/     archives + .sha256 sidecars
//!   restore/                        default restore target
//!   backup.log                      append-only run log
//!   .backup-rotate.lock             present while a rotation runs
//! ```

use crate::retention::Tier;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".backup-rotate.lock";
pub const RESTORE_DIR_NAME: &str = "restore";

#[derive(Debug, Clone)]
pub struct BackupRoot {
    path: PathBuf,
    log_file: PathBuf,
}

impl BackupRoot {
    pub fn new(path: impl Into<PathBuf>, log_file: impl AsRef<Path>) -> Self {
        let path = path.into();
        let log_file = path.join(log_file);
        Self { path, log_file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.path.join(tier.dir_name())
    }

    pub fn restore_dir(&self) -> PathBuf {
        self.path.join(RESTORE_DIR_NAME)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_file
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE_NAME)
    }

    /// Create the root and its tier directories if missing
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for tier in Tier::ALL {
            std::fs::create_dir_all(self.tier_dir(tier))?;
        }
        Ok(())
    }
}
