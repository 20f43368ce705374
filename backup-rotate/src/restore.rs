//! Restore an archive into a target directory.
//!
//! Restore runs outside the rotation lock. Checksum verification is opt-in;
//! without it an archive is extracted as found.

use crate::archive::{Archiver, TarZstdArchiver};
use crate::config::Config;
use crate::digest::{checksum_path, Checksum, Sha256Digest};
use crate::fs::walker::WalkOptions;
use crate::utils::errors::{Result, RotateError};
use crate::utils::format::format_duration;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    pub dry_run: bool,
    /// Check the `.sha256` sidecar before extracting
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub archive: PathBuf,
    pub target: PathBuf,
    pub dry_run: bool,
    pub verified: bool,
    /// Entries extracted, or found in the archive for a dry-run
    pub entries: u64,
    pub elapsed: Duration,
}

pub struct RestoreController<A = TarZstdArchiver, D = Sha256Digest> {
    archiver: A,
    digest: D,
}

impl RestoreController {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            TarZstdArchiver::new(config.archive.compression_level, WalkOptions::default()),
            Sha256Digest,
        )
    }
}

impl<A: Archiver, D: Checksum> RestoreController<A, D> {
    pub fn new(archiver: A, digest: D) -> Self {
        Self { archiver, digest }
    }

    pub fn restore(
        &self,
        archive: &Path,
        target: &Path,
        options: RestoreOptions,
    ) -> Result<RestoreResult> {
        let started = Instant::now();
        check_archive(archive)?;

        if options.verify {
            let sidecar = checksum_path(archive);
            if !self.digest.verify(archive, &sidecar)? {
                return Err(RotateError::integrity(
                    archive,
                    format!("checksum missing or mismatched ({})", sidecar.display()),
                ));
            }
            info!("Checksum verified for {}", archive.display());
        }

        let entries = if options.dry_run {
            let entries = self.archiver.count_entries(archive)?;
            info!(
                "[dry-run] Would extract {} entries from {} into {}",
                entries,
                archive.display(),
                target.display()
            );
            entries
        } else {
            std::fs::create_dir_all(target)?;
            info!("Restoring {} into {}", archive.display(), target.display());
            self.archiver.extract(archive, target)?
        };

        let result = RestoreResult {
            archive: archive.to_path_buf(),
            target: target.to_path_buf(),
            dry_run: options.dry_run,
            verified: options.verify,
            entries,
            elapsed: started.elapsed(),
        };
        if !options.dry_run {
            info!(
                "Restore complete: {} entries in {}",
                result.entries,
                format_duration(result.elapsed)
            );
        }
        Ok(result)
    }
}

/// Archive must be an existing, readable regular file
fn check_archive(archive: &Path) -> Result<()> {
    let not_found = || RotateError::ArchiveNotFound(archive.to_path_buf());
    let metadata = std::fs::metadata(archive).map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    File::open(archive).map_err(|_| not_found())?;
    Ok(())
}
