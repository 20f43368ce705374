//! Archive creation and extraction (tar container, zstd compression).
//!
//! Entries are stored under the source directory's own name, so restoring
//! `/home/me/docs` yields `<target>/docs/...`.

pub mod namer;

use crate::fs::walker::{calculate_total_size, count_files, walk_directory, WalkOptions};
use crate::utils::errors::{Result, RotateError};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Summary of a written archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Entries written (files and directories)
    pub entries: u64,
    /// Regular files written
    pub files: u64,
    /// Uncompressed bytes read from the source
    pub source_bytes: u64,
    /// Size of the compressed archive on disk
    pub archive_bytes: u64,
}

/// Archival collaborator: directory tree in, single archive file out
pub trait Archiver {
    /// Write an archive of `source` to `dest`, checking `cancel` between entries
    fn create(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats>;

    /// Files and bytes that `create` would archive, without writing anything
    fn estimate(&self, source: &Path) -> Result<(usize, u64)>;

    /// Read the whole archive back and count its entries
    fn count_entries(&self, archive: &Path) -> Result<u64>;

    /// Unpack into `target`; returns the number of entries written
    fn extract(&self, archive: &Path, target: &Path) -> Result<u64>;
}

pub struct TarZstdArchiver {
    level: i32,
    walk_options: WalkOptions,
}

impl TarZstdArchiver {
    pub fn new(level: i32, walk_options: WalkOptions) -> Self {
        Self {
            level,
            walk_options,
        }
    }

    /// Never descend into `dir` (used for a backup root nested in the source)
    pub fn skip_dir(&mut self, dir: PathBuf) {
        self.walk_options.skip_dirs.push(dir);
    }

    fn write_archive(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats> {
        let top = source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("source"));

        let entries = walk_directory(source, &self.walk_options)
            .map_err(|e| archival(format!("failed to scan {}: {}", source.display(), e)))?;

        let file = File::create(dest)?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), self.level)?;
        let mut builder = tar::Builder::new(encoder);

        let mut stats = ArchiveStats::default();
        builder.append_dir(&top, source).map_err(|e| archival_io(source, e))?;
        stats.entries += 1;

        for entry in &entries {
            if cancel.is_cancelled() {
                return Err(RotateError::Interrupted);
            }

            let name = top.join(&entry.relative_path);
            if entry.is_dir {
                builder
                    .append_dir(&name, &entry.path)
                    .map_err(|e| archival_io(&entry.path, e))?;
            } else {
                builder
                    .append_path_with_name(&entry.path, &name)
                    .map_err(|e| archival_io(&entry.path, e))?;
                stats.files += 1;
                stats.source_bytes += entry.size;
            }
            stats.entries += 1;
            debug!("Archived {}", entry.relative_path.display());
        }

        let encoder = builder.into_inner()?;
        let writer = encoder.finish()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        stats.archive_bytes = std::fs::metadata(dest)?.len();
        Ok(stats)
    }

    fn open(archive: &Path) -> Result<tar::Archive<zstd::Decoder<'static, io::BufReader<File>>>> {
        let decoder = zstd::Decoder::new(File::open(archive)?)?;
        Ok(tar::Archive::new(decoder))
    }
}

impl Archiver for TarZstdArchiver {
    fn create(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats> {
        info!("Archiving {} -> {}", source.display(), dest.display());
        self.write_archive(source, dest, cancel)
    }

    fn estimate(&self, source: &Path) -> Result<(usize, u64)> {
        let files = count_files(source, &self.walk_options)?;
        let bytes = calculate_total_size(source, &self.walk_options)?;
        Ok((files, bytes))
    }

    fn count_entries(&self, archive: &Path) -> Result<u64> {
        let mut tar = Self::open(archive)?;
        let mut count = 0;
        for entry in tar.entries().map_err(|e| corrupt(archive, e))? {
            let mut entry = entry.map_err(|e| corrupt(archive, e))?;
            // Draining each entry forces the full zstd stream to be decoded
            io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupt(archive, e))?;
            count += 1;
        }
        Ok(count)
    }

    fn extract(&self, archive: &Path, target: &Path) -> Result<u64> {
        let mut tar = Self::open(archive)?;
        tar.set_preserve_permissions(true);
        tar.set_overwrite(true);

        let mut count = 0;
        for entry in tar.entries()? {
            let mut entry = entry?;
            // unpack_in refuses entries that would escape `target`
            if entry.unpack_in(target)? {
                count += 1;
            } else {
                tracing::warn!("Skipped unsafe entry {}", entry.path()?.display());
            }
        }
        Ok(count)
    }
}

fn archival(msg: String) -> RotateError {
    RotateError::ArchivalFailure(msg)
}

fn archival_io(path: &Path, err: io::Error) -> RotateError {
    archival(format!("{}: {}", path.display(), err))
}

fn corrupt(archive: &Path, err: io::Error) -> RotateError {
    RotateError::integrity(archive, format!("unreadable archive: {}", err))
}
