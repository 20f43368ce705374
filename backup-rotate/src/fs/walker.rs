//! Directory traversal for archive creation.
//!
//! Excluded directories are pruned, so nothing below them is visited.

use crate::utils::errors::{Result, RotateError};
use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Compiled exclude patterns (glob-style)
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    RotateError::Config(format!("invalid exclude pattern {:?}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// A pattern matches either the entry's own name or its path relative
    /// to the walk root.
    pub fn is_excluded(&self, file_name: &str, relative_path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches(file_name) || p.matches_path(relative_path))
    }
}

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Exclude patterns
    pub excludes: ExcludeSet,

    /// Absolute directories never descended into (e.g. the backup root
    /// itself when it lives inside the source)
    pub skip_dirs: Vec<PathBuf>,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None if the symlink target is a directory or cannot be resolved.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let is_symlink = raw_metadata.is_symlink();

        let (size, is_dir) = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => (resolved.len(), false),
                // Broken symlink
                Err(_) => return Ok(None),
            }
        } else if raw_metadata.is_dir() {
            (0, true)
        } else {
            (raw_metadata.len(), false)
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
            is_dir,
            is_symlink,
        }))
    }
}

/// Walk a directory tree and collect files and directories below `root`
/// (the root itself is not included), parents before children.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, options, |info| files.push(info.clone()))?;
    Ok(files)
}

/// Walk a directory tree with a callback for each entry
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> std::io::Result<()>
where
    F: FnMut(&FileInfo),
{
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !should_skip(entry, root, options));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            callback(&file_info);
        }
    }

    Ok(())
}

/// Count regular files in a directory (fast, without collecting)
pub fn count_files(root: &Path, options: &WalkOptions) -> std::io::Result<usize> {
    let mut count = 0;

    walk_directory_with_callback(root, options, |file| {
        if !file.is_dir {
            count += 1;
        }
    })?;

    Ok(count)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> std::io::Result<u64> {
    let mut total_size = 0u64;

    walk_directory_with_callback(root, options, |file| {
        total_size += file.size;
    })?;

    Ok(total_size)
}

fn should_skip(entry: &DirEntry, root: &Path, options: &WalkOptions) -> bool {
    if entry.file_type().is_dir() && options.skip_dirs.iter().any(|d| d == entry.path()) {
        return true;
    }

    let file_name = entry.file_name().to_string_lossy();
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    options.excludes.is_excluded(&file_name, relative)
}
