//! File system helpers.

pub mod walker;

use std::io;
use std::path::Path;

/// Hard-link `src` to `dest`, falling back to a byte copy (written to a
/// temporary name and renamed) when linking is not possible.
pub fn link_or_copy(src: &Path, dest: &Path) -> io::Result<()> {
    if std::fs::hard_link(src, dest).is_ok() {
        return Ok(());
    }

    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".partial");
    let tmp = std::path::PathBuf::from(tmp);

    if let Err(e) = std::fs::copy(src, &tmp).and_then(|_| std::fs::rename(&tmp, dest)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_link_or_copy() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("a");
        let dest = dir.path().join("b");
        fs::write(&src, b"payload")?;

        link_or_copy(&src, &dest)?;
        assert_eq!(fs::read(&dest)?, b"payload");
        assert!(!dir.path().join("b.partial").exists());
        Ok(())
    }

    #[test]
    fn test_remove_if_exists() -> io::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("x");
        fs::write(&file, b"x")?;

        assert!(remove_if_exists(&file)?);
        assert!(!remove_if_exists(&file)?);
        Ok(())
    }
}
