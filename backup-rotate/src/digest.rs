//! SHA-256 checksum sidecars.
//!
//! A sidecar sits next to its archive as `<archive>.sha256` and uses the
//! `sha256sum` line format (`<hex>  <file name>`), so `sha256sum -c` can
//! check it too.

use crate::archive::namer;
use crate::utils::errors::{Result, RotateError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Checksum collaborator used by the rotation and restore flows
pub trait Checksum {
    /// Hash the archive and persist the sidecar; returns the sidecar path
    fn compute_and_store(&self, archive: &Path) -> Result<PathBuf>;

    /// Recompute the archive hash and compare it with the sidecar
    fn verify(&self, archive: &Path, sidecar: &Path) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl Checksum for Sha256Digest {
    fn compute_and_store(&self, archive: &Path) -> Result<PathBuf> {
        let digest = sha256_file(archive)?;
        write_sidecar(archive, &digest)
    }

    fn verify(&self, archive: &Path, sidecar: &Path) -> Result<bool> {
        if !sidecar.is_file() {
            tracing::warn!("Checksum file missing: {}", sidecar.display());
            return Ok(false);
        }

        let Some((expected, recorded_name)) = read_sidecar(sidecar)? else {
            tracing::warn!("Malformed checksum file: {}", sidecar.display());
            return Ok(false);
        };

        if recorded_name != file_name(archive)? {
            tracing::warn!(
                "Checksum file {} describes {}, not {}",
                sidecar.display(),
                recorded_name,
                archive.display()
            );
            return Ok(false);
        }

        Ok(sha256_file(archive)? == expected)
    }
}

/// Sidecar path for an archive
pub fn checksum_path(archive: &Path) -> PathBuf {
    let mut path = archive.as_os_str().to_owned();
    path.push(".");
    path.push(namer::CHECKSUM_EXT);
    PathBuf::from(path)
}

/// Stream a file through SHA-256 and return the lowercase hex digest
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_sidecar(archive: &Path, digest: &str) -> Result<PathBuf> {
    let sidecar = checksum_path(archive);
    let mut file = File::create(&sidecar)?;
    writeln!(file, "{}  {}", digest, file_name(archive)?)?;
    file.sync_all()?;
    Ok(sidecar)
}

/// Returns `(hex digest, file name)`, or `None` if the line is malformed
fn read_sidecar(sidecar: &Path) -> Result<Option<(String, String)>> {
    let content = std::fs::read_to_string(sidecar)?;
    let line = content.lines().next().unwrap_or_default();

    let Some((digest, name)) = line.split_once(char::is_whitespace) else {
        return Ok(None);
    };
    // sha256sum marks binary mode with a leading '*'
    let name = name.trim_start().trim_start_matches('*').trim_end();

    let valid_hex = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid_hex || name.is_empty() {
        return Ok(None);
    }
    Ok(Some((digest.to_ascii_lowercase(), name.to_string())))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RotateError::integrity(path, "path has no file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn archive(dir: &TempDir, content: &[u8]) -> PathBuf {
        let path = dir.path().join("backup-2024-03-09_07-05-01.tar.zst");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sha256_known_value() {
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"abc");
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sidecar_format() {
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"abc");
        let sidecar = Sha256Digest.compute_and_store(&path).unwrap();

        assert_eq!(sidecar, dir.path().join("backup-2024-03-09_07-05-01.tar.zst.sha256"));
        assert_eq!(
            fs::read_to_string(&sidecar).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  \
             backup-2024-03-09_07-05-01.tar.zst\n"
        );
    }

    #[test]
    fn test_verify_untouched_archive() {
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"some archive bytes");
        let sidecar = Sha256Digest.compute_and_store(&path).unwrap();
        assert!(Sha256Digest.verify(&path, &sidecar).unwrap());
    }

    #[test]
    fn test_verify_detects_any_single_byte_change() {
        let dir = TempDir::new().unwrap();
        let original = b"some archive bytes".to_vec();
        let path = archive(&dir, &original);
        let sidecar = Sha256Digest.compute_and_store(&path).unwrap();

        for i in 0..original.len() {
            let mut mutated = original.clone();
            mutated[i] ^= 0x01;
            fs::write(&path, &mutated).unwrap();
            assert!(!Sha256Digest.verify(&path, &sidecar).unwrap(), "byte {}", i);
        }

        fs::write(&path, &original).unwrap();
        assert!(Sha256Digest.verify(&path, &sidecar).unwrap());
    }

    #[test]
    fn test_verify_rejects_missing_or_foreign_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"data");
        assert!(!Sha256Digest.verify(&path, &checksum_path(&path)).unwrap());

        // Correct digest, wrong file name
        let digest = sha256_file(&path).unwrap();
        fs::write(checksum_path(&path), format!("{}  other.tar.zst\n", digest)).unwrap();
        assert!(!Sha256Digest.verify(&path, &checksum_path(&path)).unwrap());

        fs::write(checksum_path(&path), "not a checksum\n").unwrap();
        assert!(!Sha256Digest.verify(&path, &checksum_path(&path)).unwrap());
    }

    #[test]
    fn test_binary_mode_marker_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"data");
        let digest = sha256_file(&path).unwrap();
        fs::write(
            checksum_path(&path),
            format!("{} *backup-2024-03-09_07-05-01.tar.zst\n", digest.to_uppercase()),
        )
        .unwrap();
        assert!(Sha256Digest.verify(&path, &checksum_path(&path)).unwrap());
    }
}
