//! Advisory run lock.
//!
//! The lock is a marker file created with `create_new`, so exactly one
//! process can win. It records who holds it. A process that crashes leaves
//! the marker behind; a marker whose holder pid no longer exists on this
//! host is reclaimed when `reclaim_stale` is set, anything else must be
//! removed by hand.
//!
//! Reclaimers serialize on a `flock` of the directory holding the marker and
//! re-read the marker under it, so a marker is only removed while it still
//! names the dead holder.

use crate::utils::errors::{Result, RotateError};
use chrono::{DateTime, Utc};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Contents of the lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn current(run_id: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: current_hostname(),
            run_id: run_id.into(),
            started_at: Utc::now(),
        }
    }
}

/// Scoped lock guard; the marker is removed when the guard drops.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    /// False for a dry-run probe, which never writes a marker
    held: bool,
}

impl RunLock {
    pub fn acquire(path: &Path, info: &LockInfo, reclaim_stale: bool) -> Result<Self> {
        let contents = serde_json::to_vec_pretty(info)?;

        // Second attempt only happens after reclaiming a stale marker
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Guard first: a failed write must not strand an empty marker
                    let lock = Self {
                        path: path.to_path_buf(),
                        held: true,
                    }
                    .write_marker(&mut file, &contents)?;
                    file.sync_all()?;
                    debug!("Lock acquired: {}", path.display());
                    return Ok(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !(reclaim_stale && try_reclaim(path)?) {
                        return Err(held_error(path));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(held_error(path))
    }

    /// Dry-run check: fails like `acquire` when another run is active but
    /// never creates or removes a marker.
    pub fn probe(path: &Path, reclaim_stale: bool) -> Result<Self> {
        if path.exists() {
            let stale = reclaim_stale && read_holder(path).is_some_and(|h| holder_is_dead(&h));
            if !stale {
                return Err(held_error(path));
            }
            info!("[dry-run] Would reclaim stale lock {}", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            held: false,
        })
    }

    fn write_marker<W: Write>(self, writer: &mut W, contents: &[u8]) -> Result<Self> {
        writer.write_all(contents)?;
        writer.flush()?;
        Ok(self)
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Release explicitly, surfacing removal errors
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        crate::fs::remove_if_exists(&self.path)?;
        debug!("Lock released: {}", self.path.display());
        Ok(())
    }

    /// Last-resort removal used when a worker does not wind down in time
    pub fn force_release(path: &Path) {
        match crate::fs::remove_if_exists(path) {
            Ok(true) => warn!("Removed lock {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove lock {}: {}", path.display(), e),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        match crate::fs::remove_if_exists(&self.path) {
            Ok(_) => debug!("Lock released: {}", self.path.display()),
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

/// Holder recorded in a marker, or None if unreadable
pub fn read_holder(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

fn try_reclaim(path: &Path) -> Result<bool> {
    let Some(holder) = read_holder(path) else {
        return Ok(false);
    };
    if !holder_is_dead(&holder) {
        return Ok(false);
    }

    let _guard = lock_marker_dir(path)?;
    match read_holder(path) {
        Some(current) if current == holder => {}
        // Another run reclaimed first; retry only if its marker is already gone
        Some(_) => return Ok(false),
        None => return Ok(!path.exists()),
    }

    warn!(
        "Reclaiming stale lock {} (pid {} on {} started {})",
        path.display(),
        holder.pid,
        holder.hostname,
        holder.started_at
    );
    crate::fs::remove_if_exists(path)?;
    Ok(true)
}

/// Exclusive `flock` on the marker's directory, dropped with the guard
fn lock_marker_dir(path: &Path) -> Result<Flock<File>> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = File::open(dir)?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| RotateError::Io(std::io::Error::from(errno)))
}

/// Only holders on this host can be checked; a pid that signal 0 reports
/// as nonexistent is dead. Permission errors mean the process exists.
fn holder_is_dead(holder: &LockInfo) -> bool {
    if holder.hostname != current_hostname() {
        return false;
    }
    let Ok(raw) = i32::try_from(holder.pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    matches!(
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None),
        Err(nix::errno::Errno::ESRCH)
    )
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn held_error(path: &Path) -> RotateError {
    let holder = read_holder(path)
        .map(|h| format!(", pid {} on {} since {}", h.pid, h.hostname, h.started_at))
        .unwrap_or_default();
    RotateError::LockHeld {
        path: path.to_path_buf(),
        holder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join(".backup-rotate.lock")
    }

    #[test]
    fn test_acquire_writes_marker_and_drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        {
            let lock = RunLock::acquire(&path, &LockInfo::current("run-1"), true).unwrap();
            assert!(lock.is_held());
            let holder = read_holder(&path).unwrap();
            assert_eq!(holder.pid, std::process::id());
            assert_eq!(holder.run_id, "run-1");
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_is_lock_held() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let _first = RunLock::acquire(&path, &LockInfo::current("run-1"), true).unwrap();
        let err = RunLock::acquire(&path, &LockInfo::current("run-2"), true).unwrap_err();
        assert!(matches!(err, RotateError::LockHeld { .. }));

        // The loser must not have clobbered the winner's marker
        assert_eq!(read_holder(&path).unwrap().run_id, "run-1");
    }

    #[test]
    fn test_explicit_release() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let lock = RunLock::acquire(&path, &LockInfo::current("run-1"), false).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());

        // Free again
        let _again = RunLock::acquire(&path, &LockInfo::current("run-2"), false).unwrap();
    }

    #[test]
    fn test_stale_marker_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let mut dead = LockInfo::current("crashed");
        dead.pid = i32::MAX as u32;
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let lock = RunLock::acquire(&path, &LockInfo::current("run-2"), true).unwrap();
        assert_eq!(read_holder(&path).unwrap().run_id, "run-2");
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_reclaim_has_one_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Barrier;

        const CONTENDERS: usize = 16;

        for round in 0..200 {
            let dir = TempDir::new().unwrap();
            let path = lock_path(&dir);
            let mut dead = LockInfo::current("crashed");
            dead.pid = i32::MAX as u32;
            std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

            let start = Barrier::new(CONTENDERS);
            let settled = Barrier::new(CONTENDERS);
            let winners = AtomicUsize::new(0);

            std::thread::scope(|scope| {
                for n in 0..CONTENDERS {
                    let (path, start, settled, winners) = (&path, &start, &settled, &winners);
                    scope.spawn(move || {
                        start.wait();
                        let info = LockInfo::current(format!("run-{}-{}", round, n));
                        let lock = RunLock::acquire(path, &info, true);
                        if lock.is_ok() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                        // Every guard stays alive until all contenders are done
                        settled.wait();
                        drop(lock);
                    });
                }
            });

            assert_eq!(winners.load(Ordering::SeqCst), 1, "round {}", round);
        }
    }

    #[test]
    fn test_failed_marker_write_removes_marker() {
        struct FullDisk;
        impl Write for FullDisk {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("no space left on device"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        std::fs::File::create(&path).unwrap();

        let guard = RunLock {
            path: path.clone(),
            held: true,
        };
        let err = guard.write_marker(&mut FullDisk, b"{}").unwrap_err();
        assert!(matches!(err, RotateError::Io(_)));
        assert!(!path.exists());

        // Nothing left behind to block the next run
        let _lock = RunLock::acquire(&path, &LockInfo::current("run-2"), false).unwrap();
    }

    #[test]
    fn test_stale_marker_kept_when_reclaim_disabled() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let mut dead = LockInfo::current("crashed");
        dead.pid = i32::MAX as u32;
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let err = RunLock::acquire(&path, &LockInfo::current("run-2"), false).unwrap_err();
        assert!(matches!(err, RotateError::LockHeld { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_unreadable_marker_counts_as_held() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, b"").unwrap();

        let err = RunLock::acquire(&path, &LockInfo::current("run-2"), true).unwrap_err();
        assert!(matches!(err, RotateError::LockHeld { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_remote_holder_is_never_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let mut remote = LockInfo::current("elsewhere");
        remote.pid = i32::MAX as u32;
        remote.hostname = format!("{}-other", current_hostname());
        std::fs::write(&path, serde_json::to_vec(&remote).unwrap()).unwrap();

        assert!(RunLock::acquire(&path, &LockInfo::current("run-2"), true).is_err());
    }

    #[test]
    fn test_probe_never_writes() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let probe = RunLock::probe(&path, true).unwrap();
        assert!(!probe.is_held());
        assert!(!path.exists());
        drop(probe);

        let _held = RunLock::acquire(&path, &LockInfo::current("run-1"), true).unwrap();
        let err = RunLock::probe(&path, true).unwrap_err();
        assert!(matches!(err, RotateError::LockHeld { .. }));
        assert!(path.exists());
    }
}
