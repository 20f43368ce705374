//! One end-to-end rotation run.
//!
//! The controller drives the run state machine: lock, archive the source
//! into the daily tier, verify it, copy it into weekly/monthly tiers on
//! qualifying days, then prune every tier down to its keep count. In
//! dry-run mode the same path is walked but every mutating step becomes a
//! log line.

use super::lock::{LockInfo, RunLock};
use super::state::RunState;
use crate::archive::{namer, ArchiveStats, Archiver, TarZstdArchiver};
use crate::config::Config;
use crate::digest::{checksum_path, Checksum, Sha256Digest};
use crate::fs::walker::{ExcludeSet, WalkOptions};
use crate::inventory::{scan_tier, ArchiveEntry};
use crate::retention::{self, calendar, RetentionPolicy, Tier};
use crate::root::BackupRoot;
use crate::utils::errors::{Result, RotateError};
use crate::utils::format::{format_bytes, format_duration};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a completed rotation run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub state: RunState,
    pub transitions: Vec<RunState>,
    /// Daily archive written (or that would be written in dry-run)
    pub archive: Option<PathBuf>,
    /// None in dry-run
    pub stats: Option<ArchiveStats>,
    pub tier_copies: Vec<(Tier, PathBuf)>,
    pub deleted: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(run_id: String, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            state: RunState::Idle,
            transitions: Vec::new(),
            archive: None,
            stats: None,
            tier_copies: Vec::new(),
            deleted: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// When a run starts. Archive names carry the UTC instant so they keep
/// sorting in creation order across DST changes; tier copies follow the
/// local calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunClock {
    pub utc: NaiveDateTime,
    pub local_date: NaiveDate,
}

impl RunClock {
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    /// `at` in its own time zone supplies the calendar date
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            utc: at.naive_utc(),
            local_date: at.date_naive(),
        }
    }
}

/// Files written by the current step. Unless committed they are removed
/// when the guard drops, so a failed or interrupted step leaves nothing.
#[derive(Default)]
struct PendingArtifacts {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl PendingArtifacts {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PendingArtifacts {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in self.paths.iter().rev() {
            match crate::fs::remove_if_exists(path) {
                Ok(true) => info!("Removed incomplete artifact {}", path.display()),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Rotation run driver
pub struct RotationController<A = TarZstdArchiver, D = Sha256Digest> {
    root: BackupRoot,
    policy: RetentionPolicy,
    archiver: A,
    digest: D,
    reclaim_stale_lock: bool,
    cancel: CancellationToken,
    state: RunState,
    transitions: Vec<RunState>,
}

impl RotationController {
    /// Controller wired with the tar+zstd archiver and SHA-256 sidecars
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = BackupRoot::new(&config.backup.root, &config.log.file);
        let mut archiver = TarZstdArchiver::new(
            config.archive.compression_level,
            WalkOptions {
                excludes: ExcludeSet::new(&config.backup.exclude)?,
                ..WalkOptions::default()
            },
        );
        // A root that does not exist yet cannot be inside the source
        if let Ok(canonical) = root.path().canonicalize() {
            archiver.skip_dir(canonical);
        }

        Ok(Self::new(root, config.retention_policy()?, archiver, Sha256Digest)
            .reclaim_stale_lock(config.lock.reclaim_stale))
    }
}

impl<A: Archiver, D: Checksum> RotationController<A, D> {
    pub fn new(root: BackupRoot, policy: RetentionPolicy, archiver: A, digest: D) -> Self {
        Self {
            root,
            policy,
            archiver,
            digest,
            reclaim_stale_lock: true,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
        }
    }

    /// Cancel the run cooperatively through `cancel`
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn reclaim_stale_lock(mut self, reclaim: bool) -> Self {
        self.reclaim_stale_lock = reclaim;
        self
    }

    pub fn root(&self) -> &BackupRoot {
        &self.root
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    /// Run a rotation starting now
    pub fn run(&mut self, source: &Path, dry_run: bool) -> Result<RunReport> {
        self.run_at(source, RunClock::now(), dry_run)
    }

    /// Run a rotation as if it started at `clock`
    pub fn run_at(&mut self, source: &Path, clock: RunClock, dry_run: bool) -> Result<RunReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("rotation", run_id = %run_id);
        let _enter = span.enter();

        self.state = RunState::Idle;
        self.transitions = vec![RunState::Idle];

        if dry_run {
            info!("[dry-run] Simulating rotation of {}", source.display());
        } else {
            info!("Starting rotation of {}", source.display());
        }

        let lock = match self.acquire_lock(&run_id, dry_run) {
            Ok(lock) => lock,
            Err(e) => {
                let next = match e {
                    RotateError::LockHeld { .. } => RunState::Aborted(e.kind()),
                    _ => RunState::Failed(e.kind()),
                };
                self.enter(next);
                return Err(e);
            }
        };
        self.enter(RunState::LockAcquired);

        let mut report = RunReport::new(run_id, dry_run);
        let outcome = self.run_locked(source, clock, dry_run, &mut report);

        let released = if lock.is_held() { lock.release() } else { Ok(()) };

        match outcome.and(released) {
            Ok(()) => {
                self.enter(RunState::Done);
                report.state = self.state;
                report.transitions = self.transitions.clone();
                report.elapsed = started.elapsed();
                self.log_summary(&report);
                Ok(report)
            }
            Err(e) => {
                self.enter(RunState::Failed(e.kind()));
                Err(e)
            }
        }
    }

    fn acquire_lock(&self, run_id: &str, dry_run: bool) -> Result<RunLock> {
        let lock_path = self.root.lock_path();
        if dry_run {
            return RunLock::probe(&lock_path, self.reclaim_stale_lock);
        }

        self.root.ensure_layout()?;
        RunLock::acquire(&lock_path, &LockInfo::current(run_id), self.reclaim_stale_lock)
    }

    fn run_locked(
        &mut self,
        source: &Path,
        clock: RunClock,
        dry_run: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        let source = validate_source(source)?;
        self.sweep_partials(dry_run);
        self.checkpoint()?;

        // Entries a real run would have added, so dry-run pruning sees the
        // same listings a real run would
        let mut simulated: Vec<ArchiveEntry> = Vec::new();

        // Archiving
        self.enter(RunState::Archiving);
        let (_, timestamp) = namer::name(clock.utc);
        let daily_dir = self.root.tier_dir(Tier::Daily);
        let daily_name = namer::unique_name(Tier::Daily, &timestamp, |candidate| {
            daily_dir.join(candidate).exists()
                || daily_dir.join(namer::partial_name(candidate)).exists()
        });
        let daily_path = daily_dir.join(&daily_name);
        report.archive = Some(daily_path.clone());

        let mut pending = PendingArtifacts::default();
        if dry_run {
            let (files, bytes) = self.archiver.estimate(&source)?;
            info!(
                "[dry-run] Would archive {} file(s), {} into {}",
                files,
                format_bytes(bytes),
                daily_path.display()
            );
            simulated.extend(simulated_entry(&daily_path, Tier::Daily));
        } else {
            let partial = daily_dir.join(namer::partial_name(&daily_name));
            pending.track(partial.clone());
            let stats = self.archiver.create(&source, &partial, &self.cancel)?;
            std::fs::rename(&partial, &daily_path)?;
            pending.track(daily_path.clone());
            info!(
                "Created {} ({} files, {} -> {})",
                daily_name,
                stats.files,
                format_bytes(stats.source_bytes),
                format_bytes(stats.archive_bytes)
            );
            report.stats = Some(stats);
        }
        self.checkpoint()?;

        // Verifying
        self.enter(RunState::Verifying);
        match report.stats {
            None => info!(
                "[dry-run] Would write and verify {}",
                checksum_path(&daily_path).display()
            ),
            Some(stats) => {
                pending.track(checksum_path(&daily_path));
                self.verify_new_archive(&daily_path, stats.entries)?;
                pending.commit();
                info!("Verified {} ({} entries)", daily_name, stats.entries);
            }
        }
        drop(pending);
        self.checkpoint()?;

        // Classifying
        self.enter(RunState::Classifying);
        let date = clock.local_date;
        let tiers = calendar::copy_tiers(date, &self.policy);
        if tiers.is_empty() {
            debug!("No tier copies due on {} ({})", date, date.weekday());
        }
        for tier in tiers {
            let dir = self.root.tier_dir(tier);
            let name = namer::unique_name(tier, &timestamp, |candidate| {
                dir.join(candidate).exists()
            });
            let copy = dir.join(&name);

            if dry_run {
                info!("[dry-run] Would copy {} into {}/ as {}", daily_name, tier, name);
                simulated.extend(simulated_entry(&copy, tier));
            } else {
                let mut pending = PendingArtifacts::default();
                pending.track(copy.clone());
                crate::fs::link_or_copy(&daily_path, &copy)?;
                pending.track(checksum_path(&copy));
                self.digest.compute_and_store(&copy)?;
                pending.commit();
                info!("Copied {} into {}/ as {}", daily_name, tier, name);
            }
            report.tier_copies.push((tier, copy));
            self.checkpoint()?;
        }

        // Pruning
        self.enter(RunState::Pruning);
        for tier in Tier::ALL {
            self.checkpoint()?;
            let mut listing = scan_tier(&self.root.tier_dir(tier), tier)?;
            listing.extend(simulated.iter().filter(|e| e.tier == tier).cloned());

            let keep = self.policy.keep_for(tier);
            let plan = retention::plan(&listing, keep);
            debug!(
                "{} tier: {} archive(s), keep {}, {} to delete",
                tier,
                listing.len(),
                keep,
                plan.delete.len()
            );

            for entry in &plan.delete {
                if dry_run {
                    info!("[dry-run] Would delete {}", entry.path.display());
                } else {
                    delete_archive(entry)?;
                    info!("Deleted {} ({} tier, keep {})", entry.name, tier, keep);
                }
                report.deleted.push(entry.path.clone());
            }
        }

        Ok(())
    }

    /// Remove `.partial` archives left by a run that was killed mid-write.
    /// Only called with the lock held, so none of them is being written.
    fn sweep_partials(&self, dry_run: bool) {
        for tier in Tier::ALL {
            let dir = self.root.tier_dir(tier);
            let Ok(read_dir) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    continue;
                };
                let is_partial_archive = name
                    .strip_suffix(namer::PARTIAL_EXT)
                    .and_then(|n| n.strip_suffix('.'))
                    .and_then(namer::parse)
                    .is_some_and(|parsed| parsed.tier == tier);
                if !is_partial_archive {
                    continue;
                }

                let path = entry.path();
                if dry_run {
                    info!("[dry-run] Would remove leftover {}", path.display());
                    continue;
                }
                match crate::fs::remove_if_exists(&path) {
                    Ok(true) => info!("Removed leftover {}", path.display()),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }
    }

    /// Sidecar written and matching, and the archive reads back completely
    fn verify_new_archive(&self, archive: &Path, expected_entries: u64) -> Result<()> {
        let sidecar = self.digest.compute_and_store(archive)?;
        if !self.digest.verify(archive, &sidecar)? {
            return Err(RotateError::integrity(archive, "checksum mismatch"));
        }

        let found = self.archiver.count_entries(archive)?;
        if found != expected_entries {
            return Err(RotateError::integrity(
                archive,
                format!("expected {} entries, found {}", expected_entries, found),
            ));
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RotateError::Interrupted);
        }
        Ok(())
    }

    fn enter(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        match next {
            RunState::Failed(_) | RunState::Aborted(_) => {
                warn!("Run state {} -> {}", self.state, next)
            }
            _ => debug!("Run state {} -> {}", self.state, next),
        }
        self.state = next;
        self.transitions.push(next);
    }

    fn log_summary(&self, report: &RunReport) {
        let prefix = if report.dry_run { "[dry-run] " } else { "" };
        let archive = report
            .archive
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "{}Rotation complete in {}: {}, {} tier cop{}, {} deletion(s)",
            prefix,
            format_duration(report.elapsed),
            archive,
            report.tier_copies.len(),
            if report.tier_copies.len() == 1 { "y" } else { "ies" },
            report.deleted.len()
        );
    }
}

/// Source must be an existing, readable directory. Returns its canonical
/// path so nested-root detection compares like with like.
fn validate_source(source: &Path) -> Result<PathBuf> {
    let metadata = match std::fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(RotateError::PermissionDenied(source.to_path_buf()))
        }
        Err(_) => return Err(RotateError::SourceNotFound(source.to_path_buf())),
    };
    if !metadata.is_dir() {
        return Err(RotateError::SourceNotFound(source.to_path_buf()));
    }

    if let Err(e) = std::fs::read_dir(source) {
        return Err(match e.kind() {
            ErrorKind::PermissionDenied => RotateError::PermissionDenied(source.to_path_buf()),
            _ => e.into(),
        });
    }

    Ok(source.canonicalize()?)
}

fn simulated_entry(path: &Path, tier: Tier) -> Option<ArchiveEntry> {
    let name = path.file_name()?.to_str()?.to_string();
    let parsed = namer::parse(&name)?;
    Some(ArchiveEntry {
        path: path.to_path_buf(),
        name,
        tier,
        created_at: parsed.created_at,
        sequence: parsed.sequence,
        size_bytes: 0,
    })
}

fn delete_archive(entry: &ArchiveEntry) -> Result<()> {
    std::fs::remove_file(&entry.path)?;
    if !crate::fs::remove_if_exists(&entry.checksum_path())? {
        debug!("No checksum file next to {}", entry.name);
    }
    Ok(())
}
