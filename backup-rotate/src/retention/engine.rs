//! Selection of the archives a tier keeps and the ones it deletes.
//!
//! Ordering is derived from the timestamp parsed out of each file name,
//! never from directory listing order or mtime. Same-second archives are
//! ordered by their collision sequence, then by file name, so the order is
//! total and identical on every filesystem.
//!
//! Nothing here touches the filesystem: callers apply (or, in dry-run,
//! merely log) the deletion set.

use crate::inventory::ArchiveEntry;
use std::cmp::Ordering;

/// Outcome of applying a keep count to one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Survivors, newest first
    pub keep: Vec<ArchiveEntry>,
    /// Archives to remove, newest first
    pub delete: Vec<ArchiveEntry>,
}

fn newest_first(a: &ArchiveEntry, b: &ArchiveEntry) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.sequence.cmp(&a.sequence))
        .then_with(|| b.name.cmp(&a.name))
}

pub fn sort_newest_first(archives: &mut [ArchiveEntry]) {
    archives.sort_by(newest_first);
}

/// Split `archives` into the `keep` newest and everything older.
pub fn plan(archives: &[ArchiveEntry], keep: u32) -> RetentionPlan {
    let mut ordered = archives.to_vec();
    sort_newest_first(&mut ordered);

    let keep = usize::try_from(keep).unwrap_or(usize::MAX).min(ordered.len());
    let delete = ordered.split_off(keep);

    RetentionPlan {
        keep: ordered,
        delete,
    }
}

/// The archives that must be deleted so that at most `keep` remain.
pub fn select_for_deletion(archives: &[ArchiveEntry], keep: u32) -> Vec<ArchiveEntry> {
    plan(archives, keep).delete
}
