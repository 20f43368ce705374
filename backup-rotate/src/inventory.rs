//! Archive inventory of a backup root.

use crate::archive::namer;
use crate::retention::{sort_newest_first, RetentionPolicy, Tier};
use crate::root::BackupRoot;
use crate::utils::errors::Result;
use crate::utils::format::format_bytes;
use chrono::NaiveDateTime;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// One archive file found in a tier directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub path: PathBuf,
    pub tier: Tier,
    /// Parsed from the file name, never from filesystem metadata
    pub created_at: NaiveDateTime,
    pub sequence: u32,
    pub size_bytes: u64,
}

impl ArchiveEntry {
    pub fn checksum_path(&self) -> PathBuf {
        crate::digest::checksum_path(&self.path)
    }
}

/// Archives of one tier, newest first. A missing directory is an empty tier.
///
/// Only regular files whose names parse as archives of this tier are
/// returned; sidecars, partial files and anything foreign are left alone.
pub fn scan_tier(dir: &Path, tier: Tier) -> Result<Vec<ArchiveEntry>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();

        let Some(parsed) = namer::parse(&name) else {
            continue;
        };
        if parsed.tier != tier {
            tracing::debug!("Ignoring {} in {} directory", name, tier);
            continue;
        }
        let metadata = dir_entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        entries.push(ArchiveEntry {
            path: dir_entry.path(),
            name,
            tier,
            created_at: parsed.created_at,
            sequence: parsed.sequence,
            size_bytes: metadata.len(),
        });
    }

    sort_newest_first(&mut entries);
    Ok(entries)
}

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub tiers: Vec<(Tier, Vec<ArchiveEntry>)>,
}

impl Inventory {
    pub fn scan(root: &BackupRoot) -> Result<Self> {
        let tiers = Tier::ALL
            .into_iter()
            .map(|tier| Ok((tier, scan_tier(&root.tier_dir(tier), tier)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tiers })
    }

    pub fn total_count(&self) -> usize {
        self.tiers.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tiers
            .iter()
            .flat_map(|(_, entries)| entries.iter())
            .map(|e| e.size_bytes)
            .sum()
    }

    /// Tree-style listing for `--list`
    pub fn render(&self, root: &Path, policy: &RetentionPolicy) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", root.display());

        let tier_count = self.tiers.len();
        for (i, (tier, entries)) in self.tiers.iter().enumerate() {
            let last_tier = i + 1 == tier_count;
            let (branch, indent) = if last_tier { ("└── ", "    ") } else { ("├── ", "│   ") };
            let _ = writeln!(
                out,
                "{}{}/ ({} of {} kept)",
                branch,
                tier,
                entries.len(),
                policy.keep_for(*tier)
            );

            for (j, entry) in entries.iter().enumerate() {
                let leaf = if j + 1 == entries.len() { "└── " } else { "├── " };
                let _ = writeln!(
                    out,
                    "{}{}{}  {}",
                    indent,
                    leaf,
                    entry.name,
                    format_bytes(entry.size_bytes)
                );
            }
        }

        let _ = writeln!(
            out,
            "\n{} archive(s), {}",
            self.total_count(),
            format_bytes(self.total_bytes())
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_tier_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        let daily = dir.path().join("daily");
        fs::create_dir(&daily).unwrap();

        for name in [
            "backup-2024-03-02_02-00-00.tar.zst",
            "backup-2024-03-03_02-00-00.tar.zst",
            "backup-2024-03-01_02-00-00.tar.zst",
            "backup-2024-03-03_02-00-00.tar.zst.sha256",
            "backup-2024-03-04_02-00-00.tar.zst.partial",
            "backup-weekly-2024-03-03_02-00-00.tar.zst",
            "README",
        ] {
            fs::write(daily.join(name), b"x").unwrap();
        }
        fs::create_dir(daily.join("backup-2024-03-05_02-00-00.tar.zst")).unwrap();

        let entries = scan_tier(&daily, Tier::Daily).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "backup-2024-03-03_02-00-00.tar.zst",
                "backup-2024-03-02_02-00-00.tar.zst",
                "backup-2024-03-01_02-00-00.tar.zst",
            ]
        );
        assert_eq!(entries[0].size_bytes, 1);
        assert_eq!(
            entries[0].checksum_path(),
            daily.join("backup-2024-03-03_02-00-00.tar.zst.sha256")
        );
    }

    #[test]
    fn test_missing_root_is_empty_inventory() {
        let dir = TempDir::new().unwrap();
        let root = BackupRoot::new(dir.path().join("absent"), "backup.log");
        let inventory = Inventory::scan(&root).unwrap();
        assert_eq!(inventory.total_count(), 0);
        assert!(inventory.tiers.iter().all(|(_, entries)| entries.is_empty()));

        let listing = inventory.render(root.path(), &RetentionPolicy::default());
        assert!(listing.contains("daily/ (0 of 7 kept)"));
        assert!(listing.contains("0 archive(s), 0 B"));
    }

    #[test]
    fn test_render_lists_every_tier() {
        let dir = TempDir::new().unwrap();
        let root = BackupRoot::new(dir.path(), "backup.log");
        root.ensure_layout().unwrap();
        fs::write(
            root.tier_dir(Tier::Weekly).join("backup-weekly-2024-03-03_02-00-00.tar.zst"),
            vec![0u8; 2048],
        )
        .unwrap();

        let inventory = Inventory::scan(&root).unwrap();
        let listing = inventory.render(root.path(), &RetentionPolicy::default());
        assert!(listing.contains("├── weekly/ (1 of 4 kept)"));
        assert!(listing.contains("backup-weekly-2024-03-03_02-00-00.tar.zst  2.0 KB"));
        assert!(listing.contains("└── monthly/ (0 of 12 kept)"));
        assert!(listing.contains("1 archive(s), 2.0 KB"));
    }
}
