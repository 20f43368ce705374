//! Canonical archive file names.
//!
//! `backup[-<tier>]-YYYY-MM-DD_HH-MM-SS[_<n>].tar.zst`. The timestamp is
//! UTC and zero-padded, so it sorts lexically in creation order. `_<n>`
//! only appears when a run lands in the same second as an existing archive.

use crate::retention::Tier;
use chrono::NaiveDateTime;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const ARCHIVE_EXT: &str = "tar.zst";
pub const CHECKSUM_EXT: &str = "sha256";
pub const PARTIAL_EXT: &str = "partial";

const TIMESTAMP_LEN: usize = "YYYY-MM-DD_HH-MM-SS".len();

/// Fields recovered from an archive file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub tier: Tier,
    pub created_at: NaiveDateTime,
    pub sequence: u32,
}

/// Daily archive name and its timestamp string for the UTC time `now`
pub fn name(now: NaiveDateTime) -> (String, String) {
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    (tier_name(Tier::Daily, &timestamp, 0), timestamp)
}

pub fn tier_name(tier: Tier, timestamp: &str, sequence: u32) -> String {
    if sequence == 0 {
        format!("{}{}.{}", tier.name_prefix(), timestamp, ARCHIVE_EXT)
    } else {
        format!("{}{}_{}.{}", tier.name_prefix(), timestamp, sequence, ARCHIVE_EXT)
    }
}

/// First name for `tier` at `timestamp` that `exists` reports as free
pub fn unique_name<F>(tier: Tier, timestamp: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut sequence = 0;
    loop {
        let candidate = tier_name(tier, timestamp, sequence);
        if !exists(&candidate) {
            return candidate;
        }
        sequence += 1;
    }
}

pub fn checksum_name(archive_name: &str) -> String {
    format!("{}.{}", archive_name, CHECKSUM_EXT)
}

pub fn partial_name(archive_name: &str) -> String {
    format!("{}.{}", archive_name, PARTIAL_EXT)
}

/// Parse an archive file name. Anything that does not match the canonical
/// pattern returns `None` and is treated as a foreign file.
pub fn parse(file_name: &str) -> Option<ParsedName> {
    let stem = file_name.strip_suffix(ARCHIVE_EXT)?.strip_suffix('.')?;

    // Longest prefixes first: "backup-" is a prefix of the other two
    let (tier, rest) = [Tier::Weekly, Tier::Monthly, Tier::Daily]
        .into_iter()
        .find_map(|tier| stem.strip_prefix(tier.name_prefix()).map(|rest| (tier, rest)))?;

    let timestamp = rest.get(..TIMESTAMP_LEN)?;
    let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

    let sequence = match &rest[TIMESTAMP_LEN..] {
        "" => 0,
        suffix => {
            let digits = suffix.strip_prefix('_')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()?
        }
    };

    Some(ParsedName {
        tier,
        created_at,
        sequence,
    })
}
