//! Configuration management for backup rotation.
//!
//! Built-in defaults are layered under an optional TOML file and
//! `BACKUP_ROTATE__<SECTION>__<KEY>` environment overrides.

use crate::retention::{RetentionPolicy, Tier};
use crate::utils::errors::{Result, RotateError};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "BACKUP_ROTATE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    pub retention: RetentionConfig,
    pub archive: ArchiveConfig,
    pub lock: LockConfig,
    pub log: LogConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup root holding the tier directories, log and lock marker
    pub root: PathBuf,

    /// Exclude patterns (glob-style, matched against names and relative paths)
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_daily_keep")]
    pub daily_keep: i64,

    #[serde(default = "default_weekly_keep")]
    pub weekly_keep: i64,

    #[serde(default = "default_monthly_keep")]
    pub monthly_keep: i64,

    /// Day of week that gets a weekly copy (e.g. "sunday", "sun")
    #[serde(default = "default_weekly_day")]
    pub weekly_day: String,

    /// Day of month that gets a monthly copy
    #[serde(default = "default_monthly_day")]
    pub monthly_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// zstd compression level (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Reclaim a lock marker whose holder process is gone
    #[serde(default = "default_reclaim_stale")]
    pub reclaim_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file name, relative to the backup root
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

/// Accepted for compatibility with existing configs; nothing is delivered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub target: Option<String>,
}

// Default values
fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backups")
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        ".DS_Store".to_string(),
    ]
}

fn default_daily_keep() -> i64 {
    7
}

fn default_weekly_keep() -> i64 {
    4
}

fn default_monthly_keep() -> i64 {
    12
}

fn default_weekly_day() -> String {
    "sunday".to_string()
}

fn default_monthly_day() -> u32 {
    1
}

fn default_compression_level() -> i32 {
    3
}

fn default_reclaim_stale() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("backup.log")
}

/// `$HOME/.config/backup-rotate/config.toml`, used when no `--config` is given
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("backup-rotate")
            .join("config.toml")
    })
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup: BackupConfig {
                root: default_root(),
                exclude: default_excludes(),
            },
            retention: RetentionConfig {
                daily_keep: default_daily_keep(),
                weekly_keep: default_weekly_keep(),
                monthly_keep: default_monthly_keep(),
                weekly_day: default_weekly_day(),
                monthly_day: default_monthly_day(),
            },
            archive: ArchiveConfig {
                compression_level: default_compression_level(),
            },
            lock: LockConfig {
                reclaim_stale: default_reclaim_stale(),
            },
            log: LogConfig {
                level: default_log_level(),
                file: default_log_file(),
            },
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file, then environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(RotateError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(config::File::new(
                    &path.to_string_lossy(),
                    config::FileFormat::Toml,
                ));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(
                        config::File::new(&default_path.to_string_lossy(), config::FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("backup.exclude"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that deserialize fine but make no sense
    pub fn validate(&self) -> Result<()> {
        if self.backup.root.as_os_str().is_empty() {
            return Err(RotateError::Config("backup.root must not be empty".into()));
        }
        for tier in Tier::ALL {
            keep_count(self.raw_keep(tier), tier)?;
        }
        parse_weekday(&self.retention.weekly_day)?;
        if !(1..=28).contains(&self.retention.monthly_day) {
            return Err(RotateError::Config(format!(
                "retention.monthly_day must be within 1..=28, got {}",
                self.retention.monthly_day
            )));
        }
        if !(1..=22).contains(&self.archive.compression_level) {
            return Err(RotateError::Config(format!(
                "archive.compression_level must be within 1..=22, got {}",
                self.archive.compression_level
            )));
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy> {
        Ok(RetentionPolicy {
            daily_keep: keep_count(self.retention.daily_keep, Tier::Daily)?,
            weekly_keep: keep_count(self.retention.weekly_keep, Tier::Weekly)?,
            monthly_keep: keep_count(self.retention.monthly_keep, Tier::Monthly)?,
            weekly_day: parse_weekday(&self.retention.weekly_day)?,
            monthly_day: self.retention.monthly_day,
        })
    }

    fn raw_keep(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Daily => self.retention.daily_keep,
            Tier::Weekly => self.retention.weekly_keep,
            Tier::Monthly => self.retention.monthly_keep,
        }
    }
}

fn keep_count(value: i64, tier: Tier) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        RotateError::Config(format!(
            "retention.{}_keep must be a non-negative integer, got {}",
            tier.as_str(),
            value
        ))
    })
}

fn parse_weekday(value: &str) -> Result<Weekday> {
    value.trim().parse::<Weekday>().map_err(|_| {
        RotateError::Config(format!("retention.weekly_day is not a weekday: {:?}", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        let policy = config.retention_policy().unwrap();
        assert_eq!(policy.daily_keep, 7);
        assert_eq!(policy.weekly_day, Weekday::Sun);
        assert_eq!(policy.monthly_day, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rotate.toml");
        fs::write(
            &path,
            r#"
[backup]
root = "/srv/backups"
exclude = ["*.tmp", "cache"]

[retention]
daily_keep = 3
weekly_day = "Wed"

[notify]
target = "ops@example.com"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backup.root, PathBuf::from("/srv/backups"));
        assert_eq!(config.backup.exclude, vec!["*.tmp", "cache"]);
        assert_eq!(config.retention.daily_keep, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.retention.weekly_keep, 4);
        assert_eq!(config.retention_policy().unwrap().weekly_day, Weekday::Wed);
        assert_eq!(config.notify.target.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/rotate.toml"))).unwrap_err();
        assert!(matches!(err, RotateError::Config(_)));
    }

    #[test]
    fn test_negative_keep_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rotate.toml");
        fs::write(&path, "[retention]\ndaily_keep = -1\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, RotateError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.retention.weekly_day = "someday".to_string();
        assert!(matches!(config.validate(), Err(RotateError::Config(_))));

        let mut config = Config::default();
        config.retention.monthly_day = 31;
        assert!(matches!(config.validate(), Err(RotateError::Config(_))));

        let mut config = Config::default();
        config.archive.compression_level = 0;
        assert!(matches!(config.validate(), Err(RotateError::Config(_))));
    }

    #[test]
    fn test_negative_keep_never_reaches_policy() {
        let mut config = Config::default();
        config.retention.weekly_keep = -3;
        assert!(matches!(config.retention_policy(), Err(RotateError::Config(_))));

        config.retention.weekly_keep = 0;
        let policy = config.retention_policy().unwrap();
        assert_eq!(policy.keep_for(Tier::Weekly), 0);
        assert_eq!(policy.keep_for(Tier::Monthly), 12);
    }
}
