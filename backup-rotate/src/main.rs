//! backup-rotate - Main entry point
//!
//! Local backup rotation with daily/weekly/monthly retention tiers.

use anyhow::{Context, Result};
use backup_rotate::config::Config;
use backup_rotate::inventory::Inventory;
use backup_rotate::restore::{RestoreController, RestoreOptions};
use backup_rotate::root::BackupRoot;
use backup_rotate::rotation::{RotationController, RunLock};
use backup_rotate::shutdown::{ShutdownCoordinator, GRACE_PERIOD};
use backup_rotate::{utils, RotateError};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to back up
    #[arg(value_name = "SOURCE_DIR", conflicts_with_all = ["list", "restore"])]
    source: Option<PathBuf>,

    /// Log every action without changing anything on disk
    #[arg(long)]
    dry_run: bool,

    /// List archives per tier
    #[arg(long, conflicts_with = "restore")]
    list: bool,

    /// Extract an archive
    #[arg(long, value_name = "ARCHIVE_FILE")]
    restore: Option<PathBuf>,

    /// Restore target directory (default: <root>/restore)
    #[arg(long, value_name = "TARGET_DIR", requires = "restore")]
    to: Option<PathBuf>,

    /// Check the archive's checksum file before restoring
    #[arg(long, requires = "restore")]
    verify: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Action {
    Backup(PathBuf),
    List,
    Restore {
        archive: PathBuf,
        target: Option<PathBuf>,
    },
}

impl Args {
    fn action(&self) -> Option<Action> {
        if let Some(archive) = &self.restore {
            return Some(Action::Restore {
                archive: archive.clone(),
                target: self.to.clone(),
            });
        }
        if self.list {
            return Some(Action::List);
        }
        self.source.clone().map(Action::Backup)
    }
}

/// Parse the command line; a line that names no action is a usage error
fn parse_cli<I, T>(argv: I) -> std::result::Result<(Args, Action), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv)?;
    match args.action() {
        Some(action) => Ok((args, action)),
        None => Err(<Args as CommandFactory>::command().error(
            ErrorKind::MissingRequiredArgument,
            "nothing to do: pass SOURCE_DIR, --list or --restore <ARCHIVE_FILE>",
        )),
    }
}

/// Exit status for a command line clap rejected or answered itself
fn usage_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (args, action) = match parse_cli(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(e.kind()));
        }
    };

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let level = args.log_level.as_deref().unwrap_or("info");
            if utils::logger::init(level, None).is_ok() {
                tracing::error!("{}", e);
            } else {
                eprintln!("backup-rotate: {}", e);
            }
            return ExitCode::FAILURE;
        }
    };

    // Dry-runs and listings leave the backup root untouched, log file included
    let root = BackupRoot::new(&config.backup.root, &config.log.file);
    let mutating = !args.dry_run && !matches!(action, Action::List);
    let log_file = mutating && std::fs::create_dir_all(root.path()).is_ok();
    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(level, log_file.then(|| root.log_path())) {
        eprintln!("backup-rotate: failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    if config.notify.target.is_some() {
        tracing::debug!("notify.target is set but notifications are not delivered");
    }

    let outcome = match action {
        Action::Backup(source) => run_backup(&config, source, args.dry_run).await,
        Action::List => list(&config, &root),
        Action::Restore { archive, target } => {
            let target = target.unwrap_or_else(|| root.restore_dir());
            let options = RestoreOptions {
                dry_run: args.dry_run,
                verify: args.verify,
            };
            run_restore(&config, archive, target, options).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_backup(config: &Config, source: PathBuf, dry_run: bool) -> Result<()> {
    tracing::info!(
        "Starting backup-rotate v{} (root: {})",
        env!("CARGO_PKG_VERSION"),
        config.backup.root.display()
    );

    let shutdown = ShutdownCoordinator::new();
    let mut controller = RotationController::from_config(config)?.with_cancel(shutdown.token());
    let lock_path = controller.root().lock_path();

    let mut worker = tokio::task::spawn_blocking(move || controller.run(&source, dry_run));

    tokio::select! {
        joined = &mut worker => {
            joined.context("rotation worker panicked")??;
            return Ok(());
        }
        _ = shutdown.wait_for_signal() => {}
    }

    match tokio::time::timeout(GRACE_PERIOD, worker).await {
        Ok(joined) => {
            joined.context("rotation worker panicked")??;
            Ok(())
        }
        Err(_) => {
            tracing::warn!(
                "Run did not stop within {}s, removing lock marker",
                GRACE_PERIOD.as_secs()
            );
            if !dry_run {
                RunLock::force_release(&lock_path);
            }
            tracing::error!("{}", RotateError::Interrupted);
            // The blocking worker would keep the runtime alive on return
            std::process::exit(1);
        }
    }
}

fn list(config: &Config, root: &BackupRoot) -> Result<()> {
    let policy = config.retention_policy()?;
    let inventory = Inventory::scan(root)?;
    print!("{}", inventory.render(root.path(), &policy));
    Ok(())
}

async fn run_restore(
    config: &Config,
    archive: PathBuf,
    target: PathBuf,
    options: RestoreOptions,
) -> Result<()> {
    let controller = RestoreController::from_config(config);
    tokio::task::spawn_blocking(move || controller.restore(&archive, &target, options))
        .await
        .context("restore worker panicked")??;
    Ok(())
}
