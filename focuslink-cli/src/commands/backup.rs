//! Backup and restore command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use focuslink::{BACKUP_COMMANDS, RESTORE_COMMANDS, Snapshot};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::commands::ensure_not_interrupted;
use crate::config::Config;
use crate::serial::{ensure_interactive_terminal, map_prompt_error};
use crate::{Cli, CliError, open_session, use_fancy_output};

fn progress_bar(quiet: bool, len: usize) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn done_icon() -> &'static str {
    if use_fancy_output() { "✓" } else { "OK" }
}

/// File name used when backing up into a directory.
fn default_backup_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("focuslink-backup-{secs}.json")
}

/// Where the snapshot goes: explicit file, configured directory, or stdout (`None`).
fn backup_target(output: Option<&Path>, config: &Config) -> Option<PathBuf> {
    output
        .map(Path::to_path_buf)
        .or_else(|| {
            config
                .backup
                .directory
                .as_ref()
                .map(|dir| dir.join(default_backup_name()))
        })
}

/// Backup command implementation.
pub(crate) fn cmd_backup(cli: &Cli, config: &mut Config, output: Option<&Path>) -> Result<()> {
    ensure_not_interrupted()?;
    let focus = open_session(cli, config, !cli.quiet)?;

    let pb = progress_bar(cli.quiet, BACKUP_COMMANDS.len());
    let result = focus.backup(&mut |command, index, _total| {
        pb.set_position(index as u64);
        pb.set_message(command.to_string());
    });
    match &result {
        Ok(_) => pb.finish_with_message("done"),
        Err(_) => pb.abandon(),
    }
    let snapshot = result.context("Backup failed")?;
    focus.close();

    let json = serde_json::to_string_pretty(&snapshot)?;
    match backup_target(output, config) {
        Some(path) => {
            if let Some(parent) = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::write(&path, format!("{json}\n"))
                .with_context(|| format!("Failed to write backup: {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Saved {} settings to {}",
                    style(done_icon())
                        .green()
                        .bold(),
                    snapshot.len(),
                    style(path.display()).yellow()
                );
            }
        },
        None => println!("{json}"),
    }

    Ok(())
}

/// Read a backup file.
fn load_snapshot(file: &Path) -> Result<Snapshot> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read backup: {}", file.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a focuslink backup", file.display()))
}

/// Number of settings a restore of `snapshot` would write.
fn restorable_count(snapshot: &Snapshot) -> usize {
    RESTORE_COMMANDS
        .iter()
        .filter(|command| {
            snapshot
                .get(command)
                .is_some_and(|value| !value.is_empty())
        })
        .count()
}

fn confirm_restore(cli: &Cli, count: usize) -> Result<()> {
    if cli.non_interactive {
        return Err(CliError::Usage(
            "restore overwrites the keyboard configuration; pass --yes to confirm".to_string(),
        )
        .into());
    }
    ensure_interactive_terminal()?;

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Overwrite {count} settings on the keyboard?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Restore cancelled".to_string()).into())
    }
}

/// Restore command implementation.
pub(crate) fn cmd_restore(cli: &Cli, config: &mut Config, file: &Path, yes: bool) -> Result<()> {
    let snapshot = load_snapshot(file)?;
    let count = restorable_count(&snapshot);
    if count == 0 {
        return Err(CliError::Usage(format!(
            "{} contains no restorable settings",
            file.display()
        ))
        .into());
    }

    if !yes {
        confirm_restore(cli, count)?;
    }

    ensure_not_interrupted()?;
    let focus = open_session(cli, config, !cli.quiet)?;

    let pb = progress_bar(cli.quiet, RESTORE_COMMANDS.len());
    let result = focus.restore(&snapshot, &mut |command, index, _total| {
        pb.set_position(index as u64);
        pb.set_message(command.to_string());
    });
    match &result {
        Ok(_) => pb.finish_with_message("done"),
        Err(_) => pb.abandon(),
    }
    let written = result.context("Restore failed")?;
    focus.close();

    if !cli.quiet {
        eprintln!(
            "{} Restored {written} settings from {}",
            style(done_icon())
                .green()
                .bold(),
            style(file.display()).yellow()
        );
    }

    Ok(())
}
