//! Bootloader checks and post-update reconnection.

use anyhow::{Context, Result};
use console::style;
use focuslink::{DetectedDevice, DeviceDescriptor, Focus, UpdateState, UpdateWatcher};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::thread;
use std::time::{Duration, Instant};

use crate::commands::ensure_not_interrupted;
use crate::config::Config;
use crate::serial::descriptor_by_name;
use crate::{Cli, CliError, focus_config};

/// Delay between update checks.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The single catalog entry among `devices`, ignoring duplicates.
fn single_descriptor(devices: &[DetectedDevice]) -> Result<DeviceDescriptor> {
    let mut descriptors: Vec<DeviceDescriptor> = Vec::new();
    for device in devices {
        if !descriptors.contains(&device.descriptor) {
            descriptors.push(device.descriptor);
        }
    }

    match descriptors.as_slice() {
        [descriptor] => Ok(*descriptor),
        [] => Err(CliError::DeviceNotFound(
            "No keyboards found; name the model with --device".to_string(),
        )
        .into()),
        _ => Err(CliError::Usage(
            "Several keyboard models attached; choose one with --device".to_string(),
        )
        .into()),
    }
}

/// Keyboard model these commands operate on.
///
/// `--device` wins; otherwise the one attached model is used.
fn target_descriptor(cli: &Cli) -> Result<DeviceDescriptor> {
    if let Some(name) = &cli.device {
        return descriptor_by_name(name);
    }
    single_descriptor(&focuslink::host::discover_devices())
}

fn describe(state: &UpdateState, descriptor: &DeviceDescriptor) -> String {
    match state {
        UpdateState::WaitingForBootloader => format!(
            "Waiting for {} to enter its bootloader",
            descriptor.display_name
        ),
        UpdateState::InBootloader(found) => format!(
            "In bootloader ({}); flash the firmware now",
            found.protocol
        ),
        UpdateState::WaitingForFirmware => "Waiting for the firmware to come back".to_string(),
        UpdateState::Reconnected => "Reconnected".to_string(),
    }
}

/// Check bootloader command implementation.
pub(crate) fn cmd_check_bootloader(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let descriptor = target_descriptor(cli)?;
    let focus = Focus::with_config(focus_config(cli, config)?);

    let Some(found) = focus.check_bootloader(&descriptor) else {
        return Err(CliError::DeviceNotFound(format!(
            "{} is not in bootloader mode",
            descriptor.display_name
        ))
        .into());
    };

    if json {
        let value = serde_json::json!({
            "name": found.descriptor.display_name,
            "protocol": found.protocol.name(),
            "vid": found.usb.vendor_id,
            "pid": found.usb.product_id,
            "path": found.path,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    } else if !cli.quiet {
        let location = found
            .path
            .as_deref()
            .map(|p| format!(" on {p}"))
            .unwrap_or_default();
        eprintln!(
            "{} {} is in bootloader mode ({}){}",
            style("→")
                .green()
                .bold(),
            style(descriptor.display_name).yellow(),
            found.protocol,
            location
        );
    }

    Ok(())
}

/// Follow a keyboard from bootloader entry back to a running session.
pub(crate) fn cmd_wait_update(cli: &Cli, config: &Config, wait: Duration) -> Result<()> {
    let descriptor = target_descriptor(cli)?;
    let focus = Focus::with_config(focus_config(cli, config)?);
    let mut watcher = UpdateWatcher::new(descriptor);

    let spinner = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let deadline = Instant::now() + wait;
    let mut last: Option<UpdateState> = None;

    loop {
        if let Err(e) = ensure_not_interrupted() {
            spinner.abandon();
            return Err(e);
        }

        // The port may exist before it is usable; keep trying until the deadline.
        let state = match watcher.poll(&focus) {
            Ok(state) => state.clone(),
            Err(e) => {
                debug!("Update check failed, retrying: {e}");
                watcher
                    .state()
                    .clone()
            },
        };

        if last.as_ref() != Some(&state) {
            spinner.set_message(describe(&state, &descriptor));
            if matches!(state, UpdateState::InBootloader(_)) {
                spinner.println(format!(
                    "{} {}",
                    style("→").green(),
                    describe(&state, &descriptor)
                ));
            }
            last = Some(state);
        }

        if watcher.is_done() {
            break;
        }
        if Instant::now() >= deadline {
            spinner.abandon();
            return Err(CliError::DeviceNotFound(format!(
                "Timed out: {}",
                describe(watcher.state(), &descriptor).to_lowercase()
            ))
            .into());
        }
        thread::sleep(POLL_INTERVAL);
    }

    spinner.finish_and_clear();
    let commands = focus
        .supported_commands()
        .context("Failed to query supported commands")?;
    if !cli.quiet {
        eprintln!(
            "{} Reconnected to {} on {} ({} commands)",
            style("✓")
                .green()
                .bold(),
            style(descriptor.display_name).yellow(),
            style(focus.path().unwrap_or_default()).cyan(),
            commands.len()
        );
    }
    focus.close();
    Ok(())
}

/// Reconnect command implementation.
pub(crate) fn cmd_reconnect(cli: &Cli, config: &Config) -> Result<()> {
    let descriptor = target_descriptor(cli)?;
    let focus = Focus::with_config(focus_config(cli, config)?);

    let reconnected = focus
        .reconnect(&descriptor)
        .with_context(|| format!("Failed to reconnect to {}", descriptor.display_name))?;
    if !reconnected {
        return Err(CliError::DeviceNotFound(format!(
            "{} is not running its normal firmware",
            descriptor.display_name
        ))
        .into());
    }

    let plugins = focus
        .plugins()
        .context("Failed to query plugins")?;
    if !cli.quiet {
        eprintln!(
            "{} Connected to {} on {} ({} plugins)",
            style("✓")
                .green()
                .bold(),
            style(descriptor.display_name).yellow(),
            style(focus.path().unwrap_or_default()).cyan(),
            plugins.len()
        );
    }
    focus.close();
    Ok(())
}
