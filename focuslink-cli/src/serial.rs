//! Keyboard selection.
//!
//! Decides which serial port a session is opened on, and which catalog entry
//! describes the keyboard behind it:
//! - An explicit port (flag, environment or config) is used as given
//! - Otherwise attached keyboards running normal firmware are discovered
//! - Several candidates are offered through an interactive prompt
//! - Non-interactive mode never prompts

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    focuslink::{
        DetectedDevice, DeviceDescriptor, KNOWN_DEVICES, NativeTransport, PortInfo, Transport,
        format_device_list, hardware,
    },
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for keyboard selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Keyboard model to restrict discovery to.
    pub device: Option<String>,
    /// Non-interactive mode (fail if several keyboards match).
    pub non_interactive: bool,
}

/// Result of keyboard selection.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    /// Serial port path.
    pub path: String,
    /// Catalog entry for the keyboard.
    pub descriptor: DeviceDescriptor,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection problems are setup issues and map to exit code 2, which
    // scripts can tell apart from runtime failures.
    CliError::Usage(message.to_string()).into()
}

fn not_found_err(message: &str) -> anyhow::Error {
    CliError::DeviceNotFound(message.to_string()).into()
}

/// Look up a keyboard model by name.
pub fn descriptor_by_name(name: &str) -> Result<DeviceDescriptor> {
    hardware::find_by_name(KNOWN_DEVICES, name)
        .copied()
        .ok_or_else(|| {
            let known: Vec<&str> = KNOWN_DEVICES
                .iter()
                .map(|d| d.display_name)
                .collect();
            usage_err(&format!(
                "Unknown keyboard '{name}'. Known models: {}",
                known.join(", ")
            ))
        })
}

fn select_non_interactive(candidates: Vec<DetectedDevice>) -> Result<SelectedDevice> {
    // Non-interactive mode must be deterministic and never prompt.
    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Equal => {
            let device = candidates
                .into_iter()
                .next()
                .ok_or_else(|| not_found_err("No keyboards found"))?;
            to_selected(device, false)
        },
        Ordering::Greater => Err(usage_err(
            "Several keyboards found; choose one with --port or --device",
        )),
        Ordering::Less => Err(not_found_err("No keyboards found")),
    }
}

/// Select a keyboard interactively or automatically.
pub fn select_device(options: &SelectionOptions, config: &Config) -> Result<SelectedDevice> {
    let wanted = options
        .device
        .as_deref()
        .map(descriptor_by_name)
        .transpose()?;

    // If port explicitly specified or configured, use it
    if let Some(path) = options
        .port
        .as_ref()
        .or(config
            .connection
            .port
            .as_ref())
    {
        debug!("Using port {path}");
        return identify_port(path, wanted);
    }

    let candidates: Vec<DetectedDevice> = focuslink::host::discover_devices()
        .into_iter()
        .filter(|d| d.is_focus_ready() && d.is_supported())
        .filter(|d| wanted.is_none_or(|w| d.descriptor == w))
        .collect();

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive(candidates);
    }

    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_device_interactive(candidates)
        },
        Ordering::Equal => {
            let device = candidates
                .into_iter()
                .next()
                .ok_or_else(|| not_found_err("No keyboards found"))?;
            info!("Auto-selected {}", device.display_name());
            to_selected(device, false)
        },
        Ordering::Less => Err(not_found_err("No keyboards found")),
    }
}

fn to_selected(device: DetectedDevice, prompted: bool) -> Result<SelectedDevice> {
    let path = device
        .path
        .ok_or_else(|| not_found_err("Keyboard has no serial port yet"))?;
    Ok(SelectedDevice {
        path,
        descriptor: device.descriptor,
        prompted,
    })
}

/// Work out which keyboard sits behind an explicitly named port.
fn identify_port(path: &str, wanted: Option<DeviceDescriptor>) -> Result<SelectedDevice> {
    if let Some(descriptor) = wanted {
        return Ok(SelectedDevice {
            path: path.to_string(),
            descriptor,
            prompted: false,
        });
    }

    let ports = NativeTransport
        .list_ports()
        .unwrap_or_else(|e| {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        });

    match identify_in(&ports, path) {
        Some((descriptor, false)) => Ok(SelectedDevice {
            path: path.to_string(),
            descriptor,
            prompted: false,
        }),
        Some((descriptor, true)) => Err(usage_err(&format!(
            "{path} is a {} in bootloader mode",
            descriptor.display_name
        ))),
        None => Err(not_found_err(&format!(
            "No known keyboard on {path}; name the model with --device"
        ))),
    }
}

/// Catalog entry for `path`, and whether it matched a bootloader identity.
fn identify_in(ports: &[PortInfo], path: &str) -> Option<(DeviceDescriptor, bool)> {
    ports
        .iter()
        .find(|p| p.name == path)
        .or_else(|| {
            // Case-insensitive match (Windows)
            ports
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(path))
        })
        .and_then(PortInfo::usb_ids)
        .and_then(|(vid, pid)| hardware::find_by_usb_ids(KNOWN_DEVICES, vid, pid))
}

pub(crate) fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive selection requires a terminal; use --port or --non-interactive",
        ))
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Interactive keyboard selection.
fn select_device_interactive(devices: Vec<DetectedDevice>) -> Result<SelectedDevice> {
    eprintln!(
        "{} Found {} keyboards",
        style("ℹ").blue(),
        devices.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_device_list(&devices)
        .into_iter()
        .map(|label| console::truncate_str(&label, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a keyboard")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let device = devices
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid selection index: {index}"))?;
            to_selected(device, true)
        },
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember the selected port.
pub fn ask_remember_port(selected: &SelectedDevice, config: &mut Config) -> Result<()> {
    if config
        .connection
        .port
        .as_deref()
        == Some(selected.path.as_str())
    {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} for future sessions?", selected.path))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&selected.path) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
