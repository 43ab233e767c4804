//! focuslink CLI - Command-line tool for Focus-protocol keyboards.
//!
//! ## Features
//!
//! - List attached keyboards and how they are connected
//! - Send raw Focus commands
//! - Back up and restore the keyboard configuration as JSON
//! - Follow a keyboard through a firmware update
//! - Interactive keyboard selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use focuslink::{Focus, FocusConfig};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SelectedDevice, SelectionOptions, ask_remember_port, select_device};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Failures with a dedicated exit code.
///
/// Anything else that reaches `main` exits with 1.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an ambiguous setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file or value (exit 3).
    #[error("{0}")]
    Config(String),
    /// No matching keyboard attached (exit 4).
    #[error("{0}")]
    DeviceNotFound(String),
    /// Declined prompt or Ctrl-C (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<focuslink::Error>() {
            match lib_err {
                focuslink::Error::InvalidArgument(_) => return 2,
                focuslink::Error::DeviceNotFound => return 4,
                focuslink::Error::Interrupted => return 130,
                _ => {},
            }
        }
    }
    1
}

/// focuslink - Talk to Focus-protocol keyboards.
///
/// Environment variables:
///   FOCUSLINK_PORT              - Default serial port
///   FOCUSLINK_BAUD              - Default baud rate (default: 9600)
///   FOCUSLINK_TIMEOUT           - Response idle timeout in milliseconds
///   FOCUSLINK_DEVICE            - Keyboard model to look for
///   FOCUSLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "focuslink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(
    after_help = "Examples:\n  focuslink list-devices\n  focuslink send version\n  focuslink backup -o keyboard.json\n  focuslink restore keyboard.json"
)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FOCUSLINK_PORT")]
    port: Option<String>,

    /// Baud rate (default: 9600).
    #[arg(short, long, global = true, env = "FOCUSLINK_BAUD")]
    baud: Option<u32>,

    /// Response idle timeout in milliseconds (default: 30000).
    #[arg(short, long, global = true, value_name = "MS", env = "FOCUSLINK_TIMEOUT")]
    timeout: Option<u64>,

    /// Keyboard model, e.g. "Model100" or "Keyboardio Atreus".
    #[arg(short, long, global = true, env = "FOCUSLINK_DEVICE")]
    device: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FOCUSLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List attached keyboards.
    ListDevices {
        /// Output the device list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Send a raw Focus command and print the reply.
    Send {
        /// Command name, e.g. "version" or "keymap.custom".
        command: String,

        /// Arguments passed after the command name.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List the commands the firmware supports.
    #[command(name = "commands")]
    SupportedCommands {
        /// Output as a JSON array to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List the plugins built into the firmware.
    Plugins {
        /// Output as a JSON array to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show what the connected keyboard can do.
    Info {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Save the keyboard configuration to a JSON file.
    Backup {
        /// Output file (defaults to the configured backup directory, then stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a saved configuration back to the keyboard.
    Restore {
        /// Backup file produced by `focuslink backup`.
        file: PathBuf,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Check whether a keyboard is in bootloader mode.
    CheckBootloader {
        /// Output the match as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Follow a keyboard through its bootloader and back to normal firmware.
    WaitUpdate {
        /// Give up after this many seconds.
        #[arg(long, default_value = "300", value_name = "SECS")]
        wait: u64,
    },

    /// Reopen a session on a keyboard after a firmware update.
    Reconnect,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "focuslink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // First Ctrl-C asks long operations to stop between commands, a second
    // one exits immediately.
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    }) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    focuslink::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListDevices { json } => {
            commands::devices::cmd_list_devices(*json);
            Ok(())
        },
        Commands::Send { command, args } => {
            commands::session::cmd_send(cli, &mut config, command, args)
        },
        Commands::SupportedCommands { json } => {
            commands::session::cmd_supported_commands(cli, &mut config, *json)
        },
        Commands::Plugins { json } => commands::session::cmd_plugins(cli, &mut config, *json),
        Commands::Info { json } => commands::session::cmd_info(cli, &mut config, *json),
        Commands::Backup { output } => {
            commands::backup::cmd_backup(cli, &mut config, output.as_deref())
        },
        Commands::Restore { file, yes } => {
            commands::backup::cmd_restore(cli, &mut config, file, *yes)
        },
        Commands::CheckBootloader { json } => {
            commands::bootloader::cmd_check_bootloader(cli, &config, *json)
        },
        Commands::WaitUpdate { wait } => {
            commands::bootloader::cmd_wait_update(cli, &config, Duration::from_secs(*wait))
        },
        Commands::Reconnect => commands::bootloader::cmd_reconnect(cli, &config),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: focuslink completions bash \
                         (or use --install to auto-install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Session settings from flags, environment and configuration file.
pub(crate) fn focus_config(cli: &Cli, config: &Config) -> Result<FocusConfig> {
    let connection = &config.connection;
    let mut focus_config = FocusConfig::default();

    if let Some(baud) = cli.baud.or(connection.baud) {
        focus_config = focus_config.with_baud_rate(baud);
    }

    if let Some(ms) = cli.timeout.or(connection.timeout_ms) {
        if ms == 0 {
            return Err(CliError::Usage("timeout must be greater than zero".to_string()).into());
        }
        focus_config = focus_config.with_idle_timeout(Duration::from_millis(ms));
    }

    if let Some(ms) = connection.pacing_ms {
        focus_config = focus_config.with_pacing(Duration::from_millis(ms));
    }

    if let Some(strategy) = connection.write_strategy {
        focus_config = focus_config.with_write_strategy(strategy);
    }

    Ok(focus_config)
}

/// Pick the keyboard to talk to, prompting if needed.
pub(crate) fn get_device(cli: &Cli, config: &mut Config) -> Result<SelectedDevice> {
    let options = SelectionOptions {
        port: cli.port.clone(),
        device: cli.device.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_device(&options, config)?;

    // Offer to remember a port the user had to pick by hand
    if selected.prompted && !cli.non_interactive {
        ask_remember_port(&selected, config)?;
    }

    Ok(selected)
}

/// Select a keyboard and open a Focus session on it.
///
/// `announce` prints the chosen device to stderr.
pub(crate) fn open_session(cli: &Cli, config: &mut Config, announce: bool) -> Result<Focus> {
    let focus = Focus::with_config(focus_config(cli, config)?);
    let selected = get_device(cli, config)?;

    if announce {
        let icon = if use_fancy_output() { "🔌" } else { "*" };
        eprintln!(
            "{} Using {} on {}",
            style(icon).cyan(),
            style(selected.descriptor.display_name).yellow(),
            style(&selected.path).cyan()
        );
    }

    focus
        .open(&selected.path, &selected.descriptor)
        .with_context(|| format!("Failed to open {}", selected.path))?;
    Ok(focus)
}
