//! Commands that talk to a connected keyboard.

use anyhow::{Context, Result};
use console::style;
use log::{debug, warn};

use crate::commands::print_list;
use crate::config::Config;
use crate::{Cli, open_session};

/// Send command implementation.
///
/// Prints the reply to stdout. An acknowledgement without data prints nothing.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &mut Config,
    command: &str,
    args: &[String],
) -> Result<()> {
    let focus = open_session(cli, config, !cli.quiet)?;
    let args: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .collect();

    let supported = focus
        .supported_commands()
        .context("Failed to query supported commands")?;

    let reply = focus
        .command(command, &args)
        .with_context(|| format!("'{command}' failed"))?;

    match reply {
        Some(text) => println!("{text}"),
        None if !supported.is_empty() && !supported.iter().any(|c| c == command) => {
            warn!("The firmware does not support '{command}'; nothing was sent");
        },
        None => debug!("'{command}' acknowledged without data"),
    }

    focus.close();
    Ok(())
}

/// Supported commands listing.
pub(crate) fn cmd_supported_commands(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let focus = open_session(cli, config, !cli.quiet && !json)?;
    let commands = focus
        .supported_commands()
        .context("Failed to query supported commands")?;
    print_list(&commands, json);
    Ok(())
}

/// Plugin listing.
pub(crate) fn cmd_plugins(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let focus = open_session(cli, config, !cli.quiet && !json)?;
    let plugins = focus
        .plugins()
        .context("Failed to query plugins")?;
    print_list(&plugins, json);
    Ok(())
}

/// Capability summary.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let focus = open_session(cli, config, !cli.quiet && !json)?;

    let commands = focus
        .supported_commands()
        .context("Failed to query supported commands")?;
    let plugins = focus
        .plugins()
        .context("Failed to query plugins")?;
    let keymaps = focus.has_customizable_keymaps()?;
    let led_maps = focus.has_customizable_led_maps()?;
    let name = focus
        .device()
        .map(|d| d.display_name)
        .unwrap_or_default();
    let path = focus
        .path()
        .unwrap_or_default();

    if json {
        let info = serde_json::json!({
            "name": name,
            "path": path,
            "commands": commands.len(),
            "plugins": plugins,
            "customizable_keymaps": keymaps,
            "customizable_led_maps": led_maps,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(());
    }

    let yes_no = |flag: bool| {
        if flag {
            style("yes").green()
        } else {
            style("no").dim()
        }
    };

    eprintln!(
        "{}",
        style(name)
            .bold()
            .underlined()
    );
    eprintln!("  Port:                {}", style(path).cyan());
    eprintln!("  Commands:            {}", commands.len());
    eprintln!("  Plugins:             {}", plugins.len());
    eprintln!("  Customizable keymap: {}", yes_no(keymaps));
    eprintln!("  Customizable LEDs:   {}", yes_no(led_maps));
    for plugin in &plugins {
        eprintln!("    {} {}", style("•").dim(), plugin);
    }

    Ok(())
}
