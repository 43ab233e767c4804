//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

use anyhow::Result;

use crate::{CliError, was_interrupted};

pub(crate) mod backup;
pub(crate) mod bootloader;
pub(crate) mod completions;
pub(crate) mod devices;
pub(crate) mod session;

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Print a list one item per line, or as a JSON array, to stdout.
pub(crate) fn print_list(items: &[String], json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(items).unwrap_or_default()
        );
    } else {
        for item in items {
            println!("{item}");
        }
    }
}
