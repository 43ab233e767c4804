//! Device listing.

use console::style;
use focuslink::device::{is_device_accessible, pick_focus_device};
use focuslink::{DetectedDevice, format_device_list};

/// JSON view of one detected keyboard.
fn device_json(device: &DetectedDevice) -> serde_json::Value {
    serde_json::json!({
        "name": device.display_name(),
        "vendor": device.descriptor.vendor,
        "product": device.descriptor.product,
        "path": device.path,
        "connection": device.connection,
        "vid": device.vendor_id,
        "pid": device.product_id,
        "bootloader": device.descriptor.bootloader.protocol.name(),
        "supported": device.is_supported(),
    })
}

/// List devices command implementation.
pub(crate) fn cmd_list_devices(json: bool) {
    let devices = focuslink::host::discover_devices();

    if json {
        let entries: Vec<serde_json::Value> = devices
            .iter()
            .map(device_json)
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return;
    }

    eprintln!(
        "{}",
        style("Attached keyboards")
            .bold()
            .underlined()
    );

    if devices.is_empty() {
        eprintln!("  {}", style("No keyboards found").dim());
        return;
    }

    for (device, line) in devices
        .iter()
        .zip(format_device_list(&devices))
    {
        let mut notes = String::new();
        if !device.is_supported() {
            notes.push_str(" (unsupported)");
        }
        if device
            .path
            .as_deref()
            .is_some_and(|path| !is_device_accessible(path))
        {
            notes.push_str(" (permission denied)");
        }
        eprintln!(
            "  {} {}{}",
            style("•").green(),
            style(line).cyan(),
            style(notes).yellow()
        );
    }

    // Show auto-detection result
    if let Some(auto) = pick_focus_device(devices) {
        if let Some(path) = auto.path {
            eprintln!(
                "\n{} Auto-detected: {}",
                style("→")
                    .green()
                    .bold(),
                style(path)
                    .cyan()
                    .bold()
            );
        }
    }
}
