//! Device discovery and classification.
//!
//! Discovery cross-references three sources: the serial ports the OS knows
//! about, the devices present on the USB bus, and the hardware catalog. A
//! keyboard can be visible on the bus before its serial port is registered,
//! and its bootloader may never register one at all, so the classification
//! depends on which sources agree.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace};

use crate::hardware::{self, DeviceDescriptor};
use crate::port::Transport;
use crate::usb::UsbScanner;

/// How a discovered device can be talked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ConnectionKind {
    /// Normal firmware with a serial port: ready for Focus.
    #[cfg_attr(feature = "serde", serde(rename = "normal-firmware"))]
    Firmware,
    /// Normal firmware identity on the bus, but no serial port (yet).
    Default,
    /// Bootloader identity.
    Bootloader,
}

impl ConnectionKind {
    /// Stable name used in listings and JSON output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Firmware => "normal-firmware",
            Self::Default => "default",
            Self::Bootloader => "bootloader",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A keyboard found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    /// Catalog entry the USB ids matched.
    pub descriptor: DeviceDescriptor,
    /// Serial port path, if one is registered for these ids.
    pub path: Option<String>,
    /// Classification.
    pub connection: ConnectionKind,
    /// USB Vendor ID.
    pub vendor_id: u16,
    /// USB Product ID.
    pub product_id: u16,
}

impl DetectedDevice {
    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        self.descriptor.display_name
    }

    /// Whether the catalog entry accepts this particular device.
    pub fn is_supported(&self) -> bool {
        self.descriptor
            .is_supported
            .is_none_or(|predicate| predicate(self))
    }

    /// Whether a Focus session can be opened on this device.
    pub fn is_focus_ready(&self) -> bool {
        self.connection == ConnectionKind::Firmware && self.path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityRole {
    Firmware,
    Bootloader,
}

/// Build the `(vid, pid) -> role` map from the catalog.
///
/// Later entries override earlier ones for the same ids.
fn identity_roles(catalog: &[DeviceDescriptor]) -> HashMap<(u16, u16), IdentityRole> {
    let mut roles = HashMap::new();
    for device in catalog {
        roles.insert(
            (device.usb.vendor_id, device.usb.product_id),
            IdentityRole::Firmware,
        );
        roles.insert(
            (
                device.bootloader.usb.vendor_id,
                device.bootloader.usb.product_id,
            ),
            IdentityRole::Bootloader,
        );
    }
    roles
}

/// Enumerate attached keyboards and classify each one.
///
/// Enumeration failures are logged and treated as "nothing found".
pub fn discover_devices(
    transport: &dyn Transport,
    scanner: &dyn UsbScanner,
    catalog: &[DeviceDescriptor],
) -> Vec<DetectedDevice> {
    let serial_paths: HashMap<(u16, u16), String> = match transport.list_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter_map(|p| {
                let ids = p.usb_ids()?;
                trace!("Serial port {} ({:04X}:{:04X})", p.name, ids.0, ids.1);
                Some((ids, p.name))
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            HashMap::new()
        },
    };

    let usb_devices = match scanner.scan(None, None) {
        Ok(devices) => devices,
        Err(e) => {
            debug!("Failed to scan USB devices: {e}");
            return Vec::new();
        },
    };

    let roles = identity_roles(catalog);

    usb_devices
        .into_iter()
        .filter_map(|usb| {
            let key = (usb.vendor_id, usb.product_id);
            let role = *roles.get(&key)?;
            let (descriptor, _) = hardware::find_by_usb_ids(catalog, key.0, key.1)?;
            let path = serial_paths
                .get(&key)
                .cloned();

            let connection = match (role, &path) {
                (IdentityRole::Firmware, Some(_)) => ConnectionKind::Firmware,
                (IdentityRole::Firmware, None) => ConnectionKind::Default,
                (IdentityRole::Bootloader, _) => ConnectionKind::Bootloader,
            };

            debug!(
                "Found {} [{}] at {}",
                descriptor.display_name,
                connection,
                path.as_deref()
                    .unwrap_or("<no serial port>")
            );

            Some(DetectedDevice {
                descriptor,
                path,
                connection,
                vendor_id: usb.vendor_id,
                product_id: usb.product_id,
            })
        })
        .collect()
}

/// Choose the first device a session can be opened on.
pub fn pick_focus_device(devices: Vec<DetectedDevice>) -> Option<DetectedDevice> {
    devices
        .into_iter()
        .find(|d| d.is_focus_ready() && d.is_supported())
}

/// Whether the current user may open `path` for reading and writing.
///
/// Only Linux reports permission problems up front (missing udev rules);
/// elsewhere the open call itself is the check. The device node is never
/// opened, since opening a tty can toggle DTR and reset the keyboard.
pub fn is_device_accessible(path: &str) -> bool {
    #[cfg(target_os = "linux")]
    {
        use rustix::fs::{Access, access};

        match access(path, Access::READ_OK | Access::WRITE_OK) {
            Ok(()) => true,
            Err(e) => {
                debug!("{path} is not accessible: {e}");
                false
            },
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        true
    }
}

/// Format a list of detected devices for display.
pub fn format_device_list(devices: &[DetectedDevice]) -> Vec<String> {
    devices
        .iter()
        .map(|device| {
            let path = device
                .path
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!(
                "{} [{}] ({:04X}:{:04X}){}",
                device.display_name(),
                device.connection,
                device.vendor_id,
                device.product_id,
                path
            )
        })
        .collect()
}
