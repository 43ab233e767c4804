//! Hardware descriptor catalog.
//!
//! Each supported keyboard is described by its USB identity in normal
//! operation and the identity it takes on while its bootloader is running.
//! The table here is lookup data only; nothing in it is probed.

use std::fmt;

use crate::device::DetectedDevice;

/// A USB (vendor id, product id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbIdentity {
    /// USB Vendor ID.
    pub vendor_id: u16,
    /// USB Product ID.
    pub product_id: u16,
}

impl UsbIdentity {
    /// Create a new identity.
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Check if this identity matches the given USB ids.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vendor_id == vid && self.product_id == pid
    }
}

impl fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

/// Flashing protocol spoken by a bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootloaderProtocol {
    /// AVR109 (Caterina); enumerates as a serial port.
    Avr109,
    /// USB DFU.
    Dfu,
    /// Atmel FLIP.
    Flip,
    /// PJRC HalfKay (Teensy).
    HalfKay,
}

impl BootloaderProtocol {
    /// Protocol name as used in descriptor tables.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Avr109 => "avr109",
            Self::Dfu => "dfu",
            Self::Flip => "flip",
            Self::HalfKay => "halfkay",
        }
    }

    /// Whether the bootloader shows up as a serial port rather than a raw USB device.
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Avr109)
    }
}

impl fmt::Display for BootloaderProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// USB identity of a device's bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderIdentity {
    /// USB ids while the bootloader is running.
    pub usb: UsbIdentity,
    /// Flashing protocol.
    pub protocol: BootloaderProtocol,
}

/// Extra filter applied to candidates whose USB ids alone are ambiguous.
pub type SupportPredicate = fn(&DetectedDevice) -> bool;

/// Static description of one keyboard model.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor {
    /// Vendor name.
    pub vendor: &'static str,
    /// Product name.
    pub product: &'static str,
    /// Human-readable name.
    pub display_name: &'static str,
    /// USB ids in normal operation.
    pub usb: UsbIdentity,
    /// USB ids in bootloader mode.
    pub bootloader: BootloaderIdentity,
    /// Optional support filter.
    pub is_supported: Option<SupportPredicate>,
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.display_name == other.display_name
            && self.usb == other.usb
            && self.bootloader == other.bootloader
    }
}

impl Eq for DeviceDescriptor {}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name)
    }
}

const fn descriptor(
    vendor: &'static str,
    product: &'static str,
    display_name: &'static str,
    usb: (u16, u16),
    bootloader: (u16, u16),
    protocol: BootloaderProtocol,
) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor,
        product,
        display_name,
        usb: UsbIdentity::new(usb.0, usb.1),
        bootloader: BootloaderIdentity {
            usb: UsbIdentity::new(bootloader.0, bootloader.1),
            protocol,
        },
        is_supported: None,
    }
}

/// Built-in catalog of Focus-capable keyboards.
pub const KNOWN_DEVICES: &[DeviceDescriptor] = &[
    descriptor(
        "Keyboardio",
        "Model100",
        "Keyboardio Model 100",
        (0x3496, 0x0006),
        (0x3496, 0x0005),
        BootloaderProtocol::Dfu,
    ),
    descriptor(
        "Keyboardio",
        "Model01",
        "Keyboardio Model 01",
        (0x1209, 0x2301),
        (0x1209, 0x2300),
        BootloaderProtocol::Avr109,
    ),
    descriptor(
        "Keyboardio",
        "Atreus",
        "Keyboardio Atreus",
        (0x1209, 0x2303),
        (0x1209, 0x2302),
        BootloaderProtocol::Avr109,
    ),
    descriptor(
        "EZ",
        "ErgoDox",
        "ErgoDox EZ",
        (0xFEED, 0x1307),
        (0x16C0, 0x0478),
        BootloaderProtocol::HalfKay,
    ),
    descriptor(
        "Technomancy",
        "Atreus",
        "Technomancy Atreus",
        (0x1209, 0xA1E5),
        (0x1B4F, 0x9207),
        BootloaderProtocol::Avr109,
    ),
    descriptor(
        "SOFT/HRUF",
        "Splitography",
        "SOFT/HRUF Splitography",
        (0xFEED, 0x6060),
        (0x03EB, 0x2FF4),
        BootloaderProtocol::Flip,
    ),
];

/// Look up a descriptor by USB ids.
///
/// Returns the descriptor and whether the ids matched its bootloader
/// identity. Normal identities are checked before bootloader identities of
/// the same entry; entries are checked in catalog order.
pub fn find_by_usb_ids(
    catalog: &[DeviceDescriptor],
    vid: u16,
    pid: u16,
) -> Option<(DeviceDescriptor, bool)> {
    catalog
        .iter()
        .find_map(|device| {
            if device.usb.matches(vid, pid) {
                Some((*device, false))
            } else if device
                .bootloader
                .usb
                .matches(vid, pid)
            {
                Some((*device, true))
            } else {
                None
            }
        })
}

/// Look up a descriptor by display name or product name, case-insensitively.
pub fn find_by_name<'a>(catalog: &'a [DeviceDescriptor], name: &str) -> Option<&'a DeviceDescriptor> {
    catalog.iter().find(|d| {
        d.display_name.eq_ignore_ascii_case(name)
            || d.product.eq_ignore_ascii_case(name)
            || format!("{}/{}", d.vendor, d.product).eq_ignore_ascii_case(name)
    })
}
