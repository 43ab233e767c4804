//! Host-side shortcuts over the native serial stack and USB bus.

use crate::device::{self, DetectedDevice};
use crate::hardware::KNOWN_DEVICES;
use crate::port::NativeTransport;
use crate::usb::NativeUsbScanner;

/// Discover all attached keyboards from the built-in catalog.
#[must_use]
pub fn discover_devices() -> Vec<DetectedDevice> {
    device::discover_devices(&NativeTransport, &NativeUsbScanner, KNOWN_DEVICES)
}

/// Pick the single best device to open a session on.
///
/// Devices running normal firmware with a serial port come first; among
/// those, catalog order decides.
pub fn auto_detect_device() -> crate::Result<DetectedDevice> {
    device::pick_focus_device(discover_devices()).ok_or(crate::Error::DeviceNotFound)
}
