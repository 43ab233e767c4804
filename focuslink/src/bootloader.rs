//! Bootloader detection and reconnection during firmware updates.
//!
//! When a keyboard reboots into its bootloader it disappears and comes back
//! under a different USB identity. Serial-style (AVR109) bootloaders
//! register a tty; the others are only visible on the USB bus. After
//! flashing, the keyboard returns under its normal identity and the session
//! has to be reopened.
//!
//! Every check here is single-shot. Waiting, retrying and backoff belong to
//! the caller.

use log::{debug, info};

use crate::error::Result;
use crate::focus::Focus;
use crate::hardware::{BootloaderProtocol, DeviceDescriptor, UsbIdentity};
use crate::port::{PortInfo, Transport};
use crate::usb::UsbScanner;

/// A serial port matching one of a descriptor's identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialMatch {
    /// The matching port.
    pub port: PortInfo,
    /// Catalog entry it belongs to.
    pub descriptor: DeviceDescriptor,
    /// Whether the port matched the bootloader identity.
    pub bootloader: bool,
}

/// A device found in bootloader mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderMatch {
    /// Catalog entry it belongs to.
    pub descriptor: DeviceDescriptor,
    /// Protocol to flash it with.
    pub protocol: BootloaderProtocol,
    /// USB identity it was found under.
    pub usb: UsbIdentity,
    /// Serial port, for serial-style bootloaders.
    pub path: Option<String>,
}

/// Look for a serial port with the given identity.
pub fn check_serial_device(
    transport: &dyn Transport,
    descriptor: &DeviceDescriptor,
    identity: UsbIdentity,
) -> Option<SerialMatch> {
    let ports = match transport.find_by_vid_pid(identity.vendor_id, identity.product_id) {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return None;
        },
    };
    let port = ports.into_iter().next()?;
    debug!("{descriptor} ({identity}) at {}", port.name);
    Some(SerialMatch {
        port,
        descriptor: *descriptor,
        bootloader: identity == descriptor.bootloader.usb,
    })
}

/// Look for the descriptor's normal-firmware serial port.
pub fn check_firmware(transport: &dyn Transport, descriptor: &DeviceDescriptor) -> Option<SerialMatch> {
    check_serial_device(transport, descriptor, descriptor.usb)
}

/// Look for the descriptor's bootloader.
pub fn check_bootloader(
    transport: &dyn Transport,
    scanner: &dyn UsbScanner,
    descriptor: &DeviceDescriptor,
) -> Option<BootloaderMatch> {
    let identity = descriptor.bootloader.usb;
    let protocol = descriptor.bootloader.protocol;

    if protocol.is_serial() {
        let found = check_serial_device(transport, descriptor, identity)?;
        return Some(BootloaderMatch {
            descriptor: *descriptor,
            protocol,
            usb: identity,
            path: Some(found.port.name),
        });
    }

    let devices = match scanner.scan(Some(identity.product_id), Some(identity.vendor_id)) {
        Ok(devices) => devices,
        Err(e) => {
            debug!("Failed to scan USB devices: {e}");
            return None;
        },
    };
    if devices.is_empty() {
        return None;
    }
    debug!("{descriptor} bootloader ({protocol}) on USB {identity}");
    Some(BootloaderMatch {
        descriptor: *descriptor,
        protocol,
        usb: identity,
        path: None,
    })
}

impl Focus {
    /// Reopen the session on the descriptor's normal-firmware port.
    ///
    /// Returns `Ok(false)` when the keyboard is not back yet. On success the
    /// command and plugin lists are fetched again.
    pub fn reconnect(&self, descriptor: &DeviceDescriptor) -> Result<bool> {
        let Some(found) = check_firmware(self.transport.as_ref(), descriptor) else {
            return Ok(false);
        };
        self.open(&found.port.name, descriptor)?;
        self.supported_commands()?;
        self.plugins()?;
        info!("Reconnected to {descriptor} at {}", found.port.name);
        Ok(true)
    }

    /// Single-shot bootloader check for `descriptor`.
    pub fn check_bootloader(&self, descriptor: &DeviceDescriptor) -> Option<BootloaderMatch> {
        check_bootloader(self.transport.as_ref(), self.scanner.as_ref(), descriptor)
    }
}

/// Where a firmware update currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    /// Waiting for the keyboard to show up in bootloader mode.
    WaitingForBootloader,
    /// Bootloader present and ready to be flashed.
    InBootloader(BootloaderMatch),
    /// Bootloader gone; waiting for the normal firmware to come back.
    WaitingForFirmware,
    /// Session reopened on the normal firmware.
    Reconnected,
}

/// Tracks one keyboard through bootloader entry, flashing and reconnection.
///
/// The flashing itself happens elsewhere. Each [`poll`](Self::poll) performs
/// one check appropriate to the current state.
#[derive(Debug, Clone)]
pub struct UpdateWatcher {
    descriptor: DeviceDescriptor,
    state: UpdateState,
}

impl UpdateWatcher {
    /// Start waiting for `descriptor` to enter its bootloader.
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            state: UpdateState::WaitingForBootloader,
        }
    }

    /// Current state.
    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    /// Whether the update cycle is complete.
    pub fn is_done(&self) -> bool {
        self.state == UpdateState::Reconnected
    }

    /// Mark the bootloader as done with; the next poll looks for the firmware.
    pub fn firmware_flashed(&mut self) {
        if matches!(self.state, UpdateState::InBootloader(_)) {
            self.state = UpdateState::WaitingForFirmware;
        }
    }

    /// Run one check and advance.
    pub fn poll(&mut self, focus: &Focus) -> Result<&UpdateState> {
        let next = match &self.state {
            UpdateState::WaitingForBootloader => focus
                .check_bootloader(&self.descriptor)
                .map(UpdateState::InBootloader),
            UpdateState::InBootloader(_) => focus
                .check_bootloader(&self.descriptor)
                .is_none()
                .then_some(UpdateState::WaitingForFirmware),
            UpdateState::WaitingForFirmware => focus
                .reconnect(&self.descriptor)?
                .then_some(UpdateState::Reconnected),
            UpdateState::Reconnected => None,
        };
        if let Some(next) = next {
            debug!("Update state: {:?} -> {next:?}", self.state);
            self.state = next;
        }
        Ok(&self.state)
    }
}
