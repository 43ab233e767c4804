//! # focuslink
//!
//! A host-side driver for the Focus protocol, the line-based configuration
//! protocol spoken by Kaleidoscope keyboard firmware over USB serial.
//!
//! This crate provides:
//!
//! - Sentinel framing of the response stream with an idle timeout
//! - A session that serializes concurrent callers onto one in-flight request
//! - Capability discovery (`help`, `plugins`) and command gating
//! - Device discovery and classification by USB identity
//! - Bootloader detection and reconnection for firmware updates
//! - Configuration backup and restore
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` and
//!   `nusb` crates
//!
//! ## Features
//!
//! - `native` (default): Native serial port and USB support
//! - `serde`: Serialization support for snapshots and device data
//!
//! ## Example
//!
//! ```rust,no_run
//! use focuslink::Focus;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let device = focuslink::host::auto_detect_device()?;
//!         let focus = Focus::native();
//!         focus.open_device(&device)?;
//!
//!         println!("{:?}", focus.request("version", &[])?);
//!
//!         let snapshot = focus.backup(&mut |command, current, total| {
//!             println!("Backing up {command}: {}/{total}", current + 1);
//!         })?;
//!         println!("Captured {} settings", snapshot.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod backup;
pub mod bootloader;
pub mod device;
pub mod error;
pub mod focus;
pub mod hardware;
#[cfg(feature = "native")]
pub mod host;
pub mod port;
pub mod protocol;
pub mod usb;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Backup and
/// restore consult it between commands.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// Serializes tests that touch or depend on the process-wide interrupt flag.
#[cfg(test)]
pub(crate) fn test_interrupt_guard() -> std::sync::MutexGuard<'static, ()> {
    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
    GUARD
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativeTransport};
#[cfg(feature = "native")]
pub use usb::NativeUsbScanner;
pub use {
    backup::{BACKUP_COMMANDS, RESTORE_COMMANDS, Snapshot},
    bootloader::{BootloaderMatch, SerialMatch, UpdateState, UpdateWatcher},
    device::{ConnectionKind, DetectedDevice, discover_devices, format_device_list},
    error::{Error, Result},
    focus::{CommandHandler, CommandPlugin, CommandRegistry, Focus, FocusConfig},
    hardware::{
        BootloaderIdentity, BootloaderProtocol, DeviceDescriptor, KNOWN_DEVICES, UsbIdentity,
    },
    port::{Port, PortInfo, SerialConfig, Transport},
    protocol::{Frame, FrameParser, WriteStrategy},
    usb::{UsbDeviceInfo, UsbScanner},
};
