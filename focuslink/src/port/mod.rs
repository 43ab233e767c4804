//! Transport abstraction for the serial link to the keyboard.
//!
//! The protocol engine never touches a concrete serial implementation. It
//! asks a [`Transport`] to enumerate and open ports, and talks to the opened
//! [`Port`] through `Read`/`Write` plus a few line-level controls.
//!
//! ```text
//! +------------------+
//! |   Focus session  |   request/response correlation
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------------+
//! |   Port trait     | <-- |  Transport trait |  list + open
//! +--------+---------+     +------------------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the Focus firmware expects on its CDC-ACM endpoint.
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout. The session reader uses it as its poll tick.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information as reported by the operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Returns the `(vid, pid)` pair when both are known.
    pub fn usb_ids(&self) -> Option<(u16, u16)> {
        self.vid.zip(self.pid)
    }

    /// Check whether this port belongs to the given USB identity.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.usb_ids() == Some((vid, pid))
    }
}

/// An open, bidirectional serial link.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Block until all buffered output has been handed to the device.
    fn drain(&mut self) -> Result<()> {
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Create an independent read handle for a background reader thread.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        self.drain()
    }
}

/// Serial-port enumeration and opening.
///
/// This is the seam between the protocol engine and the host's serial
/// stack. The native implementation wraps the `serialport` crate; tests use a
/// scripted in-memory transport.
pub trait Transport: Send + Sync {
    /// List all available serial ports.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open a port with the given configuration.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(&self, vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let ports = self.list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.matches(vid, pid))
            .collect())
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::{NativePort, NativeTransport};
