//! Request writers.
//!
//! Some host serial stacks (macOS CDC-ACM in particular) lose bytes when a
//! long request is handed over in one write. The chunked writer splits the
//! request into small pieces with a pause and a drain after each one.

use std::fmt;
use std::io::Write;
use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::Result;
use crate::port::Port;

/// Bytes written per chunk by [`ChunkedWriter`].
pub const CHUNK_SIZE: usize = 32;

/// Pause after each chunk written by [`ChunkedWriter`].
pub const CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Pushes one encoded request onto a port.
pub trait RequestWriter: Send + Sync + fmt::Debug {
    /// Write the full request. Returns once every byte has been handed to
    /// the device, or with the first transport error.
    fn write_request(&self, port: &mut dyn Port, request: &[u8]) -> Result<()>;
}

/// Writes the whole request in one call, then drains.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectWriter;

impl RequestWriter for DirectWriter {
    fn write_request(&self, port: &mut dyn Port, request: &[u8]) -> Result<()> {
        trace!("Writing {} bytes in one call", request.len());
        port.write_all_bytes(request)
    }
}

/// Writes the request in fixed-size chunks, pausing and draining after each.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedWriter {
    chunk_size: usize,
    delay: Duration,
}

impl Default for ChunkedWriter {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            delay: CHUNK_DELAY,
        }
    }
}

impl ChunkedWriter {
    /// Create a writer with custom chunking. A zero chunk size is treated as one byte.
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
        }
    }

    /// Bytes per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl RequestWriter for ChunkedWriter {
    fn write_request(&self, port: &mut dyn Port, request: &[u8]) -> Result<()> {
        trace!(
            "Writing {} bytes in chunks of {}",
            request.len(),
            self.chunk_size
        );
        for chunk in request.chunks(self.chunk_size) {
            port.write_all(chunk)?;
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            port.drain()?;
        }
        Ok(())
    }
}

/// How requests are put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WriteStrategy {
    /// Chunked on macOS, direct everywhere else.
    #[default]
    Auto,
    /// Always a single write.
    Direct,
    /// Always chunked.
    Chunked,
}

impl WriteStrategy {
    /// Resolve `Auto` for the platform this binary was built for.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(target_os = "macos") => Self::Chunked,
            Self::Auto => Self::Direct,
            other => other,
        }
    }

    /// Build the writer for this strategy.
    pub fn writer(self) -> Box<dyn RequestWriter> {
        match self.resolve() {
            Self::Chunked => Box::new(ChunkedWriter::default()),
            _ => Box::new(DirectWriter),
        }
    }
}
