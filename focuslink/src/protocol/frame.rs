//! Sentinel framing for Focus responses.
//!
//! The firmware terminates every response with `\r\n.\r\n`. There is no
//! length prefix, so the parser accumulates bytes until the sentinel shows
//! up, and an idle deadline decides when a response has stalled.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------------------------+----------------+
//! |  payload (0..n bytes)       |  \r \n . \r \n |
//! +-----------------------------+----------------+
//! ```
//!
//! A zero-length payload is the "command succeeded, nothing to report"
//! acknowledgement.
//!
//! Time is passed in explicitly, which keeps the parser free of threads and
//! timers.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Byte sequence terminating every response.
pub const SENTINEL: &[u8] = b"\r\n.\r\n";

/// Marker emitted in place of a zero-length span.
pub const EMPTY_MARKER: &[u8] = b".";

/// One complete response unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Acknowledgement without data.
    Empty,
    /// Raw response bytes, sentinel removed.
    Data(Vec<u8>),
}

impl Frame {
    fn from_span(span: &[u8]) -> Self {
        if span.is_empty() {
            Self::Empty
        } else {
            Self::Data(span.to_vec())
        }
    }

    /// Raw bytes of the frame; the empty acknowledgement renders as `"."`.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => EMPTY_MARKER,
            Self::Data(data) => data,
        }
    }

    /// Whether this frame carries no data.
    ///
    /// A payload consisting of the marker itself is treated the same way.
    pub fn is_empty_marker(&self) -> bool {
        self.as_bytes() == EMPTY_MARKER
    }

    /// Convert to the caller-facing reply: `None` for an acknowledgement,
    /// otherwise the text with surrounding whitespace removed.
    pub fn into_reply(self) -> Option<String> {
        if self.is_empty_marker() {
            return None;
        }
        match self {
            Self::Empty => None,
            Self::Data(data) => Some(
                String::from_utf8_lossy(&data)
                    .trim()
                    .to_string(),
            ),
        }
    }
}

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// No deadline armed.
    Idle,
    /// Waiting for the rest of a response until `deadline`.
    Accumulating {
        /// When the current exchange is considered dead.
        deadline: Instant,
    },
    /// The deadline passed. Terminal for the current exchange only.
    TimedOut,
}

/// Stateful byte-stream to frame transformer.
#[derive(Debug)]
pub struct FrameParser {
    interval: Duration,
    buffer: Vec<u8>,
    state: ParserState,
}

impl FrameParser {
    /// Create a parser with the given idle interval.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument(
                "frame idle interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            interval,
            buffer: Vec::new(),
            state: ParserState::Idle,
        })
    }

    /// Idle interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of bytes waiting for a sentinel.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ParserState::Accumulating { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// (Re)start the idle deadline from `now`.
    pub fn start_timer(&mut self, now: Instant) {
        self.state = ParserState::Accumulating {
            deadline: now + self.interval,
        };
    }

    /// Cancel the idle deadline.
    pub fn end_timer(&mut self) {
        self.state = ParserState::Idle;
    }

    /// Consume a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> Vec<Frame> {
        self.end_timer();
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = find_sentinel(&self.buffer[consumed..]) {
            let span = &self.buffer[consumed..consumed + pos];
            trace!("Frame of {} bytes", span.len());
            frames.push(Frame::from_span(span));
            consumed += pos + SENTINEL.len();
        }
        self.buffer.drain(..consumed);

        if !self.buffer.is_empty() {
            self.start_timer(now);
        }

        frames
    }

    /// Check the idle deadline.
    ///
    /// Returns `true` exactly once per expired deadline. The partial data of
    /// the dead exchange is discarded.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.state {
            ParserState::Accumulating { deadline } if now >= deadline => {
                trace!(
                    "Idle timeout with {} buffered bytes",
                    self.buffer.len()
                );
                self.buffer.clear();
                self.state = ParserState::TimedOut;
                true
            },
            _ => false,
        }
    }

    /// Flush whatever is left at end of stream as a final, unterminated frame.
    pub fn finish(&mut self) -> Option<Frame> {
        self.end_timer();
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(Frame::Data(rest))
    }
}

fn find_sentinel(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(SENTINEL.len())
        .position(|w| w == SENTINEL)
}
