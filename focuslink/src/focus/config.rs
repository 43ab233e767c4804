//! Session tuning.

use std::time::Duration;

use crate::port::DEFAULT_BAUD;
use crate::protocol::WriteStrategy;

/// Idle interval after which a silent exchange is declared dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before every request write.
pub const DEFAULT_PACING: Duration = Duration::from_millis(250);

/// Read timeout of the background reader, i.e. how often it checks the idle deadline.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Settings applied when a link is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Frame idle timeout.
    pub idle_timeout: Duration,
    /// Delay before each request.
    pub pacing: Duration,
    /// Reader poll tick.
    pub poll_interval: Duration,
    /// Request writer selection.
    pub write_strategy: WriteStrategy,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            pacing: DEFAULT_PACING,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_strategy: WriteStrategy::Auto,
        }
    }
}

impl FocusConfig {
    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the frame idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the pre-request pacing delay.
    #[must_use]
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the reader poll tick.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the write strategy.
    #[must_use]
    pub fn with_write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }
}
