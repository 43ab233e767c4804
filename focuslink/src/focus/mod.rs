//! The Focus session.
//!
//! A [`Focus`] owns at most one open link to a keyboard. Callers on any
//! thread issue commands through it. Every call enqueues a pending request;
//! only the head of the queue is ever on the wire, and the background reader
//! answers it with the next frame.
//!
//! ```text
//!  caller ─┐                        ┌──────────── reader thread ───────────┐
//!  caller ─┼─> pending queue ──>    │ read ─> FrameParser ─> resolve head  │
//!  caller ─┘   (single flight)  │   │          │                           │
//!                               │   │          └─ idle / EOF / error:      │
//!                      pacing ──┘   │             drain queue, close link  │
//!                      writer ────> port                                   │
//!                                   └──────────────────────────────────────┘
//! ```
//!
//! A timeout, a disconnect, or an explicit [`Focus::close`] rejects every
//! queued request and drops the cached command and plugin lists.

mod config;
mod link;
mod pending;
mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use log::{debug, info, trace};

pub use config::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PACING, DEFAULT_POLL_INTERVAL, FocusConfig};
pub use registry::{CommandHandler, CommandPlugin, CommandRegistry, DirectHandler};

use crate::device::DetectedDevice;
use crate::error::{Error, LinkFailure, Result};
use crate::hardware::DeviceDescriptor;
use crate::port::{SerialConfig, Transport};
use crate::protocol::{FrameParser, encode_request, parse_listing, validate_request};
use crate::usb::UsbScanner;
use link::Link;
use pending::PendingQueue;

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct Session {
    link: Option<Link>,
    pending: PendingQueue,
    in_flight: Option<u64>,
    commands: Option<Vec<String>>,
    plugins: Option<Vec<String>>,
    /// Bumped on every open and close so stale readers and cache fills can tell.
    generation: u64,
}

impl Session {
    /// Hand a reply to the oldest pending request.
    fn dispatch(&mut self, reply: Option<String>) {
        match self.pending.resolve_head(reply) {
            Some(id) => {
                if self.in_flight == Some(id) {
                    self.in_flight = None;
                }
            },
            None => debug!("Dropped a response nobody was waiting for"),
        }
    }

    /// Tear the session down to "not connected" and return the link to release.
    fn detach(&mut self, failure: LinkFailure) -> Option<Link> {
        let rejected = self.pending.drain(failure);
        if rejected > 0 {
            debug!("Rejected {rejected} pending request(s): {failure:?}");
        }
        self.in_flight = None;
        self.commands = None;
        self.plugins = None;
        self.generation += 1;
        self.link.take()
    }

    fn is_gated(&self, command: &str) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|commands| !commands.is_empty() && !commands.iter().any(|c| c == command))
    }
}

pub(crate) struct Shared {
    state: Mutex<Session>,
    turn: Condvar,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        lock(&self.state)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Session>) -> MutexGuard<'a, Session> {
        self.turn
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A Focus protocol session.
pub struct Focus {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) scanner: Arc<dyn UsbScanner>,
    config: FocusConfig,
    registry: CommandRegistry,
    shared: Arc<Shared>,
}

impl Focus {
    /// Create a closed session.
    pub fn new(
        transport: Arc<dyn Transport>,
        scanner: Arc<dyn UsbScanner>,
        config: FocusConfig,
    ) -> Self {
        Self {
            transport,
            scanner,
            config,
            registry: CommandRegistry::with_builtins(),
            shared: Arc::new(Shared {
                state: Mutex::new(Session::default()),
                turn: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Session over the native serial stack and USB bus with default settings.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::with_config(FocusConfig::default())
    }

    /// Session over the native serial stack and USB bus.
    #[cfg(feature = "native")]
    pub fn with_config(config: FocusConfig) -> Self {
        Self::new(
            Arc::new(crate::port::NativeTransport),
            Arc::new(crate::usb::NativeUsbScanner),
            config,
        )
    }

    /// Add a command handler.
    #[must_use]
    pub fn with_command(mut self, name: impl Into<String>, handler: CommandHandler) -> Self {
        self.registry
            .register(name, handler);
        self
    }

    /// Open a link to the keyboard at `path`.
    ///
    /// An already open link is closed first, rejecting its pending requests.
    pub fn open(&self, path: &str, descriptor: &DeviceDescriptor) -> Result<()> {
        if path.trim().is_empty() {
            return Err(Error::InvalidArgument("device path is empty".to_string()));
        }
        if self.config.poll_interval.is_zero() {
            return Err(Error::InvalidArgument(
                "reader poll interval must be greater than zero".to_string(),
            ));
        }
        let parser = FrameParser::new(self.config.idle_timeout)?;

        self.close();

        let serial = SerialConfig::new(path, self.config.baud_rate)
            .with_timeout(self.config.poll_interval);
        let port = self.transport.open(&serial)?;

        let mut state = self.shared.lock();
        // Another caller may have opened a link since `close` above.
        let stale = if state.link.is_some() {
            state.detach(LinkFailure::Disconnected)
        } else {
            None
        };
        state.generation += 1;
        let started = Link::start(
            &self.shared,
            state.generation,
            port,
            self.config.write_strategy.writer(),
            parser,
            *descriptor,
        )
        .map(|link| state.link = Some(link));
        drop(state);
        self.shared.turn.notify_all();

        if let Some(stale) = stale {
            stale.release();
        }
        started?;
        info!("Opened {descriptor} at {path}");
        Ok(())
    }

    /// Open a link to a discovered device.
    pub fn open_device(&self, device: &DetectedDevice) -> Result<()> {
        let path = device
            .path
            .as_deref()
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{} has no serial port ({})",
                    device.display_name(),
                    device.connection
                ))
            })?;
        self.open(path, &device.descriptor)
    }

    /// Close the link, rejecting every pending request with [`Error::Disconnected`].
    pub fn close(&self) {
        let link = self
            .shared
            .lock()
            .detach(LinkFailure::Disconnected);
        self.shared.turn.notify_all();
        if let Some(link) = link {
            let path = link.path.clone();
            link.release();
            info!("Closed {path}");
        }
    }

    /// Whether a link is open.
    pub fn is_open(&self) -> bool {
        self.shared
            .lock()
            .link
            .is_some()
    }

    /// Descriptor of the open device.
    pub fn device(&self) -> Option<DeviceDescriptor> {
        self.shared
            .lock()
            .link
            .as_ref()
            .map(|link| link.descriptor)
    }

    /// Path of the open device.
    pub fn path(&self) -> Option<String> {
        self.shared
            .lock()
            .link
            .as_ref()
            .map(|link| link.path.clone())
    }

    /// Number of requests queued or on the wire.
    pub fn pending_requests(&self) -> usize {
        self.shared
            .lock()
            .pending
            .len()
    }

    /// Send one command to the firmware and wait for its response.
    ///
    /// Returns `Ok(None)` for an acknowledgement without data, and also,
    /// without touching the wire, for commands the firmware did not list in
    /// its `help` output. A command or argument containing a line break is
    /// rejected with [`Error::InvalidArgument`] before it is queued.
    pub fn request(&self, command: &str, args: &[&str]) -> Result<Option<String>> {
        validate_request(command, args)?;
        let mut state = self.shared.lock();

        if state.is_gated(command) {
            debug!("Skipping unsupported command: {command}");
            return Ok(None);
        }
        if state.link.is_none() {
            return Err(Error::NotConnected);
        }

        let id = self
            .shared
            .next_id
            .fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        state.pending.push(id, tx);
        trace!("Request #{id} queued: {command}");

        loop {
            if !state.pending.contains(id) {
                break;
            }
            if state.in_flight.is_none() && state.pending.head_id() == Some(id) {
                state.in_flight = Some(id);
                drop(state);
                self.send(id, command, args)?;
                break;
            }
            state = self.shared.wait(state);
        }

        rx.recv()
            .unwrap_or(Err(Error::Disconnected))
    }

    /// Put request `id` on the wire. Only the in-flight request calls this.
    fn send(&self, id: u64, command: &str, args: &[&str]) -> Result<()> {
        if !self.config.pacing.is_zero() {
            thread::sleep(self.config.pacing);
        }

        let (port, writer) = {
            let mut state = self.shared.lock();
            if state.in_flight != Some(id) {
                // Settled while pacing.
                return Ok(());
            }
            let Some(link) = state.link.as_mut() else {
                return Ok(());
            };
            link.parser
                .start_timer(Instant::now());
            (Arc::clone(&link.port), Arc::clone(&link.writer))
        };

        let line = encode_request(command, args);
        trace!("Request #{id} TX: {}", String::from_utf8_lossy(&line).trim_end());
        let written = writer.write_request(lock(&port).as_mut(), &line);

        if let Err(e) = written {
            debug!("Request #{id} write failed: {e}");
            let mut state = self.shared.lock();
            state.pending.remove(id);
            if state.in_flight == Some(id) {
                state.in_flight = None;
                if let Some(link) = state.link.as_mut() {
                    link.parser.end_timer();
                }
            }
            drop(state);
            self.shared.turn.notify_all();
            return Err(e);
        }
        Ok(())
    }

    /// Whether `command` would reach the firmware.
    ///
    /// Every command counts as supported until the `help` listing is cached.
    pub fn is_command_supported(&self, command: &str) -> bool {
        !self
            .shared
            .lock()
            .is_gated(command)
    }

    /// Run a command through the registry, falling back to the firmware.
    pub fn command(&self, name: &str, args: &[&str]) -> Result<Option<String>> {
        match self.registry.get(name) {
            Some(handler) => handler.call(self, args),
            None => self.request(name, args),
        }
    }

    /// Commands the firmware understands, from `help`. Cached per link.
    pub fn supported_commands(&self) -> Result<Vec<String>> {
        self.cached_listing("help", |state| &mut state.commands)
    }

    /// Plugins the firmware reports, from `plugins`. Cached per link.
    pub fn plugins(&self) -> Result<Vec<String>> {
        self.cached_listing("plugins", |state| &mut state.plugins)
    }

    fn cached_listing(
        &self,
        command: &str,
        slot: fn(&mut Session) -> &mut Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let generation = {
            let mut state = self.shared.lock();
            if let Some(cached) = slot(&mut *state) {
                return Ok(cached.clone());
            }
            state.generation
        };

        let reply = self.request(command, &[])?;
        let listing = reply
            .as_deref()
            .map(parse_listing)
            .unwrap_or_default();

        let mut state = self.shared.lock();
        if state.generation == generation && state.link.is_some() {
            *slot(&mut *state) = Some(listing.clone());
        }
        Ok(listing)
    }

    /// Whether the firmware exposes an editable keymap.
    pub fn has_customizable_keymaps(&self) -> Result<bool> {
        let commands = self.supported_commands()?;
        Ok(commands
            .iter()
            .any(|c| c == "keymap.custom" || c == "keymap.map"))
    }

    /// Whether the firmware exposes an editable LED color map.
    pub fn has_customizable_led_maps(&self) -> Result<bool> {
        let commands = self.supported_commands()?;
        let has = |name: &str| commands.iter().any(|c| c == name);
        Ok(has("colormap.map") && has("palette"))
    }
}

impl Drop for Focus {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::KNOWN_DEVICES;
    use crate::port::mock::MockDevice;
    use crate::protocol::WriteStrategy;
    use crate::usb::StaticScanner;
    use std::time::Duration;

    fn test_config() -> FocusConfig {
        FocusConfig::default()
            .with_pacing(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .with_write_strategy(WriteStrategy::Direct)
    }

    fn session(device: &MockDevice, config: FocusConfig) -> Focus {
        Focus::new(device.transport(), Arc::new(StaticScanner(Vec::new())), config)
    }

    fn open_session(device: &MockDevice) -> Focus {
        let focus = session(device, test_config());
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[1])
            .expect("mock open");
        focus
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn echo(line: &str) -> Option<Vec<u8>> {
        Some(format!("reply:{line}\r\n.\r\n").into_bytes())
    }

    fn with_help(line: &str) -> Option<Vec<u8>> {
        match line {
            "help" => Some(b"help\r\nversion\r\nkeymap.custom\r\nplugins\r\n\r\n.\r\n".to_vec()),
            "plugins" => Some(b"Kaleidoscope::FocusSerial\r\nEEPROMKeymap\r\n.\r\n".to_vec()),
            _ => echo(line),
        }
    }

    #[test]
    fn test_request_round_trip() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = open_session(&device);

        let reply = focus.request("led.at", &["3", "255 0 0"]).unwrap();
        assert_eq!(reply.as_deref(), Some("reply:led.at 3 255 0 0"));
        assert_eq!(device.written_lines(), vec!["led.at 3 255 0 0"]);
        assert_eq!(focus.pending_requests(), 0);
    }

    #[test]
    fn test_empty_acknowledgement() {
        let device = MockDevice::new();
        device.respond_with(|_| Some(b"\r\n.\r\n".to_vec()));
        let focus = open_session(&device);

        assert_eq!(focus.request("led.mode", &["1"]).unwrap(), None);
    }

    #[test]
    fn test_not_connected() {
        let device = MockDevice::new();
        let focus = session(&device, test_config());
        assert!(matches!(focus.request("version", &[]), Err(Error::NotConnected)));
        assert!(device.write_calls().is_empty());
    }

    #[test]
    fn test_open_rejects_empty_path() {
        let device = MockDevice::new();
        let focus = session(&device, test_config());
        assert!(matches!(
            focus.open("  ", &KNOWN_DEVICES[0]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(device.open_count(), 0);
        assert!(!focus.is_open());
    }

    #[test]
    fn test_open_reports_device() {
        let device = MockDevice::new();
        let focus = open_session(&device);
        assert!(focus.is_open());
        assert_eq!(focus.path().as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(focus.device(), Some(KNOWN_DEVICES[1]));
    }

    #[test]
    fn test_frames_resolve_in_send_order() {
        let device = MockDevice::new();
        let focus = Arc::new(open_session(&device));

        let first = {
            let focus = Arc::clone(&focus);
            thread::spawn(move || focus.request("a", &[]))
        };
        wait_until(|| device.written_lines() == vec!["a"]);

        let second = {
            let focus = Arc::clone(&focus);
            thread::spawn(move || focus.request("b", &[]))
        };
        wait_until(|| focus.pending_requests() == 2);

        device.push_incoming(b"first\r\n.\r\nsecond\r\n.\r\n");

        assert_eq!(first.join().unwrap().unwrap().as_deref(), Some("first"));
        assert_eq!(second.join().unwrap().unwrap().as_deref(), Some("second"));
        assert_eq!(focus.pending_requests(), 0);
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = Arc::new(open_session(&device));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let focus = Arc::clone(&focus);
                thread::spawn(move || {
                    let name = format!("cmd{i}");
                    let reply = focus.request(&name, &[]).unwrap();
                    (name, reply)
                })
            })
            .collect();

        for handle in handles {
            let (name, reply) = handle.join().unwrap();
            assert_eq!(reply, Some(format!("reply:{name}")));
        }
        assert_eq!(device.written_lines().len(), 4);
    }

    #[test]
    fn test_unsupported_command_short_circuits() {
        let device = MockDevice::new();
        device.respond_with(|line| match line {
            "help" => Some(b"help\r\nplugins\r\n.\r\n".to_vec()),
            other => echo(other),
        });
        let focus = open_session(&device);

        assert_eq!(focus.supported_commands().unwrap(), vec!["help", "plugins"]);
        let writes_before = device.write_calls().len();

        assert_eq!(focus.request("keymap", &[]).unwrap(), None);
        assert_eq!(device.write_calls().len(), writes_before);
        assert_eq!(focus.pending_requests(), 0);
    }

    #[test]
    fn test_disconnect_rejects_all_pending() {
        let device = MockDevice::new();
        let focus = Arc::new(open_session(&device));

        let handles: Vec<_> = ["version", "keymap", "colormap"]
            .into_iter()
            .map(|cmd| {
                let focus = Arc::clone(&focus);
                thread::spawn(move || focus.request(cmd, &[]))
            })
            .collect();
        wait_until(|| focus.pending_requests() == 3);

        device.disconnect();

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Err(Error::Disconnected)));
        }
        assert_eq!(focus.pending_requests(), 0);
        wait_until(|| !focus.is_open());
    }

    #[test]
    fn test_idle_timeout_rejects_all_pending() {
        let device = MockDevice::new();
        let focus = Arc::new(session(
            &device,
            test_config().with_idle_timeout(Duration::from_millis(100)),
        ));
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[1])
            .unwrap();

        let handles: Vec<_> = ["version", "help"]
            .into_iter()
            .map(|cmd| {
                let focus = Arc::clone(&focus);
                thread::spawn(move || focus.request(cmd, &[]))
            })
            .collect();

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Err(Error::Timeout)));
        }
        assert_eq!(focus.pending_requests(), 0);
        wait_until(|| !focus.is_open());
    }

    #[test]
    fn test_trickling_response_does_not_time_out() {
        let device = MockDevice::new();
        let focus = Arc::new(session(
            &device,
            test_config().with_idle_timeout(Duration::from_millis(150)),
        ));
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[1])
            .unwrap();

        let handle = {
            let focus = Arc::clone(&focus);
            thread::spawn(move || focus.request("keymap", &[]))
        };
        wait_until(|| device.written_lines() == vec!["keymap"]);

        for part in ["0 1 ", "2 3 ", "4 5 ", "6 7"] {
            thread::sleep(Duration::from_millis(60));
            device.push_incoming(part.as_bytes());
        }
        device.push_incoming(b"\r\n.\r\n");

        assert_eq!(
            handle.join().unwrap().unwrap().as_deref(),
            Some("0 1 2 3 4 5 6 7")
        );
    }

    #[test]
    fn test_end_of_stream_flushes_partial_reply_to_head() {
        let device = MockDevice::new();
        let focus = Arc::new(open_session(&device));

        let handles: Vec<_> = ["keymap", "colormap", "palette"]
            .into_iter()
            .map(|cmd| {
                let focus = Arc::clone(&focus);
                thread::spawn(move || (cmd, focus.request(cmd, &[])))
            })
            .collect();
        wait_until(|| focus.pending_requests() == 3 && device.written_lines().len() == 1);
        let head = device.written_lines()[0].clone();

        device.push_incoming(b"0 1 2");
        device.end_of_stream();

        for handle in handles {
            let (cmd, result) = handle.join().unwrap();
            if cmd == head {
                assert_eq!(result.unwrap().as_deref(), Some("0 1 2"));
            } else {
                assert!(matches!(result, Err(Error::Disconnected)), "{cmd}");
            }
        }
        assert_eq!(focus.pending_requests(), 0);
        wait_until(|| !focus.is_open());
        assert_eq!(device.written_lines(), vec![head]);
    }

    #[test]
    fn test_idle_timeout_without_pending_keeps_link() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = session(
            &device,
            test_config().with_idle_timeout(Duration::from_millis(50)),
        );
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[1])
            .unwrap();

        device.push_incoming(b"stray bytes");
        thread::sleep(Duration::from_millis(250));

        assert!(focus.is_open());
        assert_eq!(
            focus.request("version", &[]).unwrap().as_deref(),
            Some("reply:version")
        );
    }

    #[test]
    fn test_unsolicited_frame_is_dropped() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = open_session(&device);

        device.push_incoming(b"unsolicited\r\n.\r\n");
        thread::sleep(Duration::from_millis(100));

        assert!(focus.is_open());
        assert_eq!(focus.pending_requests(), 0);
        assert_eq!(
            focus.request("version", &[]).unwrap().as_deref(),
            Some("reply:version")
        );
    }

    #[test]
    fn test_line_breaks_are_rejected_before_queueing() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = open_session(&device);

        assert!(matches!(
            focus.request("macros.map", &["1 2\n3 4"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            focus.command("version\r", &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(focus.pending_requests(), 0);
        assert!(device.write_calls().is_empty());

        assert_eq!(
            focus.request("version", &[]).unwrap().as_deref(),
            Some("reply:version")
        );
        assert_eq!(device.written_lines(), vec!["version"]);
    }

    #[test]
    fn test_open_device_uses_detected_path() {
        let device = MockDevice::new();
        let focus = session(&device, test_config());
        let mut detected = DetectedDevice {
            descriptor: KNOWN_DEVICES[0],
            path: None,
            connection: crate::device::ConnectionKind::Default,
            vendor_id: KNOWN_DEVICES[0].usb.vendor_id,
            product_id: KNOWN_DEVICES[0].usb.product_id,
        };
        assert!(matches!(
            focus.open_device(&detected),
            Err(Error::InvalidArgument(_))
        ));

        detected.path = Some("/dev/ttyACM3".to_string());
        detected.connection = crate::device::ConnectionKind::Firmware;
        focus.open_device(&detected).unwrap();
        assert_eq!(focus.path().as_deref(), Some("/dev/ttyACM3"));
        assert_eq!(focus.device(), Some(KNOWN_DEVICES[0]));
    }

    #[test]
    fn test_write_failure_rejects_only_own_request() {
        let device = MockDevice::new();
        device.respond_with(echo);
        let focus = open_session(&device);

        device.fail_writes(true);
        assert!(matches!(focus.request("version", &[]), Err(Error::Io(_))));
        assert_eq!(focus.pending_requests(), 0);
        assert!(focus.is_open());

        device.fail_writes(false);
        assert_eq!(
            focus.request("version", &[]).unwrap().as_deref(),
            Some("reply:version")
        );
    }

    #[test]
    fn test_reopen_drains_and_clears_caches() {
        let device = MockDevice::new();
        device.respond_with(|line| match line {
            "help" => Some(b"help\r\nversion\r\n.\r\n".to_vec()),
            "version stall" => None,
            other => echo(other),
        });
        let focus = Arc::new(open_session(&device));
        assert_eq!(focus.supported_commands().unwrap().len(), 2);

        let stalled = {
            let focus = Arc::clone(&focus);
            thread::spawn(move || focus.request("version", &["stall"]))
        };
        wait_until(|| focus.pending_requests() == 1);

        focus
            .open("/dev/ttyACM1", &KNOWN_DEVICES[1])
            .unwrap();
        assert!(matches!(stalled.join().unwrap(), Err(Error::Disconnected)));
        assert_eq!(device.open_count(), 2);
        assert_eq!(focus.path().as_deref(), Some("/dev/ttyACM1"));

        // The old capability list would have gated this one.
        assert_eq!(
            focus.request("keymap", &[]).unwrap().as_deref(),
            Some("reply:keymap")
        );
    }

    #[test]
    fn test_close_clears_state() {
        let device = MockDevice::new();
        device.respond_with(with_help);
        let focus = open_session(&device);
        focus.supported_commands().unwrap();

        focus.close();
        assert!(!focus.is_open());
        assert!(focus.device().is_none());
        assert!(matches!(focus.request("version", &[]), Err(Error::NotConnected)));
        assert!(matches!(focus.supported_commands(), Err(Error::NotConnected)));
    }

    #[test]
    fn test_supported_commands_are_cached() {
        let device = MockDevice::new();
        device.respond_with(with_help);
        let focus = open_session(&device);

        let commands = focus.supported_commands().unwrap();
        assert_eq!(commands, vec!["help", "version", "keymap.custom", "plugins"]);
        assert_eq!(focus.supported_commands().unwrap(), commands);
        assert_eq!(device.written_lines(), vec!["help"]);

        assert!(focus.has_customizable_keymaps().unwrap());
        assert!(!focus.has_customizable_led_maps().unwrap());
    }

    #[test]
    fn test_plugins() {
        let device = MockDevice::new();
        device.respond_with(with_help);
        let focus = open_session(&device);

        assert_eq!(
            focus.plugins().unwrap(),
            vec!["Kaleidoscope::FocusSerial", "EEPROMKeymap"]
        );
        focus.plugins().unwrap();
        assert_eq!(device.written_lines(), vec!["plugins"]);
    }

    #[test]
    fn test_help_command_goes_through_registry() {
        let device = MockDevice::new();
        device.respond_with(with_help);
        let focus = open_session(&device);

        assert_eq!(
            focus.command("help", &[]).unwrap().as_deref(),
            Some("help\nversion\nkeymap.custom\nplugins")
        );
        assert_eq!(
            focus.command("version", &[]).unwrap().as_deref(),
            Some("reply:version")
        );
    }

    struct Join;

    impl CommandPlugin for Join {
        fn focus(&self, _session: &Focus, args: &[&str]) -> Result<Option<String>> {
            Ok(Some(args.join(",")))
        }
    }

    #[test]
    fn test_plugin_handler_dispatch() {
        let device = MockDevice::new();
        let focus = session(&device, test_config())
            .with_command("host.join", CommandHandler::Plugin(Arc::new(Join)));

        assert_eq!(
            focus.command("host.join", &["a", "b"]).unwrap().as_deref(),
            Some("a,b")
        );
        assert!(device.write_calls().is_empty());
        assert!(matches!(focus.command("version", &[]), Err(Error::NotConnected)));
    }

    #[test]
    fn test_chunked_session_writes() {
        let device = MockDevice::new();
        device.respond_with(|_| Some(b"\r\n.\r\n".to_vec()));
        let focus = session(
            &device,
            test_config().with_write_strategy(WriteStrategy::Chunked),
        );
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[0])
            .unwrap();

        let value = "1 ".repeat(40);
        focus.request("keymap.custom", &[value.trim_end()]).unwrap();

        let calls = device.write_calls();
        assert!(calls.len() > 1);
        assert!(calls.iter().all(|c| c.len() <= 32));
    }
}
