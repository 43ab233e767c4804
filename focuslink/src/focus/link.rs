//! One open serial link and its reader thread.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, trace, warn};

use crate::error::{LinkFailure, Result};
use crate::focus::{Shared, lock};
use crate::hardware::DeviceDescriptor;
use crate::port::Port;
use crate::protocol::{FrameParser, RequestWriter};

const READ_BUFFER_SIZE: usize = 1024;

pub(crate) struct Link {
    pub(crate) port: Arc<Mutex<Box<dyn Port>>>,
    pub(crate) writer: Arc<dyn RequestWriter>,
    pub(crate) parser: FrameParser,
    pub(crate) descriptor: DeviceDescriptor,
    pub(crate) path: String,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Wrap an opened port and start its reader thread.
    pub(crate) fn start(
        shared: &Arc<Shared>,
        generation: u64,
        port: Box<dyn Port>,
        writer: Box<dyn RequestWriter>,
        parser: FrameParser,
        descriptor: DeviceDescriptor,
    ) -> Result<Self> {
        let reader = port.try_clone_reader()?;
        let path = port.name().to_string();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let shared = Arc::clone(shared);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("focus-reader".to_string())
                .spawn(move || read_loop(&shared, reader, generation, &shutdown))?
        };

        Ok(Self {
            port: Arc::new(Mutex::new(port)),
            writer: Arc::from(writer),
            parser,
            descriptor,
            path,
            shutdown,
            reader: Some(handle),
        })
    }

    /// Stop the reader and close the port. Must be called without the session lock held.
    pub(crate) fn release(mut self) {
        self.shutdown
            .store(true, Ordering::Release);
        if let Err(e) = lock(&self.port).close() {
            debug!("Error closing {}: {e}", self.path);
        }
        if let Some(handle) = self.reader.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Reader thread for {} panicked", self.path);
            }
        }
    }
}

fn read_loop(
    shared: &Shared,
    mut reader: Box<dyn Read + Send>,
    generation: u64,
    shutdown: &AtomicBool,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while !shutdown.load(Ordering::Acquire) {
        let outcome = reader.read(&mut buf);
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut state = shared.lock();
        if state.generation != generation {
            break;
        }
        let Some(link) = state.link.as_mut() else {
            break;
        };

        let failure = match outcome {
            Ok(0) => {
                debug!("End of stream on {}", link.path);
                if let Some(frame) = link.parser.finish() {
                    state.dispatch(frame.into_reply());
                }
                Some(LinkFailure::Disconnected)
            },
            Ok(n) => {
                trace!("RX {n} bytes");
                let frames = link
                    .parser
                    .feed(&buf[..n], Instant::now());
                for frame in frames {
                    state.dispatch(frame.into_reply());
                }
                None
            },
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                let expired = link
                    .parser
                    .poll_timeout(Instant::now());
                if expired && !state.pending.is_empty() {
                    warn!("No response within the idle timeout");
                    Some(LinkFailure::Timeout)
                } else {
                    if expired {
                        debug!("Discarded stale partial response");
                    }
                    None
                }
            },
            Err(ref e) if e.kind() == ErrorKind::Interrupted => None,
            Err(e) => {
                warn!("Read error on {}: {e}", link.path);
                Some(LinkFailure::Disconnected)
            },
        };

        if let Some(failure) = failure {
            let link = state.detach(failure);
            drop(state);
            shared.turn.notify_all();
            if let Some(link) = link {
                link.release();
            }
            break;
        }
        drop(state);
        shared.turn.notify_all();
    }
    trace!("Reader thread exiting");
}
