//! Scripted in-memory transport for deterministic protocol tests.
//!
//! A [`MockDevice`] plays the part of the keyboard. Tests either push raw
//! bytes into its receive queue or install a responder that answers each
//! complete request line. Everything the host writes is recorded.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialConfig, Transport};

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    ports: Vec<PortInfo>,
    incoming: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    line: Vec<u8>,
    responder: Option<Responder>,
    disconnected: bool,
    end_of_stream: bool,
    fail_writes: bool,
    opened: usize,
    drains: usize,
}

#[derive(Default)]
struct MockInner {
    state: Mutex<MockState>,
    cond: Condvar,
}

/// Handle to the simulated keyboard, shared by the test and the transport.
#[derive(Clone, Default)]
pub(crate) struct MockDevice {
    inner: Arc<MockInner>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Transport whose `open` hands out ports wired to this device.
    pub(crate) fn transport(&self) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            device: self.clone(),
        })
    }

    /// Ports reported by `list_ports`.
    pub(crate) fn set_ports(&self, ports: Vec<PortInfo>) {
        self.lock().ports = ports;
    }

    /// Answer every complete request line with the returned bytes.
    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Queue bytes for the host to read.
    pub(crate) fn push_incoming(&self, data: &[u8]) {
        self.lock()
            .incoming
            .extend(data.iter().copied());
        self.inner.cond.notify_all();
    }

    /// Simulate the cable being pulled.
    pub(crate) fn disconnect(&self) {
        self.lock().disconnected = true;
        self.inner.cond.notify_all();
    }

    /// Report end of stream once the queued bytes have been read.
    pub(crate) fn end_of_stream(&self) {
        self.lock().end_of_stream = true;
        self.inner.cond.notify_all();
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every individual `write` call, in order.
    pub(crate) fn write_calls(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All written bytes, split into request lines.
    pub(crate) fn written_lines(&self) -> Vec<String> {
        let bytes: Vec<u8> = self
            .lock()
            .writes
            .concat();
        String::from_utf8_lossy(&bytes)
            .split_terminator('\n')
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.lock().opened
    }

    pub(crate) fn drain_count(&self) -> usize {
        self.lock().drains
    }
}

/// Transport handing out [`MockPort`]s.
pub(crate) struct MockTransport {
    device: MockDevice,
}

impl Transport for MockTransport {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.device.lock().ports.clone())
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        {
            let mut state = self.device.lock();
            state.opened += 1;
            state.disconnected = false;
            state.end_of_stream = false;
            state.incoming.clear();
            state.line.clear();
        }
        Ok(Box::new(MockPort {
            device: self.device.clone(),
            name: config.port_name.clone(),
            timeout: config.timeout,
            closed: false,
        }))
    }
}

pub(crate) struct MockPort {
    device: MockDevice,
    name: String,
    timeout: Duration,
    closed: bool,
}

struct MockReader {
    device: MockDevice,
    timeout: Duration,
}

fn read_incoming(device: &MockDevice, timeout: Duration, buf: &mut [u8]) -> io::Result<usize> {
    let mut state = device.lock();
    loop {
        if !state.incoming.is_empty() {
            let n = buf.len().min(state.incoming.len());
            for (slot, byte) in buf
                .iter_mut()
                .zip(state.incoming.drain(..n))
            {
                *slot = byte;
            }
            return Ok(n);
        }
        if state.end_of_stream {
            return Ok(0);
        }
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        let (guard, waited) = device
            .inner
            .cond
            .wait_timeout(state, timeout)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state = guard;
        if waited.timed_out()
            && state.incoming.is_empty()
            && !state.disconnected
            && !state.end_of_stream
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
    }
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_incoming(&self.device, self.timeout, buf)
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_incoming(&self.device, self.timeout, buf)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        let mut state = self.device.lock();
        if state.fail_writes || state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        state.writes.push(buf.to_vec());
        state.line.extend_from_slice(buf);

        while let Some(pos) = state
            .line
            .iter()
            .position(|&b| b == b'\n')
        {
            let line: Vec<u8> = state.line.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            let reply = state
                .responder
                .as_mut()
                .and_then(|respond| respond(&text));
            if let Some(reply) = reply {
                state.incoming.extend(reply);
            }
        }
        drop(state);
        self.device.inner.cond.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.device.lock().drains += 1;
        Ok(())
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        Ok(Box::new(MockReader {
            device: self.device.clone(),
            timeout: self.timeout,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
