//! In-memory stand-in for the microcontroller end of the wire.
//!
//! Used by the tests and by `--dry-run`. A [`SimHandle`] shares state with
//! the transport so the other side can inspect writes and inject replies
//! while the link owns the transport.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{ByteTransport, not_open};

#[derive(Debug, Default)]
struct SimState {
    open: bool,
    opened_with: Option<(String, u32)>,
    devices: Option<Vec<String>>,
    written: Vec<u8>,
    inbound: VecDeque<u8>,
    auto_reply: Option<Vec<u8>>,
    short_write: bool,
    write_error: Option<io::ErrorKind>,
    read_error: Option<io::ErrorKind>,
    writes: usize,
    reads: usize,
}

#[derive(Debug, Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
    poll: Duration,
}

#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            poll: Duration::from_millis(5),
        }
    }

    /// A device that answers every write with `reply`.
    pub fn acking(reply: &[u8]) -> Self {
        let sim = Self::new();
        sim.handle().set_auto_reply(Some(reply));
        sim
    }

    /// Restrict `open` to these paths; anything else fails with `NotFound`.
    pub fn with_devices<I, S>(self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // a panicking test thread must not wedge the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ByteTransport for SimTransport {
    fn open(&mut self, port: &str, baud: u32) -> io::Result<()> {
        let mut st = lock(&self.state);
        if let Some(devices) = &st.devices
            && !devices.iter().any(|d| d == port)
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {port}"),
            ));
        }
        st.open = true;
        st.opened_with = Some((port.to_string(), baud));
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        lock(&self.state).open = false;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut st = lock(&self.state);
        if !st.open {
            return Err(not_open());
        }
        st.writes += 1;
        if let Some(kind) = st.write_error {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        let n = if st.short_write {
            bytes.len().saturating_sub(1)
        } else {
            bytes.len()
        };
        st.written.extend_from_slice(&bytes[..n]);
        if let Some(reply) = st.auto_reply.clone() {
            st.inbound.extend(reply);
        }
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut st = lock(&self.state);
            if !st.open {
                return Err(not_open());
            }
            st.reads += 1;
            if let Some(kind) = st.read_error {
                return Err(io::Error::new(kind, "injected read failure"));
            }
            if !st.inbound.is_empty() {
                let n = buf.len().min(st.inbound.len());
                for (slot, b) in buf.iter_mut().zip(st.inbound.drain(..n)) {
                    *slot = b;
                }
                return Ok(n);
            }
        }
        thread::sleep(self.poll);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}

impl SimHandle {
    /// Queue bytes as if the device had sent them.
    pub fn push_inbound(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    pub fn set_auto_reply(&self, reply: Option<&[u8]>) {
        lock(&self.state).auto_reply = reply.map(<[u8]>::to_vec);
    }

    pub fn set_short_write(&self, on: bool) {
        lock(&self.state).short_write = on;
    }

    pub fn set_write_error(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).write_error = kind;
    }

    pub fn set_read_error(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).read_error = kind;
    }

    /// Everything written so far, in order.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.state).written)
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn opened_with(&self) -> Option<(String, u32)> {
        lock(&self.state).opened_with.clone()
    }

    pub fn write_calls(&self) -> usize {
        lock(&self.state).writes
    }

    pub fn read_calls(&self) -> usize {
        lock(&self.state).reads
    }
}
