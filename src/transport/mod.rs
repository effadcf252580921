use std::io;

pub mod serial;
pub mod sim;

pub use serial::SerialTransport;
pub use sim::{SimHandle, SimTransport};

/// A byte stream the link can run its protocol over.
///
/// `read` must not block longer than one short poll interval. When nothing
/// arrived it waits out that interval and returns an error of kind
/// `TimedOut` or `WouldBlock`; the link decides when to give up. `Ok(0)`
/// means the stream has ended and fails the pending receive.
pub trait ByteTransport {
    fn open(&mut self, port: &str, baud: u32) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn open(&mut self, port: &str, baud: u32) -> io::Result<()> {
        (**self).open(port, baud)
    }
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}

pub(crate) fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not open")
}

/// Errors a `read` may return when no data arrived within its poll window.
pub(crate) fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
