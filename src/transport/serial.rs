use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{ByteTransport, not_open};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 8N1 UART, optionally with RTS/CTS. Reads block at most [`POLL_INTERVAL`],
/// which bounds how quickly a pending receive notices a close request.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    rtscts: bool,
}

impl SerialTransport {
    pub fn new(rtscts: bool) -> Self {
        Self {
            port: None,
            rtscts,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(not_open)
    }
}

impl ByteTransport for SerialTransport {
    fn open(&mut self, dev: &str, baud: u32) -> io::Result<()> {
        let builder = serialport::new(dev, baud)
            .timeout(POLL_INTERVAL)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(if self.rtscts {
                FlowControl::Hardware
            } else {
                FlowControl::None
            });

        let port = builder.open()?;
        // stale bytes from a previous session would be taken for an ack
        port.clear(ClearBuffer::Input)?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        // dropping the handle releases the device
        match self.port.take() {
            Some(mut port) => port.flush(),
            None => Ok(()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let port = self.port()?;
        let n = port.write(bytes)?;
        port.flush()?;
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }
}
