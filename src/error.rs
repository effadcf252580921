use std::{io, time::Duration};

use thiserror::Error;

use crate::command::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command must be exactly {expected} bytes, got {got}: {text:?}")]
    BadLength {
        expected: usize,
        got: usize,
        text: String,
    },
    #[error("command contains non-ASCII characters: {0:?}")]
    NotAscii(String),
}

/// Everything that can go wrong on a [`crate::link::Link`].
///
/// Any failure on `send`/`recv` leaves the remote device in an unknown
/// state; the link never retries on its own.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open {port} at {baud} baud: {source}")]
    Connection {
        port: String,
        baud: u32,
        #[source]
        source: io::Error,
    },
    #[error("link is not connected")]
    NotConnected,
    #[error("transport failure during {op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("no acknowledgement after {waited:?} ({received} of {expected} bytes)")]
    Timeout {
        waited: Duration,
        received: usize,
        expected: usize,
    },
    #[error("acknowledgement is not valid text: {bytes:02X?}")]
    Decode { bytes: Vec<u8> },
    #[error("cannot send {attempted}: still waiting on acknowledgement for {pending}")]
    ProtocolViolation { pending: Command, attempted: Command },
    #[error("link closed while waiting for acknowledgement")]
    ConnectionClosed,
}

impl LinkError {
    pub(crate) fn transport(op: &'static str, source: io::Error) -> Self {
        LinkError::Transport { op, source }
    }

    pub(crate) fn short_write(written: usize, expected: usize) -> Self {
        LinkError::Transport {
            op: "write",
            source: io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {expected} bytes"),
            ),
        }
    }
}
