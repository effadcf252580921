//! Host side of a serial command/acknowledgement link to a motor controller.
//!
//! The host writes 4-byte ASCII commands (`FW05`, `STOP`, ...) and the
//! controller answers each one with a short fixed-size token, `ACK` by
//! default, once the command has been carried out.

pub mod command;
pub mod error;
pub mod link;
pub mod observe;
pub mod stats;
pub mod transport;

pub use command::{Ack, Command};
pub use error::{CommandError, LinkError};
pub use link::{CloseHandle, Link, LinkConfig, LinkState};
pub use observe::{LinkEvent, LinkObserver, LogObserver};
pub use transport::ByteTransport;
