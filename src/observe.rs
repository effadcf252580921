use log::{debug, info, warn};

use crate::command::{Ack, Command};
use crate::error::LinkError;

/// Something that happened on a link.
#[derive(Debug)]
pub enum LinkEvent<'a> {
    Connected { port: &'a str, baud: u32 },
    Disconnected { port: &'a str },
    Sent(Command),
    Received(&'a Ack),
    Failed { op: &'static str, error: &'a LinkError },
}

/// Receives every [`LinkEvent`] a link produces. Injected into the link so
/// tests can assert on events without touching global log output.
pub trait LinkObserver {
    fn on_event(&self, event: &LinkEvent<'_>);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl LinkObserver for LogObserver {
    fn on_event(&self, event: &LinkEvent<'_>) {
        match event {
            LinkEvent::Connected { port, baud } => info!("[link] connected {port} @ {baud}"),
            LinkEvent::Disconnected { port } => info!("[link] disconnected {port}"),
            LinkEvent::Sent(cmd) => debug!("[link] -> {cmd}"),
            LinkEvent::Received(ack) => debug!("[link] <- {ack}"),
            LinkEvent::Failed { op, error } => warn!("[link] {op} failed: {error}"),
        }
    }
}
