use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::command::{Ack, Command};
use crate::error::LinkError;
use crate::observe::{LinkEvent, LinkObserver, LogObserver};
use crate::transport::{ByteTransport, is_idle};

pub const DEFAULT_ACK_LEN: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Protocol policy for a [`Link`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Bytes read per acknowledgement, before trimming.
    pub ack_len: usize,
    /// How long `recv` waits. `None` waits until data or a close request.
    pub timeout: Option<Duration>,
    /// Reject a `send` while the previous command is unacknowledged.
    pub single_in_flight: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_len: DEFAULT_ACK_LEN,
            timeout: Some(DEFAULT_TIMEOUT),
            single_in_flight: true,
        }
    }
}

/// Requests that a link shut down, from any thread.
///
/// A `recv` blocked on the link notices within one transport poll interval,
/// closes the transport and fails with [`LinkError::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Command/acknowledgement exchange over an exclusively owned transport.
///
/// Not internally synchronized. Callers with several producers serialize
/// access to one link themselves.
pub struct Link<T: ByteTransport> {
    transport: T,
    config: LinkConfig,
    state: LinkState,
    port: Option<String>,
    in_flight: Option<Command>,
    /// Bytes of an acknowledgement that was cut short by a timeout.
    partial: Vec<u8>,
    closing: Arc<AtomicBool>,
    observer: Box<dyn LinkObserver + Send>,
}

impl<T: ByteTransport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LinkConfig::default())
    }

    pub fn with_config(transport: T, mut config: LinkConfig) -> Self {
        config.ack_len = config.ack_len.max(1);
        Self {
            transport,
            config,
            state: LinkState::Disconnected,
            port: None,
            in_flight: None,
            partial: Vec::new(),
            closing: Arc::new(AtomicBool::new(false)),
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_observer(mut self, observer: impl LinkObserver + Send + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// The command sent but not yet answered, if any.
    pub fn pending(&self) -> Option<Command> {
        self.in_flight
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(Arc::clone(&self.closing))
    }

    pub fn connect(&mut self, port: &str, baud: u32) -> Result<(), LinkError> {
        if self.is_connected() {
            self.disconnect()?;
        }
        self.closing.store(false, Ordering::SeqCst);

        if let Err(source) = self.transport.open(port, baud) {
            let err = LinkError::Connection {
                port: port.to_string(),
                baud,
                source,
            };
            return Err(self.failed("connect", err));
        }
        self.state = LinkState::Connected;
        self.port = Some(port.to_string());
        self.in_flight = None;
        self.partial.clear();
        self.observer.on_event(&LinkEvent::Connected { port, baud });
        Ok(())
    }

    /// Closes the transport. Calling this while disconnected is a no-op.
    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.state = LinkState::Disconnected;
        self.in_flight = None;
        self.partial.clear();
        let closed = self.transport.close();
        let port = self.port.take().unwrap_or_default();
        self.observer.on_event(&LinkEvent::Disconnected { port: &port });
        closed.map_err(|e| self.failed("disconnect", LinkError::transport("close", e)))
    }

    pub fn send(&mut self, command: Command) -> Result<(), LinkError> {
        if let Err(e) = self.ensure_connected() {
            return Err(self.failed("send", e));
        }
        if self.config.single_in_flight
            && let Some(pending) = self.in_flight
        {
            let err = LinkError::ProtocolViolation {
                pending,
                attempted: command,
            };
            return Err(self.failed("send", err));
        }

        let bytes = command.as_bytes();
        match self.transport.write(bytes) {
            Ok(n) if n == bytes.len() => {}
            Ok(n) => return Err(self.failed("send", LinkError::short_write(n, bytes.len()))),
            Err(e) => return Err(self.failed("send", LinkError::transport("write", e))),
        }
        self.in_flight = Some(command);
        self.observer.on_event(&LinkEvent::Sent(command));
        Ok(())
    }

    /// Waits up to the configured timeout for one acknowledgement.
    pub fn recv(&mut self) -> Result<Ack, LinkError> {
        self.recv_timeout(self.config.timeout)
    }

    /// Like [`Link::recv`] with a one-off timeout.
    ///
    /// Whatever the outcome, the outstanding command is considered settled:
    /// after a timeout the link stays connected and accepts a new `send`.
    /// Bytes already read when the deadline passed are kept, and the next
    /// `recv` completes that frame before starting a new one.
    ///
    /// At least one read is attempted even with a zero timeout.
    pub fn recv_timeout(&mut self, timeout: Option<Duration>) -> Result<Ack, LinkError> {
        if let Err(e) = self.ensure_connected() {
            return Err(self.failed("recv", e));
        }
        let read = self.read_ack(timeout);
        self.in_flight = None;

        match read {
            Ok(ack) => {
                self.observer.on_event(&LinkEvent::Received(&ack));
                Ok(ack)
            }
            Err(LinkError::ConnectionClosed) => {
                self.closing.store(false, Ordering::SeqCst);
                self.shutdown();
                Err(self.failed("recv", LinkError::ConnectionClosed))
            }
            Err(e) => Err(self.failed("recv", e)),
        }
    }

    /// `send` followed by `recv`.
    pub fn exchange(&mut self, command: Command) -> Result<Ack, LinkError> {
        self.send(command)?;
        self.recv()
    }

    fn read_ack(&mut self, timeout: Option<Duration>) -> Result<Ack, LinkError> {
        let expected = self.config.ack_len;
        let mut buf = vec![0u8; expected];
        let mut filled = self.partial.len().min(expected);
        buf[..filled].copy_from_slice(&self.partial[..filled]);
        self.partial.clear();
        let started = Instant::now();

        while filled < expected {
            if self.closing.load(Ordering::SeqCst) {
                return Err(LinkError::ConnectionClosed);
            }
            match self.transport.read(&mut buf[filled..]) {
                Ok(0) => {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended");
                    return Err(LinkError::transport("read", eof));
                }
                Ok(n) => filled += n,
                Err(e) if is_idle(&e) => {}
                Err(e) => return Err(LinkError::transport("read", e)),
            }
            if filled < expected
                && let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                self.partial.extend_from_slice(&buf[..filled]);
                return Err(LinkError::Timeout {
                    waited: started.elapsed(),
                    received: filled,
                    expected,
                });
            }
        }
        Ack::decode(&buf)
    }

    fn ensure_connected(&mut self) -> Result<(), LinkError> {
        if self.closing.swap(false, Ordering::SeqCst) {
            self.shutdown();
        }
        match self.state {
            LinkState::Connected => Ok(()),
            LinkState::Disconnected => Err(LinkError::NotConnected),
        }
    }

    /// Disconnect on behalf of a close request; a failing close is reported
    /// to the observer since the caller only learns that the link is gone.
    fn shutdown(&mut self) {
        if let Err(e) = self.disconnect() {
            self.observer.on_event(&LinkEvent::Failed {
                op: "close",
                error: &e,
            });
        }
    }

    fn failed(&self, op: &'static str, error: LinkError) -> LinkError {
        self.observer.on_event(&LinkEvent::Failed { op, error: &error });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimHandle, SimTransport};
    use std::sync::Mutex;
    use std::thread;
    use test_log::test;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl LinkObserver for Recorder {
        fn on_event(&self, event: &LinkEvent<'_>) {
            let line = match event {
                LinkEvent::Connected { port, baud } => format!("connected {port} {baud}"),
                LinkEvent::Disconnected { port } => format!("disconnected {port}"),
                LinkEvent::Sent(cmd) => format!("sent {cmd}"),
                LinkEvent::Received(ack) => format!("received {ack}"),
                LinkEvent::Failed { op, .. } => format!("failed {op}"),
            };
            self.0.lock().unwrap().push(line);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn cmd(s: &str) -> Command {
        Command::new(s).unwrap()
    }

    fn quick() -> LinkConfig {
        LinkConfig {
            timeout: Some(Duration::from_millis(50)),
            ..LinkConfig::default()
        }
    }

    fn acking_link() -> (Link<SimTransport>, SimHandle) {
        let sim = SimTransport::acking(b"ACK");
        let h = sim.handle();
        (Link::with_config(sim, quick()), h)
    }

    #[test]
    fn forward_five_round_trip() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        assert_eq!(h.opened_with(), Some(("/dev/ttyUSB0".to_string(), 115_200)));

        link.send(cmd("FW05")).unwrap();
        assert_eq!(h.written(), vec![b'F', b'W', b'0', b'5']);
        assert_eq!(link.recv().unwrap(), "ACK");
    }

    #[test]
    fn one_ack_per_command() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        let codes = [
            "FW05", "BW10", "FL00", "FR00", "BL00", "BR00", "FW--", "BW--", "TL--", "TR--",
            "STOP",
        ];
        for code in codes {
            let ack = link.exchange(cmd(code)).unwrap();
            assert_eq!(ack, "ACK");
            assert_eq!(h.take_written(), code.as_bytes());
        }
        // nothing left over for a phantom extra ack
        assert!(matches!(
            link.recv(),
            Err(LinkError::Timeout { received: 0, .. })
        ));
    }

    #[test]
    fn recv_before_connect() {
        let sim = SimTransport::acking(b"ACK");
        let h = sim.handle();
        let mut link = Link::new(sim);
        let started = Instant::now();
        assert!(matches!(link.recv(), Err(LinkError::NotConnected)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(h.read_calls(), 0);
    }

    #[test]
    fn second_send_is_a_protocol_violation() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();
        match link.send(cmd("STOP")) {
            Err(LinkError::ProtocolViolation { pending, attempted }) => {
                assert_eq!(pending, cmd("FW05"));
                assert_eq!(attempted, Command::STOP);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.write_calls(), 1);
        assert_eq!(link.pending(), Some(cmd("FW05")));

        assert_eq!(link.recv().unwrap(), "ACK");
        assert!(link.send(Command::STOP).is_ok());
    }

    #[test]
    fn pipelining_allowed_when_policy_off() {
        let sim = SimTransport::acking(b"ACK");
        let config = LinkConfig {
            single_in_flight: false,
            ..quick()
        };
        let mut link = Link::with_config(sim, config);
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();
        link.send(cmd("BW05")).unwrap();
        assert_eq!(link.recv().unwrap(), "ACK");
        assert_eq!(link.recv().unwrap(), "ACK");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (mut link, h) = acking_link();
        assert!(link.disconnect().is_ok());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        assert!(link.disconnect().is_ok());
        assert!(link.disconnect().is_ok());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!h.is_open());
    }

    #[test]
    fn timeout_leaves_link_usable() {
        let sim = SimTransport::new();
        let h = sim.handle();
        let mut link = Link::with_config(sim, quick());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();

        assert!(matches!(
            link.recv(),
            Err(LinkError::Timeout { expected: 3, .. })
        ));
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.pending(), None);

        h.push_inbound(b"ACK");
        assert_eq!(link.recv().unwrap(), "ACK");
        link.send(Command::STOP).unwrap();
        assert_eq!(h.written(), b"FW05STOP");
    }

    #[test]
    fn partial_ack_times_out() {
        let sim = SimTransport::acking(b"AC");
        let mut link = Link::with_config(sim, quick());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();
        assert!(matches!(
            link.recv(),
            Err(LinkError::Timeout { received: 2, expected: 3, .. })
        ));
    }

    #[test]
    fn late_tail_completes_timed_out_ack() {
        let sim = SimTransport::new();
        let h = sim.handle();
        let mut link = Link::with_config(sim, quick());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();
        h.push_inbound(b"AC");
        assert!(matches!(
            link.recv(),
            Err(LinkError::Timeout { received: 2, expected: 3, .. })
        ));

        h.push_inbound(b"K");
        assert_eq!(link.recv().unwrap(), "ACK");

        // framing is back in step for the following exchanges
        h.set_auto_reply(Some(&b"ACK"[..]));
        assert_eq!(link.exchange(cmd("BW05")).unwrap(), "ACK");
        assert_eq!(link.exchange(Command::STOP).unwrap(), "ACK");
    }

    #[test]
    fn reconnect_drops_partial_ack() {
        let sim = SimTransport::new();
        let h = sim.handle();
        let mut link = Link::with_config(sim, quick());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        h.push_inbound(b"AC");
        assert!(link.recv().is_err());
        link.disconnect().unwrap();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        h.push_inbound(b"NAK");
        assert_eq!(link.recv().unwrap(), "NAK");
    }

    #[test]
    fn zero_timeout_still_reads_waiting_ack() {
        let (mut link, _h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(Command::STOP).unwrap();
        assert_eq!(link.recv_timeout(Some(Duration::ZERO)).unwrap(), "ACK");
    }

    struct EndedStream;

    impl ByteTransport for EndedStream {
        fn open(&mut self, _port: &str, _baud: u32) -> io::Result<()> {
            Ok(())
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            Ok(bytes.len())
        }
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn end_of_stream_fails_instead_of_spinning() {
        let config = LinkConfig {
            timeout: None,
            ..LinkConfig::default()
        };
        let mut link = Link::with_config(EndedStream, config);
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(Command::STOP).unwrap();
        match link.recv() {
            Err(LinkError::Transport { op: "read", source }) => {
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ack_is_trimmed_and_split_reads_join() {
        let sim = SimTransport::new();
        let h = sim.handle();
        let config = LinkConfig {
            ack_len: 5,
            ..quick()
        };
        let mut link = Link::with_config(sim, config);
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("STOP")).unwrap();
        h.push_inbound(b"\nA");
        h.push_inbound(b"CK\r");
        assert_eq!(link.recv().unwrap(), "ACK");
    }

    #[test]
    fn missing_device_then_send() {
        let sim = SimTransport::acking(b"ACK").with_devices(["/dev/ttyUSB0"]);
        let h = sim.handle();
        let mut link = Link::new(sim);
        match link.connect("/dev/ttyUSB7", 115_200) {
            Err(LinkError::Connection { port, source, .. }) => {
                assert_eq!(port, "/dev/ttyUSB7");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(link.send(cmd("FW05")), Err(LinkError::NotConnected)));
        assert_eq!(h.write_calls(), 0);
    }

    #[test]
    fn short_write_is_a_transport_error() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        h.set_short_write(true);
        assert!(matches!(
            link.send(cmd("FW05")),
            Err(LinkError::Transport { op: "write", .. })
        ));
        assert_eq!(link.pending(), None);
    }

    #[test]
    fn write_failure_is_a_transport_error() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        h.set_write_error(Some(io::ErrorKind::BrokenPipe));
        match link.send(cmd("FW05")) {
            Err(LinkError::Transport { op: "write", source }) => {
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(link.pending(), None);
        assert!(h.written().is_empty());
    }

    #[test]
    fn read_failure_is_a_transport_error() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        h.set_auto_reply(None);
        link.send(cmd("FW05")).unwrap();
        h.set_read_error(Some(io::ErrorKind::BrokenPipe));
        assert!(matches!(
            link.recv(),
            Err(LinkError::Transport { op: "read", .. })
        ));
        assert!(link.is_connected());
    }

    #[test]
    fn garbage_ack_is_a_decode_error() {
        let sim = SimTransport::acking(&[0xC3, 0x28, 0xFF]);
        let mut link = Link::with_config(sim, quick());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        assert!(matches!(
            link.exchange(cmd("FW05")),
            Err(LinkError::Decode { .. })
        ));
    }

    #[test]
    fn close_handle_unblocks_recv() {
        let sim = SimTransport::new();
        let h = sim.handle();
        let config = LinkConfig {
            timeout: None,
            ..LinkConfig::default()
        };
        let mut link = Link::with_config(sim, config);
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW--")).unwrap();

        let closer = link.close_handle();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            closer.close();
        });
        assert!(matches!(link.recv(), Err(LinkError::ConnectionClosed)));
        t.join().unwrap();

        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!h.is_open());
        assert!(matches!(link.send(Command::STOP), Err(LinkError::NotConnected)));
    }

    #[test]
    fn close_request_honoured_on_next_call() {
        let (mut link, _h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.close_handle().close();
        assert!(matches!(link.send(cmd("FW05")), Err(LinkError::NotConnected)));

        // reconnecting clears the request
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        assert_eq!(link.exchange(cmd("FW05")).unwrap(), "ACK");
    }

    #[test]
    fn reconnect_reopens() {
        let (mut link, h) = acking_link();
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.send(cmd("FW05")).unwrap();
        link.connect("/dev/ttyACM0", 9600).unwrap();
        assert_eq!(h.opened_with(), Some(("/dev/ttyACM0".to_string(), 9600)));
        assert_eq!(link.pending(), None);
    }

    #[test]
    fn observer_sees_lifecycle() {
        let rec = Recorder::default();
        let sim = SimTransport::acking(b"ACK");
        let mut link = Link::with_config(sim, quick()).with_observer(rec.clone());
        link.connect("/dev/ttyUSB0", 115_200).unwrap();
        link.exchange(cmd("FW05")).unwrap();
        let _ = link.recv();
        link.disconnect().unwrap();
        link.disconnect().unwrap();
        assert_eq!(
            rec.events(),
            [
                "connected /dev/ttyUSB0 115200",
                "sent FW05",
                "received ACK",
                "failed recv",
                "disconnected /dev/ttyUSB0",
            ]
        );
    }
}
