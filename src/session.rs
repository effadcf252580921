use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::thread;
use std::time::{Duration, Instant};

use stm_link::transport::{SerialTransport, SimTransport};
use stm_link::{ByteTransport, Command, Link, LinkError};
use stm_link::stats::Stats;

use crate::cli::{LinkOpts, ListenOpts, SafetyOpts, ScriptOpts, SendOpts, SerialOpts};

type DynTransport = Box<dyn ByteTransport + Send>;

pub fn run_send(opts: SendOpts) -> Result<()> {
    let link = open_link(&opts.ser, &opts.link)?;
    let mut session = Session::new(link, &opts.link, &opts.safety);
    let res = session.run_all(&opts.commands);
    session.finish();
    res
}

pub fn run_script(opts: ScriptOpts) -> Result<()> {
    // parse everything up front so a typo on line 40 doesn't strand the robot mid-path
    let commands = match &opts.file {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            read_script(BufReader::new(f))?
        }
        None => read_script(io::stdin().lock())?,
    };
    info!("[script] {} commands", commands.len());

    let link = open_link(&opts.ser, &opts.link)?;
    let mut session = Session::new(link, &opts.link, &opts.safety);
    let res = session.run_all(&commands);
    session.finish();
    res
}

pub fn run_listen(opts: ListenOpts) -> Result<()> {
    if opts.ser.dry_run {
        bail!("--dry-run has no controller to listen to");
    }
    let mut link = open_link(&opts.ser, &opts.link)?;
    let mut stats = Stats::new();
    let res = listen(&mut link, &opts.link.ack, opts.count, &mut stats);
    eprintln!("[listen] {}", stats.summary());
    link.disconnect().context("closing link")?;
    res
}

fn open_link(ser: &SerialOpts, link_opts: &LinkOpts) -> Result<Link<DynTransport>> {
    let config = link_opts.to_config();
    let transport: DynTransport = if ser.dry_run {
        let mut reply = format!("{:<width$}", link_opts.ack, width = config.ack_len).into_bytes();
        reply.truncate(config.ack_len);
        Box::new(SimTransport::acking(&reply))
    } else {
        Box::new(SerialTransport::new(ser.rtscts))
    };
    let mut link = Link::with_config(transport, config);
    link.connect(&ser.dev, ser.baud)
        .with_context(|| format!("connecting to {}", ser.dev))?;
    Ok(link)
}

/// One command per line; blank lines and `#` comments are skipped.
pub fn read_script(reader: impl BufRead) -> Result<Vec<Command>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.context("reading script")?;
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let cmd = Command::new(s).with_context(|| format!("line {}", i + 1))?;
        out.push(cmd);
    }
    Ok(out)
}

/// Drives a link on behalf of an operator: one command at a time, STOP on
/// trouble unless told otherwise.
pub struct Session<T: ByteTransport> {
    link: Link<T>,
    ack: String,
    stop_on_error: bool,
    gap: Option<Duration>,
    stats: Stats,
}

impl<T: ByteTransport> Session<T> {
    pub fn new(link: Link<T>, link_opts: &LinkOpts, safety: &SafetyOpts) -> Self {
        Self {
            link,
            ack: link_opts.ack.clone(),
            stop_on_error: !safety.no_stop_on_error,
            gap: (safety.gap_ms > 0).then(|| Duration::from_millis(safety.gap_ms)),
            stats: Stats::new(),
        }
    }

    pub fn run_all(&mut self, commands: &[Command]) -> Result<()> {
        for &cmd in commands {
            if let Err(e) = self.run_one(cmd) {
                self.stats.inc_failed();
                if self.stop_on_error && cmd != Command::STOP {
                    self.emergency_stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_one(&mut self, cmd: Command) -> Result<()> {
        if !cmd.is_known() {
            warn!("[session] {cmd} is not a known controller command, sending anyway");
        }
        if let Some(gap) = self.gap {
            thread::sleep(gap);
        }

        let t0 = Instant::now();
        self.link.send(cmd).with_context(|| format!("sending {cmd}"))?;
        self.stats.inc_sent();
        let ack = self
            .link
            .recv()
            .with_context(|| format!("waiting for ACK to {cmd}"))?;

        if !ack.matches(&self.ack) {
            self.stats.inc_unexpected();
            return Err(anyhow!("{cmd}: expected {:?}, got {:?}", self.ack, ack.as_str()));
        }
        self.stats.add_ack(t0.elapsed());
        println!("{cmd} {ack}");
        Ok(())
    }

    /// Best effort: the controller may be moving with no way to tell.
    fn emergency_stop(&mut self) {
        if !self.link.is_connected() {
            error!("[session] link is down, cannot send STOP");
            return;
        }
        warn!("[session] exchange failed, sending STOP");
        match self.link.exchange(Command::STOP) {
            Ok(ack) => warn!("[session] STOP answered with {ack}"),
            Err(e) => error!("[session] STOP failed: {e}"),
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn finish(mut self) {
        eprintln!("[session] {}", self.stats.summary());
        if let Err(e) = self.link.disconnect() {
            error!("[session] {e}");
        }
    }
}

fn listen<T: ByteTransport>(
    link: &mut Link<T>,
    token: &str,
    count: Option<u64>,
    stats: &mut Stats,
) -> Result<()> {
    let mut seen = 0u64;
    while count.is_none_or(|max| seen < max) {
        match link.recv() {
            Ok(ack) if ack.matches(token) => {
                stats.add_ack(Duration::ZERO);
                println!("{ack}");
            }
            Ok(other) => {
                stats.inc_unexpected();
                warn!("[listen] ignored unknown message from controller: {other}");
            }
            Err(LinkError::Timeout { .. }) => continue,
            Err(e) => return Err(e).context("listening"),
        }
        seen += 1;
    }
    Ok(())
}
