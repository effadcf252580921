use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use stm_link::Command;
use stm_link::command::DEFAULT_ACK;
use stm_link::link::{DEFAULT_ACK_LEN, LinkConfig};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "stm-link",
    about = "Send motion commands to the motor controller over UART and wait for each ACK"
)]
pub struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Send the given commands in order, one ACK each
    Send(SendOpts),
    /// Send commands read from a file (or stdin), one per line
    Script(ScriptOpts),
    /// Print whatever the controller sends
    Listen(ListenOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
    /// Talk to a simulated controller that acknowledges everything
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LinkOpts {
    /// Acknowledgement timeout in milliseconds (0 = wait forever)
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,
    /// Bytes per acknowledgement frame
    #[arg(long, default_value_t = DEFAULT_ACK_LEN)]
    pub ack_len: usize,
    /// Token the controller sends on success
    #[arg(long, default_value = DEFAULT_ACK)]
    pub ack: String,
    /// Allow a send before the previous ACK arrived
    #[arg(long, default_value_t = false)]
    pub allow_pipelining: bool,
}

impl LinkOpts {
    pub fn to_config(&self) -> LinkConfig {
        LinkConfig {
            ack_len: self.ack_len,
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            single_in_flight: !self.allow_pipelining,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SafetyOpts {
    /// Don't send STOP after a failed exchange
    #[arg(long, default_value_t = false)]
    pub no_stop_on_error: bool,
    /// Pause before each command, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub gap_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    #[command(flatten)]
    pub safety: SafetyOpts,
    /// Commands, e.g. FW05 TL-- STOP
    #[arg(required = true)]
    pub commands: Vec<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct ScriptOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    #[command(flatten)]
    pub safety: SafetyOpts,
    /// Command file; blank lines and lines starting with '#' are skipped. Reads stdin if omitted
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListenOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub link: LinkOpts,
    /// Stop after this many messages
    #[arg(long)]
    pub count: Option<u64>,
}
