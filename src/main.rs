use anyhow::Result;
use clap::Parser;

mod cli;
mod session;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);
    match args.cmd {
        cli::Cmd::Send(opts) => session::run_send(opts),
        cli::Cmd::Script(opts) => session::run_script(opts),
        cli::Cmd::Listen(opts) => session::run_listen(opts),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
