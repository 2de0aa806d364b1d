//! `covctx`: inspect and consume coverage context channels from the shell

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use covctx_core::channel::codec::Message;
use covctx_core::channel::SocketSubscriber;
use covctx_core::env;
use covctx_core::{ChannelError, ContextReader};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

mod logging;
mod site;

const CONNECT_RETRY: Duration = Duration::from_millis(50);

fn cli() -> Command {
    Command::new("covctx")
        .version(covctx_core::VERSION)
        .about("Coverage context propagation helpers")
        .arg(
            Arg::new("coverage")
                .long("coverage")
                .action(ArgAction::SetTrue)
                .help("Print the directory to prepend to the module search path of coverage-measured subprocesses"),
        )
        .subcommand(
            Command::new("current")
                .about("Print the context label visible to this process")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Print every label a socket publisher sends until it stops")
                .arg(
                    Arg::new("address")
                        .long("address")
                        .value_parser(parse_address)
                        .help("Publisher address; defaults to the inherited environment"),
                )
                .arg(
                    Arg::new("connect-timeout-ms")
                        .long("connect-timeout-ms")
                        .default_value("5000")
                        .value_parser(value_parser!(u64))
                        .help("How long to retry connecting to the publisher"),
                ),
        )
}

fn parse_address(raw: &str) -> Result<SocketAddr, String> {
    env::parse_address(raw).map_err(|e| e.to_string())
}

fn main() {
    logging::init();
    let matches = cli().get_matches();

    if matches.get_flag("coverage") {
        match site::install() {
            Ok(dir) => {
                println!("{}", dir.display());
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("covctx: {e:#}");
                std::process::exit(1);
            }
        }
    }

    let result = match matches.subcommand() {
        Some(("current", args)) => current(args.get_flag("json")),
        Some(("watch", args)) => watch(args),
        _ => {
            eprintln!("{}", cli().render_help());
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("covctx: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug, Serialize)]
struct CurrentReport {
    label: Option<String>,
    channel: String,
}

/// Describe where a reader started from the environment gets its label
fn channel_description() -> String {
    match (env::file_path(), env::address()) {
        (Some(path), _) => format!("file://{}", path.display()),
        (None, Some(addr)) => format!("tcp://{addr}"),
        (None, None) => "environment".to_string(),
    }
}

fn current(json: bool) -> anyhow::Result<()> {
    let reader = ContextReader::from_env();
    let label = reader.dynamic_context();

    let mut stdout = std::io::stdout().lock();
    if json {
        let report = CurrentReport {
            label,
            channel: channel_description(),
        };
        let text = serde_json::to_string_pretty(&report).context("encoding report")?;
        writeln!(stdout, "{text}")?;
    } else {
        writeln!(stdout, "{}", label.unwrap_or_default())?;
    }
    stdout.flush()?;
    Ok(())
}

fn connect(address: SocketAddr, timeout: Duration) -> anyhow::Result<SocketSubscriber> {
    let deadline = Instant::now() + timeout;
    loop {
        match SocketSubscriber::connect(address) {
            Ok(subscriber) => return Ok(subscriber),
            Err(e) if Instant::now() >= deadline => {
                return Err(e).with_context(|| format!("no publisher at {address}"));
            }
            Err(e) => {
                tracing::debug!("Publisher at {} not reachable yet: {}", address, e);
                std::thread::sleep(CONNECT_RETRY);
            }
        }
    }
}

fn watch(args: &ArgMatches) -> anyhow::Result<()> {
    let Some(address) = args.get_one::<SocketAddr>("address").copied().or_else(env::address) else {
        bail!("no publisher address; pass --address or set {}", env::ADDRESS_VAR);
    };
    let timeout = Duration::from_millis(args.get_one::<u64>("connect-timeout-ms").copied().unwrap_or(5000));

    let mut subscriber = connect(address, timeout)?;
    subscriber.set_timeout(None)?;
    tracing::info!("Watching context publisher at {}", address);

    let mut stdout = std::io::stdout().lock();
    loop {
        match subscriber.recv() {
            Ok(Some(Message::Set(label))) => writeln!(stdout, "{}", label.as_str().unwrap_or_default())?,
            Ok(Some(Message::Clear)) => writeln!(stdout)?,
            Ok(Some(Message::Stop)) | Err(ChannelError::Closed) => break,
            Ok(None) => {}
            Err(e) => return Err(e).context("receiving context"),
        }
        stdout.flush()?;
    }
    stdout.flush()?;
    Ok(())
}
