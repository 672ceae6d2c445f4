//! PollKV server
//!
//! Binds the listener, installs logging and hands control to the reactor.
//! Every request is answered with its own payload until a real command
//! layer is plugged in.

use pollkv::handler::Echo;
use pollkv::reactor::{Reactor, ReactorConfig};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Tunables passed to the reactor
    reactor: ReactorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: pollkv::DEFAULT_HOST.to_string(),
            port: pollkv::DEFAULT_PORT,
            reactor: ReactorConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = require_value(&arg, args.next());
                }
                "--port" | "-p" => {
                    let value = require_value(&arg, args.next());
                    config.port = value.parse().unwrap_or_else(|_| {
                        fail(&format!("invalid port number '{}'", value))
                    });
                }
                "--max-frame" => {
                    let value = require_value(&arg, args.next());
                    let max = parse_size(&value)
                        .unwrap_or_else(|| fail(&format!("invalid frame size '{}'", value)));
                    config.reactor = config.reactor.with_max_frame_len(max);
                }
                "--max-outgoing" => {
                    let value = require_value(&arg, args.next());
                    let limit = match value.as_str() {
                        "0" | "none" | "unlimited" => None,
                        _ => Some(parse_size(&value).unwrap_or_else(|| {
                            fail(&format!("invalid outgoing limit '{}'", value))
                        })),
                    };
                    config.reactor = config.reactor.with_max_outgoing(limit);
                }
                "--help" => {
                    print_help();
                    process::exit(0);
                }
                "--version" | "-v" => {
                    println!("PollKV version {}", pollkv::VERSION);
                    process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn require_value(flag: &str, value: Option<String>) -> String {
    value.unwrap_or_else(|| fail(&format!("{} requires a value", flag)))
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

/// Parses a byte count with an optional `k`/`m` suffix (binary units).
fn parse_size(value: &str) -> Option<usize> {
    let lower = value.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix('k') {
        (n, 1024)
    } else {
        (lower.as_str(), 1)
    };
    digits.parse::<usize>().ok()?.checked_mul(multiplier)
}

fn print_help() {
    println!(
        r#"
PollKV - Single-threaded event-loop server

USAGE:
    pollkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>            Port to listen on (default: 1234)
        --max-frame <SIZE>       Largest accepted frame payload (default: 32m)
        --max-outgoing <SIZE>    Pause decoding past this many queued response
                                 bytes, 'none' to disable (default: 4m)
    -v, --version                Print version information
        --help                   Print this help message

SIZES accept a k or m suffix, e.g. 64k or 32m.

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=pollkv=debug
"#
    );
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging, RUST_LOG wins over the default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        version = pollkv::VERSION,
        max_frame = config.reactor.max_frame_len,
        max_outgoing = ?config.reactor.max_outgoing,
        "Starting PollKV"
    );

    let mut reactor = Reactor::bind(config.bind_address(), Echo, config.reactor.clone())?;
    info!("Listening on {}", reactor.local_addr());

    if let Err(e) = reactor.run() {
        error!(error = %e, "Reactor failed");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
