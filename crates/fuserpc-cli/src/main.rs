#![deny(unsafe_code)]

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{mount, serve};

/// Mount a remote raw FUSE filesystem, or serve a local one over RPC
#[derive(Parser, Debug)]
#[command(name = "fuserpc")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Serve a directory on the default port
    fuserpc serve /srv/data

    # Mount it elsewhere
    fuserpc mount /mnt/data server.example:7420
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG and -v
    #[arg(long, value_name = "LEVEL", env = "FUSERPC_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount a remote filesystem
    Mount(mount::Args),

    /// Serve a local directory
    Serve(serve::Args),
}

impl Cli {
    fn debug(&self) -> bool {
        match &self.command {
            Commands::Mount(args) => args.debug,
            Commands::Serve(args) => args.debug,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = std::env::var("RUST_LOG").ok();
    setup_tracing(&filter_directive(
        cli.log_level.as_deref(),
        env.as_deref(),
        cli.verbose,
        cli.debug(),
    ));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Mount(args) => mount::execute(&args),
        Commands::Serve(args) => serve::execute(&args),
    }
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Picks the filter directive: `--debug`, then `--log-level`, then
/// `RUST_LOG`, then the `-v` count.
///
/// An unrecognized `--log-level` falls back to `info`.
fn filter_directive(log_level: Option<&str>, env: Option<&str>, verbose: u8, debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    if let Some(level) = log_level {
        let level = level.trim().to_ascii_lowercase();
        return if LEVELS.contains(&level.as_str()) {
            level
        } else {
            "info".to_string()
        };
    }
    if let Some(env) = env.filter(|e| !e.trim().is_empty()) {
        return env.to_string();
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
    .to_string()
}

/// Set up tracing/logging on stderr
fn setup_tracing(directive: &str) {
    let filter = || EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "tokio-console")]
    {
        use std::net::SocketAddr;
        use tracing_subscriber::Layer;

        let console_port: u16 = std::env::var("TOKIO_CONSOLE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(6669);
        let console_addr: SocketAddr = ([127, 0, 0, 1], console_port).into();

        if std::net::TcpListener::bind(console_addr).is_ok() {
            let console_layer = console_subscriber::ConsoleLayer::builder()
                .server_addr(console_addr)
                .spawn();
            tracing_subscriber::registry()
                .with(console_layer)
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_filter(filter()))
                .init();
            tracing::info!("tokio-console enabled, connect with: tokio-console http://127.0.0.1:{console_port}");
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_filter(filter()))
                .init();
            tracing::warn!("tokio-console port {console_port} already in use, running without console instrumentation");
        }
    }

    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(io::stderr)
        .init();
}
