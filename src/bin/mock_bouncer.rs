//! Reference receiver: accepts one connection, validates one frame, ACKs it.
//!
//! Status lines go to stdout for test harnesses. Each rejection reason has
//! its own exit code so a harness can tell them apart without parsing logs.

use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;

use bounce_notify::config::{BounceConfig, ServerConfig, DEFAULT_LISTEN};
use bounce_notify::utils::global_metrics;
use bounce_notify::utils::logging::init_logging;
use bounce_notify::{
    ExchangeOutcome, RejectReason, ReferenceServer, ServerState, StatusLines,
};

#[derive(Parser, Debug)]
#[command(name = "mock-bouncer", version)]
#[command(about = "Single-shot reference receiver for bounce frames")]
struct Cli {
    /// Listen address (host:port)
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Largest accepted header in bytes
    #[arg(long)]
    max_header_bytes: Option<u32>,

    /// Largest accepted body in bytes
    #[arg(long)]
    max_body_bytes: Option<u64>,

    /// Per-read timeout in seconds once a client is connected
    #[arg(long)]
    read_timeout_secs: Option<u64>,
}

const EXIT_USAGE: u8 = 1;
const EXIT_BIND: u8 = 2;

fn exit_code(outcome: &ExchangeOutcome) -> u8 {
    match outcome {
        ExchangeOutcome::Accepted(_) => 0,
        ExchangeOutcome::Rejected { reason, stage, .. } => match (reason, stage) {
            (RejectReason::Accept, _) => 3,
            (RejectReason::Truncated, ServerState::ReadingPrefix) => 4,
            (RejectReason::BadMagic, _) => 5,
            (RejectReason::InvalidLength, _) => 6,
            (RejectReason::OutOfMemory, _) => 7,
            (RejectReason::Truncated, _) => 8,
            (RejectReason::AckWriteError, _) => 9,
            (RejectReason::Timeout, _) => 10,
            (RejectReason::Io, _) => 11,
        },
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    let mut config = ServerConfig {
        listen_address: cli.listen,
        read_timeout: cli.read_timeout_secs.map(Duration::from_secs),
        ..ServerConfig::default()
    };
    if let Some(max) = cli.max_header_bytes {
        config.max_header_bytes = max;
    }
    if let Some(max) = cli.max_body_bytes {
        config.max_body_bytes = max;
    }
    let errors = config.validate();
    if !errors.is_empty() {
        eprintln!("mock-bouncer: {}", errors.join("; "));
        return ExitCode::from(EXIT_USAGE);
    }

    let logging = BounceConfig::from_env()
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(&logging);

    let server = match ReferenceServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("mock-bouncer: {e}");
            return ExitCode::from(EXIT_BIND);
        }
    };

    let outcome = server
        .serve_one(StatusLines::new(std::io::stdout()))
        .await;
    if let ExchangeOutcome::Rejected { error, .. } = &outcome {
        eprintln!("mock-bouncer: {error}");
    }
    global_metrics().log_metrics();
    ExitCode::from(exit_code(&outcome))
}
