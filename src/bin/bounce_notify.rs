//! Postfix pipe transport that forwards a bounce to the bounce processor.
//!
//! Reads the bounce message from stdin, wraps it in a single frame and waits
//! for the receiver's acknowledgement. Exit codes follow `sysexits.h`:
//! `0` on delivery, `64` for usage errors, `75` for anything Postfix should
//! retry later.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use bounce_notify::config::{BounceConfig, EX_TEMPFAIL, EX_USAGE};
use bounce_notify::utils::global_metrics;
use bounce_notify::utils::logging::init_logging;
use bounce_notify::{read_body, BounceClient, BounceError, Header};

#[derive(Parser, Debug)]
#[command(name = "bounce-notify", version)]
#[command(about = "Forward a bounce message from stdin to the bounce processor")]
struct Cli {
    /// Receiver address (host:port)
    #[arg(long)]
    server: Option<String>,

    /// Envelope sender of the bounce
    #[arg(long)]
    from: String,

    /// Envelope recipient of the bounce
    #[arg(long)]
    to: String,

    /// Connect, send and ACK timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Optional classification tag
    #[arg(long)]
    kind: Option<String>,

    /// Optional origin tag
    #[arg(long)]
    source: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<BounceConfig, BounceError> {
    let (mut config, server_configured) = BounceConfig::load_layered(cli.config.as_deref())?;

    match &cli.server {
        Some(server) => config.client.server_address = server.clone(),
        None if !server_configured => {
            return Err(BounceError::ConfigError("missing --server".into()));
        }
        None => {}
    }
    if let Some(secs) = cli.timeout_secs {
        config.client.timeout = Duration::from_secs(secs);
    }

    let errors = config.client.validate();
    if !errors.is_empty() {
        return Err(BounceError::ConfigError(errors.join("; ")));
    }
    Ok(config)
}

async fn run(cli: Cli, config: BounceConfig) -> Result<(), BounceError> {
    let mut header = Header::new(cli.from, cli.to);
    header.kind = cli.kind;
    header.source = cli.source;

    let mut stdin = tokio::io::stdin();
    let body = read_body(&mut stdin, config.client.max_body_bytes).await?;

    let mut client = BounceClient::new(config.client);
    client.send(&header, body).await?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EX_USAGE as u8),
            };
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bounce-notify: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };
    init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::from(EX_TEMPFAIL as u8);
        }
    };

    let result = runtime.block_on(run(cli, config));
    global_metrics().log_metrics();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bounce-notify: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
