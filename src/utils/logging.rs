//! Structured logging setup.
//!
//! Logs go to stderr so that stdout stays free for the reference server's
//! status lines. `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Calling it twice is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
