//! Logging setup
//!
//! Human-readable `tracing` output on stderr so it interleaves cleanly with
//! the chat prompt on stdout. `RUST_LOG` overrides the level chosen by
//! `--verbose`.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given verbosity
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "mcp_chat=debug"
    } else {
        "mcp_chat=info"
    }
}

/// Initialize the global tracing subscriber
///
/// # Arguments
///
/// * `verbose` - Log at debug level instead of info
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber was already installed.
pub fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()?;

    Ok(())
}
