//! Tracing subscriber setup.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set. Otherwise the siteweave crates log at `debug`
/// with `-v`, at `error` with `-q`, and at `warn` by default; every other
/// crate stays at `warn`.
pub fn initialize_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,siteweave={level},siteweave_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(())
}
