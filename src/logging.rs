//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays clean for wire output (`encode`
//! prints one JSON message per line).

use crate::error::{Result, VoxlinkError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "VOXLINK_LOG";

/// Filter directive used when neither environment variable is set.
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "voxlink=info,warn",
        1 => "voxlink=debug,info",
        _ => "voxlink=trace,debug",
    }
}

/// Picks the filter: `VOXLINK_LOG`, then `RUST_LOG`, then the verbosity default.
pub fn select_directive(
    voxlink_log: Option<&str>,
    rust_log: Option<&str>,
    verbose: u8,
    quiet: bool,
) -> String {
    voxlink_log
        .or(rust_log)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_directive(verbose, quiet).to_string())
}

/// Installs the global subscriber.
///
/// # Errors
/// `VoxlinkError::Other` when the filter directive is malformed or a
/// subscriber is already installed.
pub fn init(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let voxlink_log = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = select_directive(voxlink_log.as_deref(), rust_log.as_deref(), verbose, quiet);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| VoxlinkError::Other(format!("invalid log filter '{}': {}", directive, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    installed.map_err(|e| VoxlinkError::Other(format!("failed to install logger: {}", e)))
}
