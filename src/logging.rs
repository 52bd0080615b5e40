use crate::error::RepoError;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Base filter:
/// - RUST_LOG wins when set
/// - otherwise `--log-level` (DEBUG/INFO/WARNING/ERROR/CRITICAL)
/// - otherwise "debug" with --verbose, else "info"
///
/// With `--log-file`, output is appended to the file without ANSI codes.
pub fn init(verbose: bool, log_file: Option<&Path>, log_level: Option<&str>) -> Result<()> {
    let default_level = match log_level {
        Some(level) => map_level(level)?,
        None if verbose => "debug",
        None => "info",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(false)
                .compact()
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .init();
        }
    }

    Ok(())
}

fn map_level(level: &str) -> Result<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARNING" => Ok("warn"),
        "ERROR" => Ok("error"),
        "CRITICAL" => Ok("error"),
        other => Err(RepoError::Config(format!("unknown log level: {other}")).into()),
    }
}
