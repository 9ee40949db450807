//! Logging setup for Semaphore.
//!
//! `RUST_LOG` takes precedence when set. Otherwise the configured level
//! applies to Semaphore, and the storage and HTTP stacks are capped at `warn`
//! so a refresh cycle over many feeds does not log every statement and request.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Result, SemaphoreError};

/// Dependencies that log per statement or per request.
const QUIET_TARGETS: &[&str] = &[
    "sqlx=warn",
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "rustls=warn",
];

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter used when `RUST_LOG` is not set.
fn default_filter(level: &str) -> EnvFilter {
    QUIET_TARGETS
        .iter()
        .filter_map(|target| target.parse::<Directive>().ok())
        .fold(
            EnvFilter::default().add_directive(parse_level(level).into()),
            EnvFilter::add_directive,
        )
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level))
}

/// Open the log file for appending, creating its directory.
fn open_log_file(path: &str) -> Result<Arc<fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Initialize logging from the `[logging]` section.
///
/// Writes to stdout and, when `config.file` is set, appends to that file too.
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if config.file.is_empty() {
        init_console_only(&config.level);
        return Ok(());
    }

    let log_file = open_log_file(&config.file)?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(log_file))
                .with_ansi(false)
                .with_target(true),
        )
        .with(build_filter(&config.level))
        .try_init()
        .map_err(|e| SemaphoreError::Config(format!("logging already initialized: {e}")))
}

/// Console-only logging, used as the fallback when the log file cannot be
/// opened.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(build_filter(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level(" DEBUG "), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("ERROR"), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_quiet_targets_parse() {
        for target in QUIET_TARGETS {
            assert!(target.parse::<Directive>().is_ok(), "{target}");
        }
    }

    #[test]
    fn test_default_filter_caps_dependencies() {
        let filter = default_filter("debug").to_string();
        assert!(filter.contains("sqlx=warn"), "{filter}");
        assert!(filter.contains("reqwest=warn"), "{filter}");
    }

    #[test]
    fn test_open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("semaphore.log");
        let path = path.to_str().unwrap();

        {
            use std::io::Write;
            let mut file = open_log_file(path).unwrap();
            Arc::get_mut(&mut file).unwrap().write_all(b"first\n").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_log_file(path).unwrap();
            Arc::get_mut(&mut file).unwrap().write_all(b"second\n").unwrap();
        }

        assert_eq!(fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_console_only_is_reentrant() {
        init_console_only("debug");
        init_console_only("info");
    }
}
