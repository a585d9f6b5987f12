//! Observability and telemetry.
//!
//! Structured logging through `tracing`, wired to a `tracing-subscriber`
//! stack owned by the binary. Library code only emits events; nothing in
//! the engine installs a global subscriber on its own.
//!
//! Filter priority (highest to lowest): `VECDEX_LOG` (per-target
//! directives), `RUST_LOG`, CLI `--verbose`, then a default of `info`.

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for terminals.
    #[default]
    Pretty,
    /// Newline-delimited JSON for log pipelines.
    Json,
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Verbosity filter applied to the subscriber.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Log file path; events go to stderr when absent.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds a configuration from environment variables and the CLI
    /// verbose flag.
    ///
    /// `VECDEX_LOG_FORMAT=json` selects JSON output; `VECDEX_LOG_FILE`
    /// redirects events to a file instead of stderr.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        Self {
            filter: build_env_filter(verbose),
            format: match std::env::var("VECDEX_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            file: std::env::var("VECDEX_LOG_FILE").ok().map(PathBuf::from),
        }
    }
}

/// Builds an `EnvFilter` respecting the priority chain.
fn build_env_filter(verbose: bool) -> EnvFilter {
    // VECDEX_LOG first; an unparseable value falls through to RUST_LOG
    // rather than failing hard.
    if let Ok(directives) = std::env::var("VECDEX_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if verbose {
        EnvFilter::new("info,vecdex=debug")
    } else {
        EnvFilter::new("info")
    }
}

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Initializes the global logging subscriber for the process.
///
/// Repeat calls are no-ops, so tests and embedders may call this freely.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or the subscriber
/// cannot be installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    match (&config.file, config.format) {
        (Some(log_file), LogFormat::Json) => {
            let writer = open_log_file(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (Some(log_file), LogFormat::Pretty) => {
            let writer = open_log_file(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (None, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (None, LogFormat::Pretty) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stderr)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
    }

    let _ = LOGGING_INIT.set(());
    Ok(())
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Opens a log file for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Storage {
            operation: "create_log_dir".to_string(),
            cause: e.to_string(),
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Storage {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

/// Helper to convert subscriber init errors.
#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::Storage {
        operation: "init_logging".to_string(),
        cause: e.to_string(),
    }
}
