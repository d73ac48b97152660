//! Tracing/logging initialization.
//!
//! Events are filtered by `RUST_LOG` when set, otherwise by the configured
//! default directive. Output goes to stderr, or to an append-only file.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable records.
    #[default]
    Human,
    /// One JSON object per record, with timestamps.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Append records here instead of writing to stderr.
    pub log_file: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            log_file: None,
            default_filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_default_filter(mut self, directive: impl Into<String>) -> Self {
        self.default_filter = directive.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },
}

/// Install the global subscriber.
///
/// Safe to call multiple times: only the first successful call installs
/// anything, later calls return `Ok(false)`.
pub fn init(config: &LogConfig) -> Result<bool, InitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter).map_err(|err| InitError::Filter {
            directive: config.default_filter.clone(),
            message: err.to_string(),
        })?,
    };

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.log_file.is_none())
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
            .is_ok(),
        LogFormat::Human => builder.try_init().is_ok(),
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn bad_default_filter_is_rejected() {
        // Only meaningful when RUST_LOG does not override the default.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig::default().with_default_filter("backsuite=loud");
        assert!(matches!(init(&config), Err(InitError::Filter { .. })));
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::default().with_log_file(dir.path().join("missing/dir/backsuite.log"));
        assert!(matches!(init(&config), Err(InitError::LogFile { .. })));
    }

    #[test]
    fn file_logging_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backsuite.log");
        let config = LogConfig::default()
            .with_format(LogFormat::Json)
            .with_log_file(&path)
            .with_default_filter("warn");

        let first = init(&config).unwrap();
        ::tracing::warn!(job = "Docs", "disk almost full");
        let second = init(&config).unwrap();

        assert!(!second);
        if first {
            let written = fs::read_to_string(&path).unwrap();
            assert!(written.contains("disk almost full"));
        }
    }
}
