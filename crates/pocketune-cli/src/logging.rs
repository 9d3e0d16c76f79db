//! Tracing setup for the host binary.
//!
//! Human-readable diagnostics go to stderr so they never mix with command
//! output on stdout. Every event is also written as JSON to a rolling file
//! under the data directory.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Crates whose events pass the default filters.
const OWN_TARGETS: [&str; 2] = ["pocketune", "pocketune_core"];

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory holding the rolling log files.
    pub log_directory: PathBuf,
    /// File name prefix, e.g. `pocketune` gives `pocketune.2026-01-15.log`.
    pub log_file_prefix: String,
    /// Most verbose level printed on stderr.
    pub console_level: Level,
    /// Most verbose level written to the log file.
    pub file_level: Level,
    /// How often a new file is started.
    pub rotation: LogRotation,
    /// Rotated files to keep, 0 keeps everything.
    pub max_log_files: usize,
    /// Colorize console output.
    pub console_ansi: bool,
    /// Add source file and line to console output.
    pub include_file_line: bool,
    /// Log span open/close events.
    pub log_span_events: bool,
}

/// Log rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    Daily,
    /// One file forever.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose settings for local work.
    #[must_use]
    pub fn development() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "pocketune".to_string(),
            console_level: Level::DEBUG,
            file_level: Level::TRACE,
            rotation: LogRotation::Hourly,
            max_log_files: 24,
            console_ansi: true,
            include_file_line: true,
            log_span_events: true,
        }
    }

    /// Quiet console, daily files kept for a week.
    #[must_use]
    pub fn production() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "pocketune".to_string(),
            console_level: Level::WARN,
            file_level: Level::DEBUG,
            rotation: LogRotation::Daily,
            max_log_files: 7,
            console_ansi: true,
            include_file_line: false,
            log_span_events: false,
        }
    }

    /// Development settings in debug builds, production otherwise.
    #[must_use]
    pub fn auto() -> Self {
        if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::production()
        }
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_directory(mut self, path: PathBuf) -> Self {
        self.log_directory = path;
        self
    }

    /// Set the console log level.
    #[must_use]
    pub const fn with_console_level(mut self, level: Level) -> Self {
        self.console_level = level;
        self
    }

    /// Set the file log level.
    #[must_use]
    pub const fn with_file_level(mut self, level: Level) -> Self {
        self.file_level = level;
        self
    }

    /// Set the rotation frequency.
    #[must_use]
    pub const fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Raise the console level by `-v` count: 1 is info, 2 debug, 3+ trace.
    #[must_use]
    pub fn with_verbosity(self, verbose: u8) -> Self {
        let level = match verbose {
            0 => return self,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self.with_console_level(level)
    }
}

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the console filter.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    if !config.log_directory.exists() {
        std::fs::create_dir_all(&config.log_directory).map_err(|e| {
            LoggingError::DirectoryCreationFailed {
                path: config.log_directory.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(&config.log_file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_log_files.max(1))
        .build(&config.log_directory)
        .map_err(|e| LoggingError::AppenderFailed(e.to_string()))?;
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => own_filter("warn", config.console_level)?,
    };
    let file_filter = own_filter(level_to_directive(config.file_level), Level::TRACE)?;

    let span_events = if config.log_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.console_ansi)
        .with_target(false)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events.clone())
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .json()
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// `base` for everything, `own` for this workspace's crates.
fn own_filter(base: &str, own: Level) -> Result<EnvFilter, LoggingError> {
    let own = level_to_directive(own);
    let mut filter = EnvFilter::new(base);
    for target in OWN_TARGETS {
        let directive = format!("{target}={own}")
            .parse::<Directive>()
            .map_err(|e| LoggingError::InvalidDirective(e.to_string()))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Log directory under the local data directory.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pocketune")
        .join("logs")
}

const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The rolling file appender could not be built.
    #[error("Failed to open log file: {0}")]
    AppenderFailed(String),

    /// A filter directive did not parse.
    #[error("Invalid log filter: {0}")]
    InvalidDirective(String),

    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_production() {
        let config = LoggingConfig::default();
        assert_eq!(config.console_level, Level::WARN);
        assert_eq!(config.file_level, Level::DEBUG);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert_eq!(config.max_log_files, 7);
    }

    #[test]
    fn test_development_config() {
        let config = LoggingConfig::development();
        assert_eq!(config.console_level, Level::DEBUG);
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(config.include_file_line);
        assert!(config.log_span_events);
    }

    #[test]
    fn test_verbosity_raises_console_level() {
        let base = LoggingConfig::production();
        assert_eq!(base.clone().with_verbosity(0).console_level, Level::WARN);
        assert_eq!(base.clone().with_verbosity(1).console_level, Level::INFO);
        assert_eq!(base.clone().with_verbosity(2).console_level, Level::DEBUG);
        assert_eq!(base.with_verbosity(9).console_level, Level::TRACE);
    }

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::production()
            .with_log_directory(PathBuf::from("/tmp/pocketune-logs"))
            .with_file_level(Level::INFO)
            .with_rotation(LogRotation::Never);

        assert_eq!(config.log_directory, PathBuf::from("/tmp/pocketune-logs"));
        assert_eq!(config.file_level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Never);
    }

    #[test]
    fn test_own_filter_parses() {
        let filter = own_filter("warn", Level::DEBUG).expect("filter");
        let rendered = filter.to_string();
        assert!(rendered.contains("pocketune_core=debug"));
    }

    #[test]
    fn test_default_log_directory() {
        let dir = default_log_directory();
        assert!(dir.ends_with("pocketune/logs"));
    }

    #[test]
    fn test_init_creates_log_directory() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let log_dir = temp.path().join("nested").join("logs");
        let config = LoggingConfig::production().with_log_directory(log_dir.clone());

        // Another test may already own the global subscriber; only the
        // directory side effect is checked.
        let _guard = init(&config);
        assert!(log_dir.is_dir());
    }
}
