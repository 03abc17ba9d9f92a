//! Structured Logging with Tracing

use crate::{Result, TelemetryError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log levels compatible with tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level logging, includes per-frame upload traffic
    Trace,
    /// Debug-level logging for provisioning and compilation
    Debug,
    /// Info-level logging for benchmark progress
    Info,
    /// Warn-level logging for warning messages
    Warn,
    /// Error-level logging for error conditions
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    #[must_use]
    pub const fn to_tracing_level(&self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }

    /// Level selected by a count of `-v` flags on top of `base`
    #[must_use]
    pub const fn from_verbosity(base: Self, verbosity: u8) -> Self {
        match verbosity {
            0 => base,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Trace => "trace",
                Self::Debug => "debug",
                Self::Info => "info",
                Self::Warn => "warn",
                Self::Error => "error",
            }
        )
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(TelemetryError::Logging(format!("Invalid log level: {s}"))),
        }
    }
}

/// Output format for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted output
    Json,
    /// Human-readable pretty format with colors
    Pretty,
    /// Compact format with minimal spacing
    Compact,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            _ => Err(TelemetryError::Logging(format!("Invalid log format: {s}"))),
        }
    }
}

/// Output destination for logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Write logs to standard output
    Stdout,
    /// Write logs to standard error
    Stderr,
    /// Write logs to a file at the specified path
    File(PathBuf),
    /// Write logs to both standard error and a file
    Both {
        /// Whether to write to stderr
        stderr: bool,
        /// File path for log output
        file: PathBuf,
    },
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Format for log output
    pub format: LogFormat,
    /// Destination for log output
    pub output: LogOutput,
    /// Whether to include the target module path in logs
    pub include_target: bool,
    /// Whether to include file name and line number in logs
    pub include_file_line: bool,
    /// Whether to include thread ID in logs
    pub include_thread_id: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            // Stdout is reserved for reports
            output: LogOutput::Stderr,
            include_target: false,
            include_file_line: false,
            include_thread_id: true,
        }
    }
}

impl LogConfig {
    /// Override the level
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

const LOG_TARGETS: &[&str] = &[
    "mempool",
    "mempool_bench",
    "mempool_cli",
    "mempool_config",
    "mempool_gpu",
    "mempool_telemetry",
];

/// Initialize global logging with the given configuration
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns an error if the subscriber is already installed or the log file
/// cannot be opened.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={}", config.level))
            .collect();
        EnvFilter::new(directives.join(","))
    });

    match &config.output {
        LogOutput::Stdout => apply_fmt(config, std::io::stdout, filter),
        LogOutput::Stderr => apply_fmt(config, std::io::stderr, filter),
        LogOutput::File(path) => {
            let writer = SharedWriter {
                stderr: None,
                file: Arc::new(Mutex::new(open_log_file(path)?)),
            };
            apply_fmt(config, writer, filter)
        }
        LogOutput::Both { stderr, file } => {
            let writer = SharedWriter {
                stderr: stderr.then(|| Arc::new(Mutex::new(std::io::stderr()))),
                file: Arc::new(Mutex::new(open_log_file(file)?)),
            };
            apply_fmt(config, writer, filter)
        }
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

/// Log file, optionally mirrored to stderr
#[derive(Clone)]
struct SharedWriter {
    stderr: Option<Arc<Mutex<std::io::Stderr>>>,
    file: Arc<Mutex<File>>,
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(stderr) = &self.stderr {
            stderr.lock().write_all(buf)?;
        }
        self.file.lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(stderr) = &self.stderr {
            stderr.lock().flush()?;
        }
        self.file.lock().flush()?;
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
    type Writer = Self;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn apply_fmt<W>(config: &LogConfig, writer: W, filter: EnvFilter) -> Result<()>
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let init_result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(writer)
            .with_target(config.include_target)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line)
            .with_thread_ids(config.include_thread_id)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_writer(writer)
            .with_target(config.include_target)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line)
            .with_thread_ids(config.include_thread_id)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(writer)
            .with_target(config.include_target)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line)
            .with_thread_ids(config.include_thread_id)
            .with_env_filter(filter)
            .try_init(),
    };
    init_result.map_err(|e| TelemetryError::Init(format!("Failed to init subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse_and_display() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let parsed: LogLevel = level.parse().unwrap();
            assert_eq!(parsed.to_string(), level);
        }
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_verbosity_overrides_level() {
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 9), LogLevel::Trace);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_config_logs_to_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.with_level(LogLevel::Debug).level, LogLevel::Debug);
    }

    #[test]
    fn test_config_from_toml() {
        let config: LogConfig = toml::from_str(
            r#"
            level = "debug"
            format = "json"
            output = { file = "/tmp/mempool.log" }
            "#,
        )
        .unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::File(PathBuf::from("/tmp/mempool.log")));
        assert!(config.include_thread_id);
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("bench.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
