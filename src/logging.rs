//! Logging setup for the orchestrator and its worker processes.
//!
//! Everything goes to stderr. In worker processes stdout carries the broker
//! link, so nothing may be logged there.
//!
//! # Environment Variables
//!
//! - `MAVFLOW_LOG` - Log filter (overrides RUST_LOG)
//! - `MAVFLOW_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `MAVFLOW_LOG_FORMAT` - Output format: pretty, compact, json
//! - `MAVFLOW_LOG_DIR` - Directory for log files (in addition to stderr)
//! - `MAVFLOW_LOG_ROTATION` - File rotation: hourly, daily, never
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! With a log directory the orchestrator writes `main.log` and each worker
//! process writes `<routine>_<pid>.log`.
//!
//! # Example
//!
//! ```no_run
//! use mavflow::logging::{LogConfig, init};
//!
//! init(LogConfig::for_orchestrator().with_env_overrides());
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log file written by the orchestrator.
pub const ORCHESTRATOR_LOG_FILE: &str = "main.log";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format
    #[default]
    Pretty,
    /// Compact single-line format (default for workers)
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation of log files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// One file per session (default)
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Start from a preset, adjust with the builder methods, then pass to
/// [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Directory for the log file (None = stderr only)
    pub log_dir: Option<PathBuf>,
    /// File name inside `log_dir`
    pub file_name: String,
    /// Log rotation for file output (default: Never)
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Colour on stderr when it is a terminal
    pub ansi: bool,
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub show_line_numbers: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            log_dir: None,
            file_name: ORCHESTRATOR_LOG_FILE.to_string(),
            rotation: LogRotation::Never,
            span_events: false,
            filter: None,
            ansi: true,
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for the `run` command.
    pub fn for_orchestrator() -> Self {
        Self::default()
    }

    /// Preset for a worker process: compact lines, one file per process.
    pub fn for_worker(routine: &str) -> Self {
        Self {
            format: LogFormat::Compact,
            file_name: worker_log_file(routine, std::process::id()),
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Also write to a file in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Enable span timing events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Apply `-v`/`-q` from the command line.
    ///
    /// An explicit flag beats any level or filter taken from the
    /// environment, so call this after [`LogConfig::with_env_overrides`].
    pub fn with_verbosity(mut self, verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => return self,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        };
        self.level = level;
        self.filter = None;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// Reads from:
    /// - `MAVFLOW_LOG` or `RUST_LOG` for filter (only if no filter is set yet)
    /// - `MAVFLOW_LOG_LEVEL` for level (only if no filter is set)
    /// - `MAVFLOW_LOG_FORMAT` for format
    /// - `MAVFLOW_LOG_DIR` for the log directory
    /// - `MAVFLOW_LOG_ROTATION` for rotation
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("MAVFLOW_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level) = std::env::var("MAVFLOW_LOG_LEVEL")
        {
            self.level = parse_level(&level).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("MAVFLOW_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(dir) = std::env::var("MAVFLOW_LOG_DIR")
            && !dir.is_empty()
        {
            self.log_dir = Some(PathBuf::from(dir));
        }

        if let Ok(rotation) = std::env::var("MAVFLOW_LOG_ROTATION")
            && let Ok(r) = rotation.parse()
        {
            self.rotation = r;
        }

        self
    }

    /// Full path of the log file, when file logging is enabled.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.file_name))
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(format!("{}", self.level).to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn fmt_layer<W>(&self, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let span_events = if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_span_events(span_events)
            .with_target(self.show_target)
            .with_ansi(ansi)
            .with_writer(writer);

        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer
                .compact()
                .with_thread_ids(self.show_thread_ids)
                .with_line_number(self.show_line_numbers)
                .boxed(),
            LogFormat::Pretty => layer
                .with_thread_ids(self.show_thread_ids)
                .with_line_number(self.show_line_numbers)
                .boxed(),
        }
    }
}

/// Log file name for one worker process.
pub fn worker_log_file(routine: &str, pid: u32) -> String {
    format!("{}_{}.log", routine, pid)
}

fn file_appender(config: &LogConfig, dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(config.file_name.as_str())
        .build(dir)
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup; later calls are silently ignored. A log directory
/// that cannot be opened is reported on stderr and skipped.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let ansi = config.ansi && std::io::stderr().is_terminal();

    let mut layers = vec![config.fmt_layer(std::io::stderr, ansi)];
    if let Some(dir) = &config.log_dir {
        match file_appender(&config, dir) {
            Ok(appender) => layers.push(config.fmt_layer(appender, false)),
            Err(e) => eprintln!(
                "Warning: Cannot open log file in {}: {}",
                dir.display(),
                e
            ),
        }
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
}
