//! Command-line interface definitions using clap.

use crate::config::SessionConfig;
use crate::roles::Position;
use crate::worker::SetupFailurePolicy;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Heartbeat, telemetry and command pipeline for a MAVLink vehicle.
#[derive(Parser, Debug)]
#[command(name = "mavflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(
        long,
        env = "NO_COLOR",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one pipeline session.
    Run(RunArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Run a single worker replica (spawned by the pipeline).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "mavflow",
            &mut std::io::stdout(),
        );
    }
}

/// Arguments for the hidden worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Registered routine to run.
    #[arg(long)]
    pub routine: String,

    /// Replica index within its pool.
    #[arg(long, default_value_t = 0)]
    pub replica: usize,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Vehicle connection (`sim` or `sim:heartbeat_ms=..,telemetry_ms=..,silent`).
    #[arg(long, env = "MAVFLOW_CONNECTION", default_value = crate::roles::DEFAULT_CONNECTION)]
    pub connection: String,

    /// Session length in seconds.
    #[arg(long, env = "MAVFLOW_DURATION_SECS", default_value_t = 100)]
    pub duration_secs: u64,

    /// Orchestrator poll interval in milliseconds.
    #[arg(long, env = "MAVFLOW_POLL_MS", default_value_t = 100)]
    pub poll_ms: u64,

    /// Heartbeat status queue capacity (<= 0 for unbounded).
    #[arg(
        long,
        env = "MAVFLOW_HEARTBEAT_QUEUE",
        default_value_t = 10,
        allow_negative_numbers = true
    )]
    pub heartbeat_queue: i64,

    /// Telemetry queue capacity (<= 0 for unbounded).
    #[arg(
        long,
        env = "MAVFLOW_TELEMETRY_QUEUE",
        default_value_t = 10,
        allow_negative_numbers = true
    )]
    pub telemetry_queue: i64,

    /// Command decision queue capacity (<= 0 for unbounded).
    #[arg(long, env = "MAVFLOW_COMMAND_QUEUE", default_value_t = 10, allow_negative_numbers = true)]
    pub command_queue: i64,

    /// Heartbeat sender replicas.
    #[arg(long, env = "MAVFLOW_SENDERS", default_value_t = 1)]
    pub senders: usize,

    /// Heartbeat receiver replicas.
    #[arg(long, env = "MAVFLOW_RECEIVERS", default_value_t = 1)]
    pub receivers: usize,

    /// Telemetry replicas.
    #[arg(long, env = "MAVFLOW_TELEMETRY_WORKERS", default_value_t = 1)]
    pub telemetry_workers: usize,

    /// Command replicas.
    #[arg(long, env = "MAVFLOW_COMMAND_WORKERS", default_value_t = 1)]
    pub command_workers: usize,

    /// Interval between heartbeats sent to the vehicle, in milliseconds.
    #[arg(long, env = "MAVFLOW_HEARTBEAT_PERIOD_MS", default_value_t = 1000)]
    pub heartbeat_period_ms: u64,

    /// How long to wait for each vehicle heartbeat, in milliseconds.
    #[arg(long, env = "MAVFLOW_HEARTBEAT_TIMEOUT_MS", default_value_t = 1000)]
    pub heartbeat_timeout_ms: u64,

    /// Consecutive missed heartbeats before the vehicle counts as disconnected.
    #[arg(long, env = "MAVFLOW_HEARTBEAT_THRESHOLD", default_value_t = 5)]
    pub heartbeat_threshold: u32,

    /// Target position as X,Y,Z (metres, East-North-Up).
    #[arg(long, env = "MAVFLOW_TARGET", default_value = "0,0,0", allow_hyphen_values = true)]
    pub target: Position,

    /// Minimum pause between command decisions, in milliseconds.
    #[arg(long, env = "MAVFLOW_COMMAND_INTERVAL_MS", default_value_t = 0)]
    pub command_interval_ms: u64,

    /// What a worker does when its setup fails: request-exit or isolate.
    #[arg(long, env = "MAVFLOW_SETUP_FAILURE", default_value = "request-exit")]
    pub setup_failure: SetupFailurePolicy,

    /// Keep running when the vehicle is reported disconnected.
    #[arg(long, env = "MAVFLOW_KEEP_RUNNING_ON_DISCONNECT")]
    pub keep_running_on_disconnect: bool,

    /// Give up joining a pool after this many seconds and kill its workers.
    #[arg(long, env = "MAVFLOW_JOIN_TIMEOUT_SECS")]
    pub join_timeout_secs: Option<u64>,

    /// Run workers as threads instead of processes.
    #[arg(long, env = "MAVFLOW_THREADS")]
    pub threads: bool,

    /// Write main.log and one log file per worker into this directory.
    #[arg(long, env = "MAVFLOW_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Session configuration for these arguments.
    pub fn to_config(&self) -> SessionConfig {
        SessionConfig {
            connection: self.connection.clone(),
            heartbeat_queue: self.heartbeat_queue,
            telemetry_queue: self.telemetry_queue,
            command_queue: self.command_queue,
            senders: self.senders,
            receivers: self.receivers,
            telemetry_workers: self.telemetry_workers,
            command_workers: self.command_workers,
            duration: Duration::from_secs(self.duration_secs),
            poll: Duration::from_millis(self.poll_ms),
            heartbeat_period: Duration::from_millis(self.heartbeat_period_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            heartbeat_threshold: self.heartbeat_threshold,
            target: self.target,
            command_interval: Duration::from_millis(self.command_interval_ms),
            setup_failure: self.setup_failure,
            stop_on_disconnect: !self.keep_running_on_disconnect,
            join_timeout: self.join_timeout_secs.map(Duration::from_secs),
            log_dir: self.log_dir.clone(),
            ..SessionConfig::default()
        }
    }
}
