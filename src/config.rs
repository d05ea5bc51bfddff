//! Session configuration.
//!
//! Defaults reproduce the reference session: three queues of capacity 10,
//! one replica per role, a 100 s run and a 100 ms orchestrator poll.

use crate::roles::{
    CommandArgs, HeartbeatReceiverArgs, HeartbeatSenderArgs, Position, TelemetryArgs,
};
use crate::worker::SetupFailurePolicy;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to build and run one pipeline session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Vehicle connection string handed to every role.
    pub connection: String,

    /// Capacity of each queue; `<= 0` means unbounded.
    pub heartbeat_queue: i64,
    pub telemetry_queue: i64,
    pub command_queue: i64,

    /// Replicas per role.
    pub senders: usize,
    pub receivers: usize,
    pub telemetry_workers: usize,
    pub command_workers: usize,

    /// How long the session runs before shutting down on its own.
    pub duration: Duration,
    /// Orchestrator wait per poll of the terminal queues.
    pub poll: Duration,
    /// Timeout of each queue operation inside workers.
    pub worker_queue_timeout: Duration,

    pub heartbeat_period: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_threshold: u32,
    pub telemetry_window: Duration,
    pub target: Position,
    pub command_interval: Duration,

    pub setup_failure: SetupFailurePolicy,
    /// Shut down as soon as the receiver reports Disconnected.
    pub stop_on_disconnect: bool,
    /// Deadline for joining each pool; `None` waits forever.
    pub join_timeout: Option<Duration>,
    /// Directory for per-process log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: crate::roles::DEFAULT_CONNECTION.to_string(),
            heartbeat_queue: 10,
            telemetry_queue: 10,
            command_queue: 10,
            senders: 1,
            receivers: 1,
            telemetry_workers: 1,
            command_workers: 1,
            duration: Duration::from_secs(100),
            poll: Duration::from_millis(100),
            worker_queue_timeout: Duration::from_secs(1),
            heartbeat_period: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(1),
            heartbeat_threshold: 5,
            telemetry_window: Duration::from_secs(1),
            target: Position::default(),
            command_interval: Duration::ZERO,
            setup_failure: SetupFailurePolicy::RequestExit,
            stop_on_disconnect: true,
            join_timeout: None,
            log_dir: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl SessionConfig {
    pub fn heartbeat_sender_args(&self) -> HeartbeatSenderArgs {
        HeartbeatSenderArgs {
            connection: self.connection.clone(),
            period_ms: millis(self.heartbeat_period),
        }
    }

    pub fn heartbeat_receiver_args(&self) -> HeartbeatReceiverArgs {
        HeartbeatReceiverArgs {
            connection: self.connection.clone(),
            timeout_ms: millis(self.heartbeat_timeout),
            threshold: self.heartbeat_threshold,
            queue_timeout_ms: millis(self.worker_queue_timeout),
        }
    }

    pub fn telemetry_args(&self) -> TelemetryArgs {
        TelemetryArgs {
            connection: self.connection.clone(),
            window_ms: millis(self.telemetry_window),
            queue_timeout_ms: millis(self.worker_queue_timeout),
        }
    }

    pub fn command_args(&self) -> CommandArgs {
        CommandArgs {
            connection: self.connection.clone(),
            target: self.target,
            queue_timeout_ms: millis(self.worker_queue_timeout),
            min_interval_ms: millis(self.command_interval),
        }
    }

    /// Role arguments as the JSON values bound into descriptors.
    pub(crate) fn role_args(&self) -> serde_json::Result<RoleArgs> {
        Ok(RoleArgs {
            heartbeat_sender: serde_json::to_value(self.heartbeat_sender_args())?,
            heartbeat_receiver: serde_json::to_value(self.heartbeat_receiver_args())?,
            telemetry: serde_json::to_value(self.telemetry_args())?,
            command: serde_json::to_value(self.command_args())?,
        })
    }
}

/// Serialized per-role arguments.
pub(crate) struct RoleArgs {
    pub heartbeat_sender: Value,
    pub heartbeat_receiver: Value,
    pub telemetry: Value,
    pub command: Value,
}
