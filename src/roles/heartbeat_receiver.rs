//! Heartbeat monitoring: reports Connected/Disconnected every step.

use super::{default_connection, parse_args};
use crate::link::{self, LinkError, MessageKind, VehicleLink};
use crate::worker::{OutputPort, Routine, RoutineRef, SetupError, Step, WorkerContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection state as seen from received heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatStatus {
    Connected,
    Disconnected,
}

impl std::fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatReceiverArgs {
    pub connection: String,
    /// How long to wait for each heartbeat.
    pub timeout_ms: u64,
    /// Consecutive misses before reporting Disconnected.
    pub threshold: u32,
    /// Timeout for each put onto the status queue.
    pub queue_timeout_ms: u64,
}

impl Default for HeartbeatReceiverArgs {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            timeout_ms: 1000,
            threshold: 5,
            queue_timeout_ms: 1000,
        }
    }
}

/// Counts consecutive missed heartbeats.
pub struct HeartbeatReceiver {
    link: Box<dyn VehicleLink>,
    timeout: Duration,
    threshold: u32,
    missed: u32,
}

impl HeartbeatReceiver {
    pub fn new(link: Box<dyn VehicleLink>, timeout: Duration, threshold: u32) -> Self {
        Self {
            link,
            timeout,
            threshold,
            missed: 0,
        }
    }

    /// Consecutive heartbeats missed so far.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Wait for one heartbeat and report the resulting state.
    pub fn run(&mut self) -> Result<HeartbeatStatus, LinkError> {
        match self.link.recv_match(&[MessageKind::Heartbeat], self.timeout)? {
            Some(_) => {
                self.missed = 0;
                Ok(HeartbeatStatus::Connected)
            }
            None => {
                self.missed += 1;
                if self.missed >= self.threshold {
                    Ok(HeartbeatStatus::Disconnected)
                } else {
                    Ok(HeartbeatStatus::Connected)
                }
            }
        }
    }
}

struct HeartbeatReceiverWorker {
    receiver: HeartbeatReceiver,
    out: OutputPort<HeartbeatStatus>,
    queue_timeout: Duration,
    last: Option<HeartbeatStatus>,
}

impl Routine for HeartbeatReceiverWorker {
    fn step(&mut self, _ctx: &WorkerContext) -> Step {
        let status = match self.receiver.run() {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "Heartbeat receive failed");
                return Step::Done;
            }
        };

        match (self.last, status) {
            (Some(HeartbeatStatus::Disconnected), HeartbeatStatus::Connected) => {
                info!("Vehicle connection restored")
            }
            (_, HeartbeatStatus::Disconnected) => error!(
                missed = self.receiver.missed(),
                "Connection lost, consecutive missed heartbeats"
            ),
            _ if self.receiver.missed() > 0 => {
                warn!(missed = self.receiver.missed(), "Missed heartbeat")
            }
            _ => debug!("Heartbeat received"),
        }
        self.last = Some(status);

        if let Err(e) = self.out.put_until_exit(&status, self.queue_timeout) {
            error!(queue = self.out.name(), error = %e, "Failed to publish heartbeat status");
        }
        Step::Continue
    }
}

fn build(args: &Value, ctx: &WorkerContext) -> Result<Box<dyn Routine>, SetupError> {
    let args: HeartbeatReceiverArgs = parse_args(args)?;
    let link = link::connect(&args.connection)?;
    Ok(Box::new(HeartbeatReceiverWorker {
        receiver: HeartbeatReceiver::new(
            link,
            Duration::from_millis(args.timeout_ms),
            args.threshold,
        ),
        out: ctx.output(0)?,
        queue_timeout: Duration::from_millis(args.queue_timeout_ms),
        last: None,
    }))
}

pub const HEARTBEAT_RECEIVER: RoutineRef = RoutineRef {
    name: "heartbeat_receiver",
    inputs: 0,
    outputs: 1,
    factory: build,
};
