//! Periodic heartbeat to the vehicle.

use super::{default_connection, parse_args};
use crate::link::{self, LinkError, VehicleLink};
use crate::worker::{Routine, RoutineRef, SetupError, Step, WorkerContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSenderArgs {
    pub connection: String,
    pub period_ms: u64,
}

impl Default for HeartbeatSenderArgs {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            period_ms: 1000,
        }
    }
}

/// Sends one heartbeat per call.
pub struct HeartbeatSender {
    link: Box<dyn VehicleLink>,
}

impl HeartbeatSender {
    pub fn new(link: Box<dyn VehicleLink>) -> Self {
        Self { link }
    }

    pub fn run(&mut self) -> Result<(), LinkError> {
        self.link.send_heartbeat()
    }
}

struct HeartbeatSenderWorker {
    sender: HeartbeatSender,
    period: Duration,
}

impl Routine for HeartbeatSenderWorker {
    fn step(&mut self, ctx: &WorkerContext) -> Step {
        if let Err(e) = self.sender.run() {
            error!(error = %e, "Failed to send heartbeat");
            return Step::Done;
        }
        debug!("Heartbeat sent");
        ctx.sleep(self.period);
        Step::Continue
    }
}

fn build(args: &Value, _ctx: &WorkerContext) -> Result<Box<dyn Routine>, SetupError> {
    let args: HeartbeatSenderArgs = parse_args(args)?;
    let link = link::connect(&args.connection)?;
    Ok(Box::new(HeartbeatSenderWorker {
        sender: HeartbeatSender::new(link),
        period: Duration::from_millis(args.period_ms),
    }))
}

pub const HEARTBEAT_SENDER: RoutineRef = RoutineRef {
    name: "heartbeat_sender",
    inputs: 0,
    outputs: 0,
    factory: build,
};
