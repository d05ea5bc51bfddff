//! Telemetry producer: combines ATTITUDE and LOCAL_POSITION_NED into one
//! frame per window.

use super::{default_connection, parse_args};
use crate::link::{self, Attitude, LinkError, LocalPositionNed, Message, MessageKind, VehicleLink};
use crate::worker::{OutputPort, Routine, RoutineRef, SetupError, Step, WorkerContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Poll slice while collecting a frame.
const RECV_SLICE: Duration = Duration::from_millis(100);

/// Latest attitude and position of the vehicle.
///
/// Position is in a local East-North-Up frame: x is East, y is North, z is
/// Up (metres). Angles are radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    /// Milliseconds since vehicle boot.
    pub time_since_boot: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub x_velocity: f64,
    pub y_velocity: f64,
    pub z_velocity: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_speed: f64,
    pub pitch_speed: f64,
    pub yaw_speed: f64,
}

impl TelemetryData {
    /// Merge one attitude and one NED position sample.
    pub fn combine(attitude: &Attitude, position: &LocalPositionNed) -> Self {
        Self {
            time_since_boot: attitude.time_boot_ms.max(position.time_boot_ms),
            x: position.y,
            y: position.x,
            z: -position.z,
            x_velocity: position.vy,
            y_velocity: position.vx,
            z_velocity: -position.vz,
            roll: attitude.roll,
            pitch: attitude.pitch,
            yaw: attitude.yaw,
            roll_speed: attitude.rollspeed,
            pitch_speed: attitude.pitchspeed,
            yaw_speed: attitude.yawspeed,
        }
    }
}

impl std::fmt::Display for TelemetryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t={}ms pos=({:.2}, {:.2}, {:.2}) vel=({:.2}, {:.2}, {:.2}) att=({:.3}, {:.3}, {:.3})",
            self.time_since_boot,
            self.x,
            self.y,
            self.z,
            self.x_velocity,
            self.y_velocity,
            self.z_velocity,
            self.roll,
            self.pitch,
            self.yaw
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryArgs {
    pub connection: String,
    /// Time allowed to collect both messages.
    pub window_ms: u64,
    pub queue_timeout_ms: u64,
}

impl Default for TelemetryArgs {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            window_ms: 1000,
            queue_timeout_ms: 1000,
        }
    }
}

/// Collects telemetry frames from the vehicle.
pub struct Telemetry {
    link: Box<dyn VehicleLink>,
    window: Duration,
}

impl Telemetry {
    pub fn new(link: Box<dyn VehicleLink>, window: Duration) -> Self {
        Self { link, window }
    }

    /// Wait up to one window for both messages. `None` if the window expired.
    pub fn run(&mut self) -> Result<Option<TelemetryData>, LinkError> {
        let deadline = Instant::now() + self.window;
        let mut attitude = None;
        let mut position = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let slice = RECV_SLICE.min(deadline - now);
            match self
                .link
                .recv_match(&[MessageKind::Attitude, MessageKind::LocalPositionNed], slice)?
            {
                Some(Message::Attitude(msg)) => attitude = Some(msg),
                Some(Message::LocalPositionNed(msg)) => position = Some(msg),
                Some(Message::Heartbeat) | None => {}
            }

            if let (Some(attitude), Some(position)) = (&attitude, &position) {
                return Ok(Some(TelemetryData::combine(attitude, position)));
            }
        }
    }
}

struct TelemetryWorker {
    telemetry: Telemetry,
    out: OutputPort<TelemetryData>,
    queue_timeout: Duration,
}

impl Routine for TelemetryWorker {
    fn step(&mut self, _ctx: &WorkerContext) -> Step {
        match self.telemetry.run() {
            Ok(Some(data)) => {
                debug!(x = data.x, y = data.y, z = data.z, "Telemetry updated");
                if let Err(e) = self.out.put_until_exit(&data, self.queue_timeout) {
                    error!(queue = self.out.name(), error = %e, "Failed to publish telemetry");
                }
                Step::Continue
            }
            Ok(None) => {
                error!("Failed to get telemetry data");
                Step::Continue
            }
            Err(e) => {
                error!(error = %e, "Telemetry link failed");
                Step::Done
            }
        }
    }
}

fn build(args: &Value, ctx: &WorkerContext) -> Result<Box<dyn Routine>, SetupError> {
    let args: TelemetryArgs = parse_args(args)?;
    let link = link::connect(&args.connection)?;
    Ok(Box::new(TelemetryWorker {
        telemetry: Telemetry::new(link, Duration::from_millis(args.window_ms)),
        out: ctx.output(0)?,
        queue_timeout: Duration::from_millis(args.queue_timeout_ms),
    }))
}

pub const TELEMETRY: RoutineRef = RoutineRef {
    name: "telemetry",
    inputs: 0,
    outputs: 1,
    factory: build,
};
