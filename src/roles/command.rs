//! Command consumer: turns telemetry frames into altitude and yaw
//! corrections toward a fixed target.

use super::telemetry::TelemetryData;
use super::{default_connection, parse_args};
use crate::link::{self, LinkError, VehicleCommand, VehicleLink};
use crate::worker::{
    InputPort, OutputPort, QueueError, Routine, RoutineRef, SetupError, Step, WorkerContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Altitude error (m) above which an altitude change is commanded.
const ALTITUDE_TOLERANCE: f64 = 0.5;

/// Heading error (degrees) above which a yaw change is commanded.
const YAW_TOLERANCE_DEG: f64 = 5.0;

/// Turn rate requested with yaw commands, deg/s.
const YAW_RATE_DEG_S: f64 = 5.0;

/// 3D vector in the local East-North-Up frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl std::str::FromStr for Position {
    type Err = String;

    /// Parse `X,Y,Z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, z] = parts.as_slice() else {
            return Err(format!("Expected X,Y,Z but got '{}'", s));
        };
        let parse = |v: &str| {
            v.parse::<f64>()
                .map_err(|_| format!("Invalid coordinate '{}' in '{}'", v, s))
        };
        Ok(Self::new(parse(*x)?, parse(*y)?, parse(*z)?))
    }
}

/// A correction sent to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandDecision {
    /// Target altitude minus current altitude, metres.
    ChangeAltitude { delta: f64 },
    /// Heading change, degrees in [-180, 180].
    ChangeYaw { delta: f64 },
}

impl std::fmt::Display for CommandDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChangeAltitude { delta } => write!(f, "CHANGE ALTITUDE: {}", delta),
            Self::ChangeYaw { delta } => write!(f, "CHANGE YAW: {}", delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandArgs {
    pub connection: String,
    pub target: Position,
    pub queue_timeout_ms: u64,
    /// Pause after each telemetry frame; slows the consumer on purpose.
    pub min_interval_ms: u64,
}

impl Default for CommandArgs {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            target: Position::default(),
            queue_timeout_ms: 1000,
            min_interval_ms: 0,
        }
    }
}

/// Fold a heading difference into [-180, 180].
fn wrap_degrees(delta: f64) -> f64 {
    if delta > 180.0 {
        delta - 360.0
    } else if delta < -180.0 {
        delta + 360.0
    } else {
        delta
    }
}

/// Decides and sends corrections toward `target`.
pub struct Command {
    link: Box<dyn VehicleLink>,
    target: Position,
    runs: u64,
    total_velocity: Position,
}

impl Command {
    pub fn new(link: Box<dyn VehicleLink>, target: Position) -> Self {
        Self {
            link,
            target,
            runs: 0,
            total_velocity: Position::default(),
        }
    }

    /// Average velocity over every frame seen so far.
    pub fn average_velocity(&self) -> Position {
        if self.runs == 0 {
            return Position::default();
        }
        let n = self.runs as f64;
        Position::new(
            self.total_velocity.x / n,
            self.total_velocity.y / n,
            self.total_velocity.z / n,
        )
    }

    /// Process one frame. Altitude is corrected before heading.
    pub fn run(&mut self, data: &TelemetryData) -> Result<Option<CommandDecision>, LinkError> {
        self.runs += 1;
        self.total_velocity.x += data.x_velocity;
        self.total_velocity.y += data.y_velocity;
        self.total_velocity.z += data.z_velocity;
        let avg = self.average_velocity();
        debug!(vx = avg.x, vy = avg.y, vz = avg.z, "Average velocity so far");

        let dz = self.target.z - data.z;
        if dz.abs() > ALTITUDE_TOLERANCE {
            self.link.send_command(VehicleCommand::ChangeAltitude {
                altitude: self.target.z,
            })?;
            return Ok(Some(CommandDecision::ChangeAltitude { delta: dz }));
        }

        let target_yaw = (self.target.y - data.y)
            .atan2(self.target.x - data.x)
            .to_degrees();
        let delta = wrap_degrees(target_yaw - data.yaw.to_degrees());
        if delta.abs() > YAW_TOLERANCE_DEG {
            self.link.send_command(VehicleCommand::ConditionYaw {
                angle_deg: delta.abs(),
                rate_deg_s: YAW_RATE_DEG_S,
                direction: if delta > 0.0 { 1 } else { -1 },
                relative: true,
            })?;
            return Ok(Some(CommandDecision::ChangeYaw { delta }));
        }

        Ok(None)
    }
}

struct CommandWorker {
    command: Command,
    input: InputPort<TelemetryData>,
    out: OutputPort<CommandDecision>,
    queue_timeout: Duration,
    min_interval: Duration,
}

impl Routine for CommandWorker {
    fn step(&mut self, ctx: &WorkerContext) -> Step {
        let data = match self.input.get(self.queue_timeout) {
            Ok(data) => data,
            Err(QueueError::Empty) => return Step::Continue,
            Err(e) => {
                warn!(queue = self.input.name(), error = %e, "Failed to read telemetry");
                return Step::Continue;
            }
        };

        match self.command.run(&data) {
            Ok(Some(decision)) => {
                info!(%decision, "Command decided");
                if let Err(e) = self.out.put_until_exit(&decision, self.queue_timeout) {
                    error!(queue = self.out.name(), error = %e, "Failed to publish decision");
                }
            }
            Ok(None) => debug!("On course, no command"),
            Err(e) => {
                error!(error = %e, "Failed to send command");
                return Step::Done;
            }
        }

        if !self.min_interval.is_zero() {
            ctx.sleep(self.min_interval);
        }
        Step::Continue
    }
}

fn build(args: &Value, ctx: &WorkerContext) -> Result<Box<dyn Routine>, SetupError> {
    let args: CommandArgs = parse_args(args)?;
    let link = link::connect(&args.connection)?;
    Ok(Box::new(CommandWorker {
        command: Command::new(link, args.target),
        input: ctx.input(0)?,
        out: ctx.output(0)?,
        queue_timeout: Duration::from_millis(args.queue_timeout_ms),
        min_interval: Duration::from_millis(args.min_interval_ms),
    }))
}

pub const COMMAND: RoutineRef = RoutineRef {
    name: "command",
    inputs: 1,
    outputs: 1,
    factory: build,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::test_link::ScriptedLink;

    fn frame(x: f64, y: f64, z: f64, yaw_deg: f64) -> TelemetryData {
        TelemetryData {
            time_since_boot: 0,
            x,
            y,
            z,
            x_velocity: 1.0,
            y_velocity: -1.0,
            z_velocity: 0.5,
            roll: 0.0,
            pitch: 0.0,
            yaw: yaw_deg.to_radians(),
            roll_speed: 0.0,
            pitch_speed: 0.0,
            yaw_speed: 0.0,
        }
    }

    fn delta_of(decision: Option<CommandDecision>) -> f64 {
        match decision {
            Some(
                CommandDecision::ChangeAltitude { delta } | CommandDecision::ChangeYaw { delta },
            ) => delta,
            None => panic!("expected a decision"),
        }
    }

    #[test]
    fn test_altitude_takes_priority() {
        let link = ScriptedLink::default();
        let mut command = Command::new(Box::new(link.clone()), Position::new(0.0, 0.0, 10.0));

        let decision = command.run(&frame(5.0, 5.0, 8.0, 90.0)).unwrap();
        assert!(matches!(decision, Some(CommandDecision::ChangeAltitude { .. })));
        assert!((delta_of(decision) - 2.0).abs() < 1e-9);
        assert_eq!(
            link.commands(),
            vec![VehicleCommand::ChangeAltitude { altitude: 10.0 }]
        );
    }

    #[test]
    fn test_altitude_tolerance() {
        let link = ScriptedLink::default();
        let mut command = Command::new(Box::new(link.clone()), Position::new(10.0, 0.0, 1.0));
        // dz = 0.5 is within tolerance, heading east matches yaw 0.
        assert_eq!(command.run(&frame(0.0, 0.0, 0.5, 0.0)).unwrap(), None);
        assert!(link.commands().is_empty());
    }

    #[test]
    fn test_yaw_toward_target() {
        let link = ScriptedLink::default();
        let mut command = Command::new(Box::new(link.clone()), Position::new(0.0, 10.0, 0.0));

        // Target straight along +y: atan2(10, 0) = 90 degrees.
        let decision = command.run(&frame(0.0, 0.0, 0.0, 30.0)).unwrap();
        assert!(matches!(decision, Some(CommandDecision::ChangeYaw { .. })));
        assert!((delta_of(decision) - 60.0).abs() < 1e-9);

        let sent = link.commands();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            VehicleCommand::ConditionYaw {
                direction: 1,
                relative: true,
                ..
            }
        ));
    }

    #[test]
    fn test_yaw_wraps_around() {
        let link = ScriptedLink::default();
        let mut command = Command::new(Box::new(link.clone()), Position::new(-10.0, -1.0, 0.0));

        // Target heading is about -174.3 degrees; current 170 degrees.
        // Raw delta -344.3 wraps to +15.7.
        let delta = delta_of(command.run(&frame(0.0, 0.0, 0.0, 170.0)).unwrap());
        let expected = (-1.0f64).atan2(-10.0).to_degrees() - 170.0 + 360.0;
        assert!((delta - expected).abs() < 1e-9);
        assert!(delta > 0.0 && delta <= 180.0);
    }

    #[test]
    fn test_small_yaw_error_ignored() {
        let link = ScriptedLink::default();
        let mut command = Command::new(Box::new(link.clone()), Position::new(10.0, 0.0, 0.0));
        assert_eq!(command.run(&frame(0.0, 0.0, 0.0, 4.0)).unwrap(), None);
        assert!(link.commands().is_empty());
    }

    #[test]
    fn test_average_velocity() {
        let mut command = Command::new(Box::new(ScriptedLink::default()), Position::default());
        assert_eq!(command.average_velocity(), Position::default());
        command.run(&frame(0.0, 0.0, 0.0, 0.0)).unwrap();
        let mut second = frame(0.0, 0.0, 0.0, 0.0);
        second.x_velocity = 3.0;
        command.run(&second).unwrap();
        assert_eq!(command.average_velocity(), Position::new(2.0, -1.0, 0.5));
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(
            CommandDecision::ChangeAltitude { delta: -1.5 }.to_string(),
            "CHANGE ALTITUDE: -1.5"
        );
        assert_eq!(
            CommandDecision::ChangeYaw { delta: 42.0 }.to_string(),
            "CHANGE YAW: 42"
        );
    }

    #[test]
    fn test_position_parsing() {
        assert_eq!(
            "1, -2.5,3".parse::<Position>().unwrap(),
            Position::new(1.0, -2.5, 3.0)
        );
        assert!("1,2".parse::<Position>().is_err());
        assert!("1,2,z".parse::<Position>().is_err());
    }
}
