//! Simulated vehicle.
//!
//! Emits heartbeats and telemetry on a fixed schedule measured from its own
//! creation, flies a constant horizontal velocity, and follows altitude and
//! yaw commands at bounded rates.

use super::{
    Attitude, LinkError, LocalPositionNed, Message, MessageKind, VehicleCommand, VehicleLink,
};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::trace;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Ground speed of the simulated vehicle (north, east), m/s.
const CRUISE_VELOCITY: (f64, f64) = (0.4, -0.3);

/// Maximum climb/descent rate, m/s.
const MAX_CLIMB_RATE: f64 = 1.0;

/// Starting position (north, east, down), metres.
const START_POSITION: (f64, f64, f64) = (12.0, -4.0, -0.2);

/// Simulator knobs, parsed from the part after `sim:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOptions {
    pub heartbeat_interval: Duration,
    pub telemetry_interval: Duration,
    /// Never send heartbeats (simulates a lost vehicle).
    pub silent: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            silent: false,
        }
    }
}

fn parse_interval(item: &str, value: &str) -> Result<Duration, LinkError> {
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(LinkError::InvalidOption(item.to_string())),
    }
}

impl FromStr for SimOptions {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            match item.split_once('=') {
                Some(("heartbeat_ms", value)) => {
                    options.heartbeat_interval = parse_interval(item, value)?
                }
                Some(("telemetry_ms", value)) => {
                    options.telemetry_interval = parse_interval(item, value)?
                }
                None if item == "silent" => options.silent = true,
                _ => return Err(LinkError::InvalidOption(item.to_string())),
            }
        }
        Ok(options)
    }
}

/// In-process simulated vehicle.
pub struct SimVehicle {
    options: SimOptions,
    started: Instant,
    last_update: Instant,
    next_heartbeat: Option<Instant>,
    next_attitude: Instant,
    next_position: Instant,
    north: f64,
    east: f64,
    down: f64,
    v_down: f64,
    yaw: f64,
    yaw_rate: f64,
    target_down: Option<f64>,
    target_yaw: Option<f64>,
    heartbeats_received: u64,
}

impl SimVehicle {
    pub fn new(options: SimOptions) -> Self {
        let now = Instant::now();
        let (north, east, down) = START_POSITION;
        Self {
            options,
            started: now,
            last_update: now,
            next_heartbeat: (!options.silent).then(|| now + options.heartbeat_interval),
            next_attitude: now + options.telemetry_interval,
            // Offset so the two telemetry streams interleave.
            next_position: now + options.telemetry_interval + options.telemetry_interval / 2,
            north,
            east,
            down,
            v_down: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            target_down: None,
            target_yaw: None,
            heartbeats_received: 0,
        }
    }

    /// Heartbeats received from the ground station.
    pub fn heartbeats_received(&self) -> u64 {
        self.heartbeats_received
    }

    /// Current (north, east, down) position.
    pub fn position_ned(&self) -> (f64, f64, f64) {
        (self.north, self.east, self.down)
    }

    /// Current heading, radians.
    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    fn time_boot_ms(&self, now: Instant) -> u32 {
        u32::try_from(now.duration_since(self.started).as_millis()).unwrap_or(u32::MAX)
    }

    fn advance(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        self.north += CRUISE_VELOCITY.0 * dt;
        self.east += CRUISE_VELOCITY.1 * dt;

        self.v_down = match self.target_down {
            Some(target) => {
                let remaining = target - self.down;
                if remaining.abs() <= MAX_CLIMB_RATE * dt {
                    self.down = target;
                    self.target_down = None;
                    0.0
                } else {
                    let v = MAX_CLIMB_RATE.copysign(remaining);
                    self.down += v * dt;
                    v
                }
            }
            None => 0.0,
        };

        if let Some(target) = self.target_yaw {
            let remaining = wrap_pi(target - self.yaw);
            let step = self.yaw_rate.abs() * dt;
            if remaining.abs() <= step {
                self.yaw = wrap_pi(target);
                self.target_yaw = None;
                self.yaw_rate = 0.0;
            } else {
                self.yaw = wrap_pi(self.yaw + step.copysign(remaining));
            }
        }
    }

    fn next_due(&self, kinds: &[MessageKind]) -> Option<(Instant, MessageKind)> {
        kinds
            .iter()
            .filter_map(|kind| {
                let due = match kind {
                    MessageKind::Heartbeat => self.next_heartbeat?,
                    MessageKind::Attitude => self.next_attitude,
                    MessageKind::LocalPositionNed => self.next_position,
                };
                Some((due, *kind))
            })
            .min_by_key(|(due, _)| *due)
    }

    fn emit(&mut self, kind: MessageKind, now: Instant) -> Message {
        let reschedule = |due: Instant, interval: Duration| (due + interval).max(now);
        let time_boot_ms = self.time_boot_ms(now);
        match kind {
            MessageKind::Heartbeat => {
                if let Some(due) = self.next_heartbeat {
                    self.next_heartbeat = Some(reschedule(due, self.options.heartbeat_interval));
                }
                Message::Heartbeat
            }
            MessageKind::Attitude => {
                self.next_attitude =
                    reschedule(self.next_attitude, self.options.telemetry_interval);
                Message::Attitude(Attitude {
                    time_boot_ms,
                    roll: 0.01,
                    pitch: -0.02,
                    yaw: self.yaw,
                    rollspeed: 0.0,
                    pitchspeed: 0.0,
                    yawspeed: if self.target_yaw.is_some() { self.yaw_rate } else { 0.0 },
                })
            }
            MessageKind::LocalPositionNed => {
                self.next_position =
                    reschedule(self.next_position, self.options.telemetry_interval);
                Message::LocalPositionNed(LocalPositionNed {
                    time_boot_ms,
                    x: self.north,
                    y: self.east,
                    z: self.down,
                    vx: CRUISE_VELOCITY.0,
                    vy: CRUISE_VELOCITY.1,
                    vz: self.v_down,
                })
            }
        }
    }
}

/// Wrap an angle to (-pi, pi].
fn wrap_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

impl VehicleLink for SimVehicle {
    fn send_heartbeat(&mut self) -> Result<(), LinkError> {
        self.heartbeats_received += 1;
        Ok(())
    }

    fn recv_match(
        &mut self,
        kinds: &[MessageKind],
        timeout: Duration,
    ) -> Result<Option<Message>, LinkError> {
        let deadline = Instant::now() + timeout;
        match self.next_due(kinds) {
            Some((due, kind)) if due <= deadline => {
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
                let now = Instant::now();
                self.advance(now);
                Ok(Some(self.emit(kind, now)))
            }
            _ => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
                self.advance(Instant::now());
                Ok(None)
            }
        }
    }

    fn send_command(&mut self, command: VehicleCommand) -> Result<(), LinkError> {
        self.advance(Instant::now());
        trace!(?command, "Simulated vehicle received command");
        match command {
            VehicleCommand::ChangeAltitude { altitude } => {
                self.target_down = Some(-altitude);
            }
            VehicleCommand::ConditionYaw {
                angle_deg,
                rate_deg_s,
                direction,
                relative,
            } => {
                let angle = angle_deg.to_radians();
                let target = if relative {
                    self.yaw + angle * f64::from(direction.signum())
                } else {
                    angle
                };
                self.target_yaw = Some(wrap_pi(target));
                self.yaw_rate = rate_deg_s.to_radians();
            }
        }
        Ok(())
    }
}
