//! Vehicle link: the boundary to the controlled vehicle.
//!
//! Roles only see the [`VehicleLink`] trait. [`connect`] resolves a
//! connection string; the built-in `sim` scheme runs a simulated vehicle in
//! the calling process, so every worker gets its own instance.

mod sim;

pub use sim::{SimOptions, SimVehicle};

use crate::worker::SetupError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Link failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("unsupported connection '{0}' (supported: sim, sim:key=value,...)")]
    Unsupported(String),

    #[error("invalid connection option '{0}'")]
    InvalidOption(String),

    #[error("link closed")]
    Closed,
}

impl From<LinkError> for SetupError {
    fn from(err: LinkError) -> Self {
        SetupError::Failed(format!("vehicle link unavailable: {}", err))
    }
}

/// Message types a caller can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    Attitude,
    LocalPositionNed,
}

/// Vehicle attitude. Angles in radians, rates in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub time_boot_ms: u32,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub rollspeed: f64,
    pub pitchspeed: f64,
    pub yawspeed: f64,
}

/// Local position in the North-East-Down frame, metres and m/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPositionNed {
    pub time_boot_ms: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

/// Message received from the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Heartbeat,
    Attitude(Attitude),
    LocalPositionNed(LocalPositionNed),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Heartbeat => MessageKind::Heartbeat,
            Self::Attitude(_) => MessageKind::Attitude,
            Self::LocalPositionNed(_) => MessageKind::LocalPositionNed,
        }
    }
}

/// Command sent to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VehicleCommand {
    /// Climb or descend to `altitude` metres (up positive).
    ChangeAltitude { altitude: f64 },
    /// Turn by `angle_deg` at `rate_deg_s`; `direction` is 1 (clockwise)
    /// or -1.
    ConditionYaw {
        angle_deg: f64,
        rate_deg_s: f64,
        direction: i8,
        relative: bool,
    },
}

/// Connection to a vehicle.
pub trait VehicleLink: Send {
    /// Announce this ground station.
    fn send_heartbeat(&mut self) -> Result<(), LinkError>;

    /// Wait up to `timeout` for the next message of one of `kinds`.
    fn recv_match(
        &mut self,
        kinds: &[MessageKind],
        timeout: Duration,
    ) -> Result<Option<Message>, LinkError>;

    fn send_command(&mut self, command: VehicleCommand) -> Result<(), LinkError>;
}

/// Open a link from a connection string.
pub fn connect(connection: &str) -> Result<Box<dyn VehicleLink>, LinkError> {
    let (scheme, options) = match connection.split_once(':') {
        Some((scheme, options)) => (scheme, options),
        None => (connection, ""),
    };
    match scheme {
        "sim" => {
            let options: SimOptions = options.parse()?;
            Ok(Box::new(SimVehicle::new(options)))
        }
        _ => Err(LinkError::Unsupported(connection.to_string())),
    }
}
