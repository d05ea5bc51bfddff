//! The four pipeline roles and their domain records.
//!
//! Each role splits into a domain object (talks to the vehicle link, easy to
//! test on its own) and a thin [`Routine`](crate::worker::Routine) that moves
//! its results through the worker's queues.

pub mod command;
pub mod heartbeat_receiver;
pub mod heartbeat_sender;
pub mod telemetry;

pub use command::{COMMAND, Command, CommandArgs, CommandDecision, Position};
pub use heartbeat_receiver::{
    HEARTBEAT_RECEIVER, HeartbeatReceiver, HeartbeatReceiverArgs, HeartbeatStatus,
};
pub use heartbeat_sender::{HEARTBEAT_SENDER, HeartbeatSender, HeartbeatSenderArgs};
pub use telemetry::{TELEMETRY, Telemetry, TelemetryArgs, TelemetryData};

use crate::worker::{RoutineRegistry, SetupError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default vehicle connection.
pub const DEFAULT_CONNECTION: &str = "sim";

/// Every routine the `mavflow` binary can run in worker mode.
pub fn registry() -> RoutineRegistry {
    RoutineRegistry::new()
        .with(HEARTBEAT_SENDER)
        .with(HEARTBEAT_RECEIVER)
        .with(TELEMETRY)
        .with(COMMAND)
}

/// Decode routine arguments; `null` means all defaults.
fn parse_args<T: DeserializeOwned + Default>(args: &Value) -> Result<T, SetupError> {
    if args.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(args.clone())?)
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_roles() {
        let registry = registry();
        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["command", "heartbeat_receiver", "heartbeat_sender", "telemetry"]
        );

        let command = registry.get("command").unwrap();
        assert_eq!((command.inputs, command.outputs), (1, 1));
        let sender = registry.get("heartbeat_sender").unwrap();
        assert_eq!((sender.inputs, sender.outputs), (0, 0));
    }

    #[test]
    fn test_null_args_use_defaults() {
        let args: HeartbeatReceiverArgs = parse_args(&Value::Null).unwrap();
        assert_eq!(args, HeartbeatReceiverArgs::default());

        let err = parse_args::<HeartbeatReceiverArgs>(&serde_json::json!({"threshold": "five"}));
        assert!(matches!(err, Err(SetupError::InvalidArgs(_))));
    }
}
