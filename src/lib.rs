//! mavflow - a small multi-process pipeline for a MAVLink-style vehicle.
//!
//! Four worker roles (heartbeat sender, heartbeat receiver, telemetry,
//! command) run as pools of OS processes connected by bounded queues and
//! share one exit signal. The orchestrator in [`pipeline`] runs a bounded
//! session and shuts everything down in a fixed order.
//!
//! ```no_run
//! use mavflow::config::SessionConfig;
//! use mavflow::pipeline::run_session;
//! use mavflow::worker::{ExitSignal, Launcher};
//!
//! let outcome = run_session(&SessionConfig::default(), Launcher::Threads, &ExitSignal::new());
//! assert_eq!(outcome.status, 0);
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod pipeline;
pub mod roles;
pub mod worker;

pub use config::SessionConfig;
pub use error::{MavflowError, Result};
pub use pipeline::{Pipeline, PipelineState, SessionOutcome, SessionReport, run_session};
