//! Worker runtime: exit signal, bounded queues, descriptors and pools.
//!
//! Pools run each replica as a separate OS process (the `mavflow` binary in
//! hidden `worker` mode) or, for embedding and tests, as a thread. The parent
//! owns every queue and the exit signal; process replicas reach them through
//! a per-child broker thread speaking newline-delimited JSON over the
//! child's stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────────── Parent process ────────────────────────────┐
//!   │  ExitSignal   BoundedQueue A   BoundedQueue B   BoundedQueue C         │
//!   │       ▲             ▲                ▲                ▲                │
//!   │       └─────────────┴───────┬────────┴────────────────┘                │
//!   │                 ┌───────────┼───────────┐                              │
//!   │            broker #0    broker #1    broker #N   (one thread per child)│
//!   └─────────────────┬───────────┬───────────┬──────────────────────────────┘
//!                stdin/stdout  stdin/stdout  stdin/stdout
//!               ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!               │ Worker 0  │ │ Worker 1  │ │ Worker N  │
//!               │ (process) │ │ (process) │ │ (process) │
//!               └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! # Shutdown
//!
//! Cancellation is cooperative: the orchestrator sets the exit signal, drains
//! the queues downstream to upstream so no replica stays blocked, then joins
//! every pool. A worker whose broker link breaks treats exit as requested.

mod broker;
mod descriptor;
mod exit;
mod ipc;
mod pool;
mod proc;
mod protocol;
mod queue;
mod routine;
mod signals;
mod spawn;
mod transport;
pub mod worker_main;

pub use broker::{BrokerClient, BrokerSession, BrokerStats};
pub use descriptor::{ValidationError, WorkerDescriptor};
pub use exit::ExitSignal;
pub use pool::{JoinReport, Pool, ReplicaReport};
pub use protocol::{BrokerReply, BrokerRequest, WorkerLaunch};
pub use queue::{BoundedQueue, QueueError, QueueRef, SharedQueue};
pub use routine::{
    InputPort, OutputPort, Routine, RoutineFactory, RoutineRef, RoutineRegistry, SetupError,
    SetupFailurePolicy, Step, WorkerContext, WorkerOutcome, run_worker,
};
pub use signals::{
    EXIT_CLEAN, EXIT_PROTOCOL, EXIT_SETUP_FAILED, EXIT_UNKNOWN_ROUTINE, EXIT_USAGE,
    TerminationReason,
};
pub use spawn::{Launcher, ProcessLauncher};
pub use transport::{LocalTransport, Transport};
pub use worker_main::run_worker_main;

pub(crate) use queue::Slot;
