//! Worker subprocess entry point.
//!
//! Runs when `mavflow worker --routine NAME --replica N` is invoked by a
//! pool. stdin/stdout are the broker link; nothing else may write to stdout.

use super::broker::BrokerClient;
use super::ipc::{LineReader, LineWriter, PipeFd};
use super::routine::{RoutineRegistry, WorkerContext, run_worker};
use super::signals::{EXIT_PROTOCOL, EXIT_UNKNOWN_ROUTINE};
use nix::sys::signal::{SigHandler, Signal, signal};
use std::sync::Arc;
use tracing::{error, info};

/// Ignore SIGINT (the parent turns Ctrl-C into an exit request) and SIGPIPE
/// (pipe errors surface as `io::Error`).
fn ignore_signals() {
    for sig in [Signal::SIGINT, Signal::SIGPIPE] {
        // Safety: installing SIG_IGN runs no handler code.
        unsafe {
            signal(sig, SigHandler::SigIgn).ok();
        }
    }
}

/// Run one replica of `routine` against the parent's broker and return the
/// process exit code.
pub fn run_worker_main(registry: &RoutineRegistry, routine: &str, replica: usize) -> i32 {
    ignore_signals();

    // Safety: file descriptors 0 and 1 are the pipes set up by the parent and
    // are not used through std's handles in worker mode.
    let reader = LineReader::new(unsafe { PipeFd::from_raw(0) });
    let writer = LineWriter::new(unsafe { PipeFd::from_raw(1) });

    let (client, launch) = match BrokerClient::handshake(reader, writer) {
        Ok(pair) => pair,
        Err(e) => {
            error!(routine, replica, error = %e, "Failed to receive launch parameters");
            return EXIT_PROTOCOL;
        }
    };

    let Some(routine_ref) = registry.get(routine) else {
        error!(routine, "Unknown routine");
        return EXIT_UNKNOWN_ROUTINE;
    };

    let ctx = WorkerContext::new(
        routine_ref.name,
        replica,
        Arc::new(client),
        launch.inputs,
        launch.outputs,
    );
    let outcome = run_worker(&routine_ref, &launch.args, &ctx, launch.setup_failure);
    info!(routine, replica, ?outcome, "Worker process exiting");
    outcome.exit_code()
}
