//! Termination analysis for worker replicas.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Worker exited after its loop finished normally.
pub const EXIT_CLEAN: i32 = 0;

/// Exit code clap uses when it rejects a command line.
pub const EXIT_USAGE: i32 = 2;

// Worker codes stay clear of 1 (error in main) and 2 (usage).

/// Worker lost or garbled its broker link during startup.
pub const EXIT_PROTOCOL: i32 = 5;

/// Routine factory failed.
pub const EXIT_SETUP_FAILED: i32 = 6;

/// Routine name not present in the child's registry.
pub const EXIT_UNKNOWN_ROUTINE: i32 = 7;

/// Reason why a worker replica terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Thread worker panicked.
    Panicked,
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(EXIT_CLEAN))
    }

    /// True when the routine never got past its setup.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Exited(EXIT_SETUP_FAILED))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(EXIT_CLEAN) => "exited cleanly".to_string(),
            Self::Exited(EXIT_PROTOCOL) => "exited after an IPC protocol failure".to_string(),
            Self::Exited(EXIT_SETUP_FAILED) => "exited after routine setup failed".to_string(),
            Self::Exited(EXIT_UNKNOWN_ROUTINE) => "exited: unknown routine".to_string(),
            Self::Exited(EXIT_USAGE) => "exited: command line rejected".to_string(),
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Panicked => "panicked".to_string(),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
