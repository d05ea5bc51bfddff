//! Session-wide exit signal.
//!
//! The orchestrator owns the flag. Thread workers read it directly; process
//! workers reach it through the broker (see `broker.rs`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared exit flag with two states: Running and ExitRequested.
///
/// Clones share the same flag. Once requested, the flag stays set until
/// [`ExitSignal::clear_exit`] is called, which callers must only do after
/// every worker observing the signal has been joined.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
    requested: Arc<AtomicBool>,
}

impl ExitSignal {
    /// Create a signal in the Running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request exit. Idempotent.
    pub fn request_exit(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Non-blocking read of the flag.
    pub fn is_exit_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Reset to Running.
    pub fn clear_exit(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
