//! How a running routine reaches its queues and the exit signal.
//!
//! Thread workers use [`LocalTransport`] and touch the parent's objects
//! directly. Process workers use the broker client, which forwards each call
//! over the IPC pipes.

use super::exit::ExitSignal;
use super::queue::{QueueError, QueueRef};
use serde_json::Value;
use std::time::Duration;

/// Queue and exit-signal access as seen from inside a worker.
///
/// Queue indices refer to the descriptor's ordered input/output lists.
pub trait Transport: Send + Sync {
    fn enqueue(&self, output: usize, item: Value, timeout: Duration) -> Result<(), QueueError>;

    fn dequeue(&self, input: usize, timeout: Duration) -> Result<Value, QueueError>;

    fn request_exit(&self);

    fn is_exit_requested(&self) -> bool;
}

/// In-process transport over the parent's own queues.
pub struct LocalTransport {
    exit: ExitSignal,
    inputs: Vec<QueueRef>,
    outputs: Vec<QueueRef>,
}

impl LocalTransport {
    pub fn new(exit: ExitSignal, inputs: Vec<QueueRef>, outputs: Vec<QueueRef>) -> Self {
        Self {
            exit,
            inputs,
            outputs,
        }
    }
}

/// Look up a bound queue by index.
pub(crate) fn bound(queues: &[QueueRef], index: usize) -> Result<&QueueRef, QueueError> {
    queues.get(index).ok_or(QueueError::NotBound {
        index,
        available: queues.len(),
    })
}

impl Transport for LocalTransport {
    fn enqueue(&self, output: usize, item: Value, timeout: Duration) -> Result<(), QueueError> {
        bound(&self.outputs, output)?.enqueue_value(item, timeout)
    }

    fn dequeue(&self, input: usize, timeout: Duration) -> Result<Value, QueueError> {
        bound(&self.inputs, input)?.dequeue_value(timeout)
    }

    fn request_exit(&self) {
        self.exit.request_exit();
    }

    fn is_exit_requested(&self) -> bool {
        self.exit.is_exit_requested()
    }
}
