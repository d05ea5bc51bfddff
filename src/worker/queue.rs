//! Bounded multi-producer/multi-consumer queue with a shutdown drain.
//!
//! Built on `crossbeam_channel`. The parent process owns every queue; child
//! processes reach them through the broker using the type-erased
//! [`SharedQueue`] view, which moves items as JSON values.

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded, unbounded,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-read timeout used while draining.
const DRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Upper bound on a single drain call.
const DRAIN_BUDGET: Duration = Duration::from_secs(2);

/// Queue operation outcome other than success.
///
/// `Full` and `Empty` are timeout conditions: callers treat them as a normal
/// poll cycle and retry. The remaining variants are real failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,

    #[error("queue is empty")]
    Empty,

    #[error("queue {index} is not bound (worker has {available})")]
    NotBound { index: usize, available: usize },

    #[error("invalid queue payload: {0}")]
    Payload(String),

    #[error("queue transport failed: {0}")]
    Transport(String),
}

impl QueueError {
    /// True for the recoverable no-room / no-item outcomes.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Full | Self::Empty)
    }
}

/// Queue entry. Fillers are pushed by [`BoundedQueue::drain_and_unblock`]
/// to wake blocked readers and are never returned as items.
pub(crate) enum Slot<T> {
    Item(T),
    Filler,
}

/// Capacity-limited FIFO shared by every holder.
///
/// Cloning is cheap and yields another handle to the same queue.
pub struct BoundedQueue<T> {
    name: Arc<str>,
    capacity: Option<usize>,
    tx: Sender<Slot<T>>,
    rx: Receiver<Slot<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.rx.len())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue. `capacity <= 0` means unbounded.
    pub fn new(name: impl Into<String>, capacity: i64) -> Self {
        let capacity = usize::try_from(capacity).ok().filter(|&c| c > 0);
        let (tx, rx) = match capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        Self {
            name: Arc::from(name.into()),
            capacity,
            tx,
            rx,
        }
    }

    /// Queue name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum length, or `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueue, blocking up to `timeout` while the queue is full.
    pub fn enqueue(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        match self.tx.send_timeout(Slot::Item(item), timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::Full),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(QueueError::Transport(format!("{} disconnected", self.name)))
            }
        }
    }

    /// Dequeue, blocking up to `timeout` while the queue is empty.
    ///
    /// A filler left by a drain also surfaces as [`QueueError::Empty`].
    pub fn dequeue(&self, timeout: Duration) -> Result<T, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Slot::Item(item)) => Ok(item),
            Ok(Slot::Filler) | Err(RecvTimeoutError::Timeout) => Err(QueueError::Empty),
            Err(RecvTimeoutError::Disconnected) => {
                Err(QueueError::Transport(format!("{} disconnected", self.name)))
            }
        }
    }

    /// Dequeue without waiting.
    pub fn try_dequeue(&self) -> Result<T, QueueError> {
        match self.rx.try_recv() {
            Ok(Slot::Item(item)) => Ok(item),
            Ok(Slot::Filler) | Err(TryRecvError::Empty) => Err(QueueError::Empty),
            Err(TryRecvError::Disconnected) => {
                Err(QueueError::Transport(format!("{} disconnected", self.name)))
            }
        }
    }

    /// Fill with fillers, then discard everything until the queue is empty.
    ///
    /// Fillers wake any reader blocked in `dequeue`; the discard phase makes
    /// room for any writer blocked in `enqueue`. Returns the number of real
    /// items discarded. Never blocks longer than an internal budget, even if
    /// producers keep adding while it runs.
    ///
    /// At most `capacity` fillers are pushed (one for an unbounded queue).
    /// Readers blocked beyond that count are not woken and return `Empty`
    /// when their own timeout expires.
    pub fn drain_and_unblock(&self) -> usize {
        let fillers = self.capacity.unwrap_or(1);
        let mut pushed = 0;
        while pushed < fillers && self.tx.try_send(Slot::Filler).is_ok() {
            pushed += 1;
        }
        if pushed > 0 {
            // Give woken readers a chance to take a filler before we do.
            std::thread::sleep(DRAIN_POLL_TIMEOUT);
        }

        let deadline = Instant::now() + DRAIN_BUDGET;
        let mut discarded = 0;
        loop {
            match self.rx.recv_timeout(DRAIN_POLL_TIMEOUT) {
                Ok(Slot::Item(_)) => discarded += 1,
                Ok(Slot::Filler) => {}
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                warn!(
                    queue = %self.name,
                    remaining = self.rx.len(),
                    "Drain budget exhausted while producers were still writing"
                );
                break;
            }
        }

        debug!(queue = %self.name, discarded, "Queue drained");
        discarded
    }

    /// Receiver used by the orchestrator's readiness wait.
    pub(crate) fn receiver(&self) -> &Receiver<Slot<T>> {
        &self.rx
    }
}

/// Type-erased queue view used by worker transports.
pub trait SharedQueue: Send + Sync {
    fn name(&self) -> &str;

    fn enqueue_value(&self, item: Value, timeout: Duration) -> Result<(), QueueError>;

    fn dequeue_value(&self, timeout: Duration) -> Result<Value, QueueError>;
}

/// Shared handle to a queue, as bound into worker descriptors.
pub type QueueRef = Arc<dyn SharedQueue>;

impl<T> BoundedQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Type-erased handle for binding this queue to workers.
    pub fn shared(&self) -> QueueRef {
        Arc::new(self.clone())
    }
}

impl<T> SharedQueue for BoundedQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        BoundedQueue::name(self)
    }

    fn enqueue_value(&self, item: Value, timeout: Duration) -> Result<(), QueueError> {
        let item: T =
            serde_json::from_value(item).map_err(|e| QueueError::Payload(e.to_string()))?;
        self.enqueue(item, timeout)
    }

    fn dequeue_value(&self, timeout: Duration) -> Result<Value, QueueError> {
        let item = self.dequeue(timeout)?;
        serde_json::to_value(item).map_err(|e| QueueError::Payload(e.to_string()))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u16),
        Dequeue,
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => any::<u16>().prop_map(Op::Enqueue),
            3 => Just(Op::Dequeue),
            1 => Just(Op::Drain),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A positive-capacity queue never holds more than its capacity and
        /// behaves like a FIFO model.
        #[test]
        fn capacity_never_exceeded(capacity in 1i64..6, ops in prop::collection::vec(op(), 1..40)) {
            let queue = BoundedQueue::new("prop", capacity);
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Enqueue(v) => {
                        let result = queue.enqueue(v, Duration::ZERO);
                        if model.len() < capacity as usize {
                            prop_assert_eq!(result, Ok(()));
                            model.push_back(v);
                        } else {
                            prop_assert_eq!(result, Err(QueueError::Full));
                        }
                    }
                    Op::Dequeue => {
                        let result = queue.try_dequeue();
                        match model.pop_front() {
                            Some(expected) => prop_assert_eq!(result, Ok(expected)),
                            None => prop_assert_eq!(result, Err(QueueError::Empty)),
                        }
                    }
                    Op::Drain => {
                        prop_assert_eq!(queue.drain_and_unblock(), model.len());
                        model.clear();
                    }
                }
                prop_assert!(queue.len() <= capacity as usize);
                prop_assert_eq!(queue.len(), model.len());
            }
        }
    }
}
