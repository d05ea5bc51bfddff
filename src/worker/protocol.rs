//! IPC protocol between the orchestrator and worker subprocesses.
//!
//! Messages are JSON-serialized and newline-delimited. The parent writes one
//! [`WorkerLaunch`] line first; after that the child sends
//! [`BrokerRequest`]s and the parent answers each with one [`BrokerReply`].

use super::routine::SetupFailurePolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First message on a worker's stdin: everything the child needs to build
/// its routine and bind its queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLaunch {
    /// Fixed routine arguments.
    pub args: Value,
    /// Names of the bound input queues, in order.
    pub inputs: Vec<String>,
    /// Names of the bound output queues, in order.
    pub outputs: Vec<String>,
    /// What to do when the routine factory fails.
    #[serde(default)]
    pub setup_failure: SetupFailurePolicy,
}

/// Request from worker to broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerRequest {
    /// Enqueue onto output queue `queue`.
    #[serde(rename = "put")]
    Put {
        queue: usize,
        item: Value,
        timeout_ms: u64,
    },

    /// Dequeue from input queue `queue`.
    #[serde(rename = "get")]
    Get { queue: usize, timeout_ms: u64 },

    /// Read the exit signal.
    #[serde(rename = "exit_status")]
    ExitStatus,

    /// Set the exit signal.
    #[serde(rename = "request_exit")]
    RequestExit,
}

/// Reply from broker to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerReply {
    /// Put accepted, or exit request recorded.
    #[serde(rename = "ok")]
    Ok,

    /// Dequeued item.
    #[serde(rename = "item")]
    Item { item: Value },

    /// Put timed out on a full queue.
    #[serde(rename = "full")]
    Full,

    /// Get timed out on an empty queue (or hit a drain filler).
    #[serde(rename = "empty")]
    Empty,

    /// Current state of the exit signal.
    #[serde(rename = "exit")]
    Exit { requested: bool },

    /// The request could not be served.
    #[serde(rename = "error")]
    Error { message: String },
}

impl WorkerLaunch {
    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("WorkerLaunch serialization failed");
        json.push('\n');
        json
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl BrokerRequest {
    /// Create a put request.
    pub fn put(queue: usize, item: Value, timeout_ms: u64) -> Self {
        Self::Put {
            queue,
            item,
            timeout_ms,
        }
    }

    /// Create a get request.
    pub fn get(queue: usize, timeout_ms: u64) -> Self {
        Self::Get { queue, timeout_ms }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("BrokerRequest serialization failed");
        json.push('\n');
        json
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl BrokerReply {
    /// Create an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("BrokerReply serialization failed");
        json.push('\n');
        json
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
