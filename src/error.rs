//! Error types for mavflow.

use thiserror::Error;

use crate::link::LinkError;
use crate::worker::{QueueError, ValidationError};

/// Session status for a clean Stopped transition.
pub const STATUS_OK: i32 = 0;

/// Session status when a descriptor or pool failed validation.
pub const STATUS_VALIDATION: i32 = -1;

/// Session status when workers could not be spawned or talked to.
pub const STATUS_SPAWN: i32 = -2;

/// Session status when the pipeline ran but could not be stopped cleanly.
pub const STATUS_SHUTDOWN: i32 = -3;

/// Main error type for mavflow.
#[derive(Error, Debug)]
pub enum MavflowError {
    #[error("Failed to construct {pool} pool: {source}")]
    PoolSetup {
        pool: &'static str,
        #[source]
        source: ValidationError,
    },

    #[error("Invalid worker configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Timed out joining {pending} worker(s) of {pool}")]
    JoinTimeout { pool: String, pending: usize },

    #[error("Pipeline is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MavflowError {
    /// Negative session status for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::PoolSetup { .. } | Self::Validation(_) | Self::Json(_) => STATUS_VALIDATION,
            Self::JoinTimeout { .. } | Self::InvalidState { .. } => STATUS_SHUTDOWN,
            _ => STATUS_SPAWN,
        }
    }
}

/// Result type alias for mavflow operations.
pub type Result<T> = std::result::Result<T, MavflowError>;
