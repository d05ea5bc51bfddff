//! Immutable description of a worker pool.

use super::exit::ExitSignal;
use super::queue::QueueRef;
use super::routine::{RoutineRef, SetupFailurePolicy};
use serde_json::Value;
use thiserror::Error;

/// Why a descriptor or pool could not be built. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("replica count must be at least 1")]
    ZeroReplicas,

    #[error("no routine given")]
    MissingRoutine,

    #[error("routine '{routine}' expects {expected} {kind} queue(s) but {actual} were bound")]
    ArityMismatch {
        routine: &'static str,
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("routine '{0}' is not registered with the worker executable")]
    UnknownRoutine(String),
}

/// How many replicas of which routine to run, with what arguments and
/// which queues.
#[derive(Clone)]
pub struct WorkerDescriptor {
    count: usize,
    routine: RoutineRef,
    args: Value,
    inputs: Vec<QueueRef>,
    outputs: Vec<QueueRef>,
    exit: ExitSignal,
    setup_failure: SetupFailurePolicy,
}

impl WorkerDescriptor {
    /// Validate and build a descriptor.
    pub fn create(
        count: usize,
        routine: Option<RoutineRef>,
        args: Value,
        inputs: Vec<QueueRef>,
        outputs: Vec<QueueRef>,
        exit: ExitSignal,
    ) -> Result<Self, ValidationError> {
        if count < 1 {
            return Err(ValidationError::ZeroReplicas);
        }
        let routine = routine.ok_or(ValidationError::MissingRoutine)?;
        Ok(Self {
            count,
            routine,
            args,
            inputs,
            outputs,
            exit,
            setup_failure: SetupFailurePolicy::default(),
        })
    }

    /// Replace the setup-failure policy.
    pub fn with_setup_failure(mut self, policy: SetupFailurePolicy) -> Self {
        self.setup_failure = policy;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn routine(&self) -> &RoutineRef {
        &self.routine
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn inputs(&self) -> &[QueueRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[QueueRef] {
        &self.outputs
    }

    pub fn exit(&self) -> &ExitSignal {
        &self.exit
    }

    pub fn setup_failure(&self) -> SetupFailurePolicy {
        self.setup_failure
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|q| q.name().to_string()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|q| q.name().to_string()).collect()
    }

    /// Check the bound queues against the routine's declared arity.
    pub fn check_arity(&self) -> Result<(), ValidationError> {
        let checks = [
            ("input", self.routine.inputs, self.inputs.len()),
            ("output", self.routine.outputs, self.outputs.len()),
        ];
        for (kind, expected, actual) in checks {
            if expected != actual {
                return Err(ValidationError::ArityMismatch {
                    routine: self.routine.name,
                    kind,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDescriptor")
            .field("count", &self.count)
            .field("routine", &self.routine.name)
            .field("args", &self.args)
            .field("inputs", &self.input_names())
            .field("outputs", &self.output_names())
            .field("setup_failure", &self.setup_failure)
            .finish()
    }
}
