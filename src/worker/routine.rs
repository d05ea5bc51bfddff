//! Worker routine contract and the generic worker loop.
//!
//! A routine is built once per replica by its factory (which may fail) and
//! then stepped until the exit signal is set or it reports [`Step::Done`].

use super::queue::QueueError;
use super::signals::{EXIT_CLEAN, EXIT_SETUP_FAILED};
use super::transport::Transport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Longest single sleep while waiting in [`WorkerContext::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Result of one bounded unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep looping.
    Continue,
    /// The routine is finished for its own reasons.
    Done,
}

/// A worker role's behaviour.
pub trait Routine {
    /// Perform one bounded unit of work. Must return in bounded time so the
    /// loop can observe the exit signal.
    fn step(&mut self, ctx: &WorkerContext) -> Step;
}

/// Routine setup failure.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid routine arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    #[error("{kind} queue {index} is not bound ({available} available)")]
    MissingQueue {
        kind: &'static str,
        index: usize,
        available: usize,
    },

    #[error("{0}")]
    Failed(String),
}

/// What a replica does when its routine factory fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFailurePolicy {
    /// Set the session exit signal so the whole pipeline winds down.
    #[default]
    RequestExit,
    /// Only this replica stops; the rest of the pipeline keeps running.
    Isolate,
}

impl std::str::FromStr for SetupFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "request-exit" => Ok(Self::RequestExit),
            "isolate" => Ok(Self::Isolate),
            _ => Err(format!(
                "Unknown setup failure policy: '{}'. Valid options: request-exit, isolate",
                s
            )),
        }
    }
}

/// Factory building a routine from its fixed arguments.
pub type RoutineFactory = fn(&Value, &WorkerContext) -> Result<Box<dyn Routine>, SetupError>;

/// A named routine with its declared queue arity.
#[derive(Clone, Copy)]
pub struct RoutineRef {
    pub name: &'static str,
    pub inputs: usize,
    pub outputs: usize,
    pub factory: RoutineFactory,
}

impl std::fmt::Debug for RoutineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineRef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Routines a worker executable can run, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct RoutineRegistry {
    routines: Vec<RoutineRef>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a routine, replacing any previous one with the same name.
    pub fn with(mut self, routine: RoutineRef) -> Self {
        self.register(routine);
        self
    }

    pub fn register(&mut self, routine: RoutineRef) {
        self.routines.retain(|r| r.name != routine.name);
        self.routines.push(routine);
    }

    pub fn get(&self, name: &str) -> Option<RoutineRef> {
        self.routines.iter().find(|r| r.name == name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routines.iter().map(|r| r.name)
    }
}

/// Everything a routine sees of the outside world.
pub struct WorkerContext {
    routine: &'static str,
    replica: usize,
    transport: Arc<dyn Transport>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl WorkerContext {
    pub fn new(
        routine: &'static str,
        replica: usize,
        transport: Arc<dyn Transport>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            routine,
            replica,
            transport,
            inputs,
            outputs,
        }
    }

    pub fn routine(&self) -> &'static str {
        self.routine
    }

    pub fn replica(&self) -> usize {
        self.replica
    }

    pub fn is_exit_requested(&self) -> bool {
        self.transport.is_exit_requested()
    }

    pub fn request_exit(&self) {
        self.transport.request_exit();
    }

    /// Typed handle on input queue `index`.
    pub fn input<T: DeserializeOwned>(&self, index: usize) -> Result<InputPort<T>, SetupError> {
        let name = self.inputs.get(index).ok_or(SetupError::MissingQueue {
            kind: "input",
            index,
            available: self.inputs.len(),
        })?;
        Ok(InputPort {
            name: name.clone(),
            index,
            transport: Arc::clone(&self.transport),
            _marker: PhantomData,
        })
    }

    /// Typed handle on output queue `index`.
    pub fn output<T: Serialize>(&self, index: usize) -> Result<OutputPort<T>, SetupError> {
        let name = self.outputs.get(index).ok_or(SetupError::MissingQueue {
            kind: "output",
            index,
            available: self.outputs.len(),
        })?;
        Ok(OutputPort {
            name: name.clone(),
            index,
            transport: Arc::clone(&self.transport),
            _marker: PhantomData,
        })
    }

    /// Sleep for `duration` in short slices, returning early when exit is
    /// requested. Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_exit_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Receiving end of a bound queue.
pub struct InputPort<T> {
    name: String,
    index: usize,
    transport: Arc<dyn Transport>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> InputPort<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dequeue with a timeout. `QueueError::Empty` is a normal poll outcome.
    pub fn get(&self, timeout: Duration) -> Result<T, QueueError> {
        let value = self.transport.dequeue(self.index, timeout)?;
        serde_json::from_value(value).map_err(|e| QueueError::Payload(e.to_string()))
    }
}

/// Sending end of a bound queue.
pub struct OutputPort<T> {
    name: String,
    index: usize,
    transport: Arc<dyn Transport>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> OutputPort<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue with a timeout. `QueueError::Full` is a normal poll outcome.
    pub fn put(&self, item: &T, timeout: Duration) -> Result<(), QueueError> {
        let value = serde_json::to_value(item).map_err(|e| QueueError::Payload(e.to_string()))?;
        self.transport.enqueue(self.index, value, timeout)
    }

    /// Retry `put` on a full queue until it succeeds or exit is requested.
    ///
    /// Returns `Ok(false)` if the item was dropped because of exit.
    pub fn put_until_exit(&self, item: &T, timeout: Duration) -> Result<bool, QueueError> {
        loop {
            match self.put(item, timeout) {
                Ok(()) => return Ok(true),
                Err(QueueError::Full) => {
                    if self.transport.is_exit_requested() {
                        return Ok(false);
                    }
                    debug!(queue = %self.name, "Output queue full, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// How a replica's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The loop ran; `finished` is true when the routine returned
    /// [`Step::Done`] instead of observing the exit signal.
    Completed { steps: u64, finished: bool },
    /// The factory failed; no steps ran.
    SetupFailed,
}

impl WorkerOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => EXIT_CLEAN,
            Self::SetupFailed => EXIT_SETUP_FAILED,
        }
    }
}

/// Build and run one replica of `routine` until exit is requested.
pub fn run_worker(
    routine: &RoutineRef,
    args: &Value,
    ctx: &WorkerContext,
    policy: SetupFailurePolicy,
) -> WorkerOutcome {
    let span = info_span!(
        "worker",
        routine = routine.name,
        replica = ctx.replica(),
        pid = std::process::id()
    );
    let _enter = span.enter();

    let mut instance = match (routine.factory)(args, ctx) {
        Ok(instance) => instance,
        Err(e) => {
            error!(error = %e, "Routine setup failed");
            match policy {
                SetupFailurePolicy::RequestExit => {
                    warn!("Requesting session exit after setup failure");
                    ctx.request_exit();
                }
                SetupFailurePolicy::Isolate => {
                    warn!("Replica stopped; pipeline continues without it");
                }
            }
            return WorkerOutcome::SetupFailed;
        }
    };

    info!("Worker started");
    let mut steps = 0u64;
    while !ctx.is_exit_requested() {
        steps += 1;
        if instance.step(ctx) == Step::Done {
            info!(steps, "Routine finished");
            return WorkerOutcome::Completed {
                steps,
                finished: true,
            };
        }
    }

    info!(steps, "Exit requested, worker stopping");
    WorkerOutcome::Completed {
        steps,
        finished: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::exit::ExitSignal;
    use crate::worker::queue::BoundedQueue;
    use crate::worker::transport::LocalTransport;

    const SHORT: Duration = Duration::from_millis(10);

    struct Countdown {
        left: u32,
    }

    impl Routine for Countdown {
        fn step(&mut self, _ctx: &WorkerContext) -> Step {
            if self.left == 0 {
                return Step::Done;
            }
            self.left -= 1;
            Step::Continue
        }
    }

    fn countdown(args: &Value, _ctx: &WorkerContext) -> Result<Box<dyn Routine>, SetupError> {
        #[derive(Deserialize)]
        struct Args {
            from: u32,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        Ok(Box::new(Countdown { left: args.from }))
    }

    const COUNTDOWN: RoutineRef = RoutineRef {
        name: "countdown",
        inputs: 0,
        outputs: 0,
        factory: countdown,
    };

    fn context(exit: &ExitSignal) -> WorkerContext {
        let transport = LocalTransport::new(exit.clone(), vec![], vec![]);
        WorkerContext::new("countdown", 0, Arc::new(transport), vec![], vec![])
    }

    #[test]
    fn test_routine_runs_until_done() {
        let exit = ExitSignal::new();
        let outcome = run_worker(
            &COUNTDOWN,
            &serde_json::json!({"from": 3}),
            &context(&exit),
            SetupFailurePolicy::RequestExit,
        );
        assert_eq!(
            outcome,
            WorkerOutcome::Completed {
                steps: 4,
                finished: true
            }
        );
        assert!(!exit.is_exit_requested());
    }

    #[test]
    fn test_exit_stops_loop_before_first_step() {
        let exit = ExitSignal::new();
        exit.request_exit();
        let outcome = run_worker(
            &COUNTDOWN,
            &serde_json::json!({"from": 3}),
            &context(&exit),
            SetupFailurePolicy::RequestExit,
        );
        assert_eq!(
            outcome,
            WorkerOutcome::Completed {
                steps: 0,
                finished: false
            }
        );
    }

    #[test]
    fn test_setup_failure_requests_exit() {
        let exit = ExitSignal::new();
        let outcome = run_worker(
            &COUNTDOWN,
            &serde_json::json!({"wrong": true}),
            &context(&exit),
            SetupFailurePolicy::RequestExit,
        );
        assert_eq!(outcome, WorkerOutcome::SetupFailed);
        assert_eq!(outcome.exit_code(), EXIT_SETUP_FAILED);
        assert!(exit.is_exit_requested());
    }

    #[test]
    fn test_setup_failure_isolated() {
        let exit = ExitSignal::new();
        let outcome = run_worker(
            &COUNTDOWN,
            &Value::Null,
            &context(&exit),
            SetupFailurePolicy::Isolate,
        );
        assert_eq!(outcome, WorkerOutcome::SetupFailed);
        assert!(!exit.is_exit_requested());
    }

    #[test]
    fn test_registry_lookup_and_replace() {
        let registry = RoutineRegistry::new().with(COUNTDOWN);
        assert!(registry.get("countdown").is_some());
        assert!(registry.get("missing").is_none());

        let registry = registry.with(RoutineRef {
            outputs: 1,
            ..COUNTDOWN
        });
        assert_eq!(registry.names().count(), 1);
        assert_eq!(registry.get("countdown").map(|r| r.outputs), Some(1));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "request-exit".parse::<SetupFailurePolicy>().unwrap(),
            SetupFailurePolicy::RequestExit
        );
        assert_eq!(
            "ISOLATE".parse::<SetupFailurePolicy>().unwrap(),
            SetupFailurePolicy::Isolate
        );
        assert!("ignore".parse::<SetupFailurePolicy>().is_err());
    }

    #[test]
    fn test_typed_ports() {
        let queue = BoundedQueue::<(u8, String)>::new("pairs", 1);
        let exit = ExitSignal::new();
        let transport =
            LocalTransport::new(exit.clone(), vec![queue.shared()], vec![queue.shared()]);
        let ctx = WorkerContext::new(
            "pairs",
            0,
            Arc::new(transport),
            vec!["pairs".into()],
            vec!["pairs".into()],
        );

        let output = ctx.output::<(u8, String)>(0).unwrap();
        let input = ctx.input::<(u8, String)>(0).unwrap();
        assert_eq!(output.name(), "pairs");

        output.put(&(1, "one".into()), SHORT).unwrap();
        assert_eq!(output.put(&(2, "two".into()), SHORT), Err(QueueError::Full));

        exit.request_exit();
        assert_eq!(output.put_until_exit(&(2, "two".into()), SHORT), Ok(false));
        assert_eq!(input.get(SHORT).unwrap(), (1, "one".to_string()));

        assert!(matches!(
            ctx.input::<u8>(1),
            Err(SetupError::MissingQueue { kind: "input", index: 1, available: 1 })
        ));
    }

    #[test]
    fn test_sleep_is_cut_short_by_exit() {
        let exit = ExitSignal::new();
        let ctx = context(&exit);
        assert!(ctx.sleep(Duration::from_millis(20)));

        exit.request_exit();
        let started = Instant::now();
        assert!(!ctx.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
