//! Pipeline orchestrator.
//!
//! Wires the four roles through three queues and one exit signal:
//!
//! ```text
//!   heartbeat_sender ──▶ (vehicle)
//!   heartbeat_receiver ──▶ [A: heartbeat] ──────────────────────────▶ orchestrator
//!   telemetry ──▶ [B: telemetry] ──▶ command ──▶ [C: command] ──────▶ orchestrator
//! ```
//!
//! A session moves Building → Running → Draining → Stopped. Shutdown
//! requests exit, drains C, then B, then A, joins every pool and clears the
//! exit signal. A stopped pipeline can be started again.

use crate::config::SessionConfig;
use crate::error::{MavflowError, Result, STATUS_OK};
use crate::roles::{
    COMMAND, CommandDecision, HEARTBEAT_RECEIVER, HEARTBEAT_SENDER, HeartbeatStatus, TELEMETRY,
    TelemetryData,
};
use crate::worker::{
    BoundedQueue, ExitSignal, JoinReport, Launcher, Pool, QueueRef, RoutineRef, Slot,
    WorkerDescriptor,
};
use crossbeam_channel::Select;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Building,
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "Building",
            Self::Running => "Running",
            Self::Draining => "Draining",
            Self::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the Running phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The session time budget elapsed.
    Budget,
    /// The exit signal was set by the operator or a worker.
    ExitRequested,
    /// The heartbeat receiver reported Disconnected.
    Disconnected,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Budget => write!(f, "session time elapsed"),
            Self::ExitRequested => write!(f, "exit requested"),
            Self::Disconnected => write!(f, "vehicle disconnected"),
        }
    }
}

/// What the orchestrator read from the terminal queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Heartbeat statuses received from queue A.
    pub heartbeats: u64,
    /// How many of those were Disconnected.
    pub disconnects: u64,
    /// Command decisions received from queue C.
    pub commands: u64,
    pub stop_reason: StopReason,
    pub ran_for: Duration,
}

/// Items discarded from each queue during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueResidue {
    pub heartbeat: usize,
    pub telemetry: usize,
    pub command: usize,
}

impl QueueResidue {
    pub fn total(&self) -> usize {
        self.heartbeat + self.telemetry + self.command
    }
}

/// Result of the Draining phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub residue: QueueResidue,
    pub joins: Vec<JoinReport>,
}

/// Full account of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub heartbeats: u64,
    pub disconnects: u64,
    pub commands: u64,
    pub stop_reason: StopReason,
    /// Wall time from start to Stopped.
    pub elapsed: Duration,
    pub residue: QueueResidue,
    pub joins: Vec<JoinReport>,
}

impl SessionReport {
    fn new(summary: &RunSummary, shutdown: ShutdownReport, elapsed: Duration) -> Self {
        Self {
            heartbeats: summary.heartbeats,
            disconnects: summary.disconnects,
            commands: summary.commands,
            stop_reason: summary.stop_reason,
            elapsed,
            residue: shutdown.residue,
            joins: shutdown.joins,
        }
    }

    /// Replicas that did not exit cleanly, across every pool.
    pub fn failed_workers(&self) -> usize {
        self.joins
            .iter()
            .flat_map(|j| &j.replicas)
            .filter(|r| !r.reason.is_success())
            .count()
    }
}

/// Integer status plus message, as returned to the caller of a session.
#[derive(Debug)]
pub struct SessionOutcome {
    /// 0 for a clean Stopped, negative for a setup or shutdown failure.
    pub status: i32,
    pub message: String,
    /// Present when the session got as far as running.
    pub report: Option<SessionReport>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    fn failed(err: &MavflowError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
            report: None,
        }
    }

    /// Shutdown did not complete; keeps what the session collected.
    fn interrupted(err: &MavflowError, report: SessionReport) -> Self {
        Self {
            report: Some(report),
            ..Self::failed(err)
        }
    }
}

/// The four pools, three queues and exit signal of one pipeline.
pub struct Pipeline {
    state: PipelineState,
    exit: ExitSignal,
    heartbeat_queue: BoundedQueue<HeartbeatStatus>,
    telemetry_queue: BoundedQueue<TelemetryData>,
    command_queue: BoundedQueue<CommandDecision>,
    /// Sender, receiver, telemetry, command; started in this order.
    pools: Vec<Pool>,
    poll: Duration,
    stop_on_disconnect: bool,
    join_timeout: Option<Duration>,
}

/// Build one pool, naming it in any validation error.
#[allow(clippy::too_many_arguments)]
fn build_pool(
    pool: &'static str,
    count: usize,
    routine: RoutineRef,
    args: Value,
    inputs: Vec<QueueRef>,
    outputs: Vec<QueueRef>,
    exit: &ExitSignal,
    config: &SessionConfig,
    launcher: &Launcher,
) -> Result<Pool> {
    let setup = |source| MavflowError::PoolSetup { pool, source };
    let descriptor =
        WorkerDescriptor::create(count, Some(routine), args, inputs, outputs, exit.clone())
            .map_err(setup)?
            .with_setup_failure(config.setup_failure);
    Pool::create(descriptor, launcher.clone()).map_err(setup)
}

impl Pipeline {
    /// Build queues and pools with a fresh exit signal. Spawns nothing.
    pub fn build(config: &SessionConfig, launcher: Launcher) -> Result<Self> {
        Self::build_with_exit(config, launcher, ExitSignal::new())
    }

    /// Build around an existing exit signal, e.g. one wired to Ctrl-C.
    #[instrument(level = "debug", skip_all)]
    pub fn build_with_exit(
        config: &SessionConfig,
        launcher: Launcher,
        exit: ExitSignal,
    ) -> Result<Self> {
        let heartbeat_queue = BoundedQueue::new("heartbeat", config.heartbeat_queue);
        let telemetry_queue = BoundedQueue::new("telemetry", config.telemetry_queue);
        let command_queue = BoundedQueue::new("command", config.command_queue);
        let args = config.role_args()?;

        let pools = vec![
            build_pool(
                "heartbeat sender",
                config.senders,
                HEARTBEAT_SENDER,
                args.heartbeat_sender,
                vec![],
                vec![],
                &exit,
                config,
                &launcher,
            )?,
            build_pool(
                "heartbeat receiver",
                config.receivers,
                HEARTBEAT_RECEIVER,
                args.heartbeat_receiver,
                vec![],
                vec![heartbeat_queue.shared()],
                &exit,
                config,
                &launcher,
            )?,
            build_pool(
                "telemetry",
                config.telemetry_workers,
                TELEMETRY,
                args.telemetry,
                vec![],
                vec![telemetry_queue.shared()],
                &exit,
                config,
                &launcher,
            )?,
            build_pool(
                "command",
                config.command_workers,
                COMMAND,
                args.command,
                vec![telemetry_queue.shared()],
                vec![command_queue.shared()],
                &exit,
                config,
                &launcher,
            )?,
        ];

        debug!(
            heartbeat = ?heartbeat_queue.capacity(),
            telemetry = ?telemetry_queue.capacity(),
            command = ?command_queue.capacity(),
            "Pipeline built"
        );
        Ok(Self {
            state: PipelineState::Building,
            exit,
            heartbeat_queue,
            telemetry_queue,
            command_queue,
            pools,
            poll: config.poll,
            stop_on_disconnect: config.stop_on_disconnect,
            join_timeout: config.join_timeout,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn exit_signal(&self) -> &ExitSignal {
        &self.exit
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn heartbeat_queue(&self) -> &BoundedQueue<HeartbeatStatus> {
        &self.heartbeat_queue
    }

    pub fn telemetry_queue(&self) -> &BoundedQueue<TelemetryData> {
        &self.telemetry_queue
    }

    pub fn command_queue(&self) -> &BoundedQueue<CommandDecision> {
        &self.command_queue
    }

    fn expect_state(&self, expected: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(MavflowError::InvalidState {
                expected,
                actual: self.state.as_str(),
            })
        }
    }

    /// Start every pool. Building (or Stopped) → Running.
    ///
    /// If a pool fails to start, the pools already running are shut down
    /// before the error is returned and the pipeline ends up Stopped.
    pub fn start_all(&mut self) -> Result<()> {
        self.expect_state(
            "Building or Stopped",
            matches!(self.state, PipelineState::Building | PipelineState::Stopped),
        )?;

        for index in 0..self.pools.len() {
            if let Err(e) = self.pools[index].start() {
                error!(
                    pool = self.pools[index].name(),
                    error = %e,
                    "Failed to start pool, shutting down"
                );
                if let Err(shutdown_err) = self.drain_and_join() {
                    warn!(error = %shutdown_err, "Shutdown after failed start was incomplete");
                }
                return Err(e);
            }
        }

        self.state = PipelineState::Running;
        info!(pools = self.pools.len(), "Started");
        Ok(())
    }

    /// Read the terminal queues until the budget elapses, exit is requested
    /// or (when configured) the vehicle is reported disconnected.
    ///
    /// Waits on queues A and C together; each wait is bounded by the poll
    /// interval so the stop conditions are rechecked on a fixed cadence.
    pub fn run(&self, budget: Duration) -> Result<RunSummary> {
        self.expect_state("Running", self.state == PipelineState::Running)?;

        let started = Instant::now();
        let deadline = started + budget;
        let mut heartbeats = 0;
        let mut disconnects = 0;
        let mut commands = 0;

        let heartbeat_rx = self.heartbeat_queue.receiver();
        let command_rx = self.command_queue.receiver();

        let stop_reason = loop {
            if self.exit.is_exit_requested() {
                break StopReason::ExitRequested;
            }
            let now = Instant::now();
            if now >= deadline {
                break StopReason::Budget;
            }

            let mut select = Select::new();
            let heartbeat_op = select.recv(heartbeat_rx);
            let command_op = select.recv(command_rx);
            let Ok(op) = select.select_timeout(self.poll.min(deadline - now)) else {
                continue;
            };

            if op.index() == heartbeat_op {
                if let Ok(Slot::Item(status)) = op.recv(heartbeat_rx) {
                    heartbeats += 1;
                    info!(%status, "Received heartbeat status");
                    if status == HeartbeatStatus::Disconnected {
                        disconnects += 1;
                        if self.stop_on_disconnect {
                            warn!("Vehicle disconnected, stopping session");
                            break StopReason::Disconnected;
                        }
                    }
                }
            } else if op.index() == command_op
                && let Ok(Slot::Item(decision)) = op.recv(command_rx)
            {
                commands += 1;
                info!(%decision, "Received command decision");
            }
        };

        let summary = RunSummary {
            heartbeats,
            disconnects,
            commands,
            stop_reason,
            ran_for: started.elapsed(),
        };
        info!(reason = %stop_reason, heartbeats, commands, "Session loop ended");
        Ok(summary)
    }

    /// Running → Draining → Stopped.
    ///
    /// Fails only if a join deadline passed with thread workers still
    /// running; the pipeline then stays Draining with exit still requested.
    #[instrument(level = "debug", skip(self))]
    pub fn shutdown(&mut self) -> Result<ShutdownReport> {
        self.expect_state("Running", self.state == PipelineState::Running)?;
        self.drain_and_join()
    }

    fn drain_and_join(&mut self) -> Result<ShutdownReport> {
        match self.drain_and_join_partial() {
            (report, None) => Ok(report),
            (_, Some(e)) => Err(e),
        }
    }

    /// Draining sequence that keeps what it collected when a join fails.
    fn drain_and_join_partial(&mut self) -> (ShutdownReport, Option<MavflowError>) {
        self.state = PipelineState::Draining;
        self.exit.request_exit();
        info!("Requested exit");

        // Downstream to upstream.
        let mut residue = QueueResidue {
            command: self.command_queue.drain_and_unblock(),
            telemetry: self.telemetry_queue.drain_and_unblock(),
            heartbeat: self.heartbeat_queue.drain_and_unblock(),
        };
        info!(discarded = residue.total(), "Queues cleared");

        let mut joins = Vec::with_capacity(self.pools.len());
        let mut first_error = None;
        for pool in &mut self.pools {
            match self.join_timeout {
                None => joins.push(pool.join()),
                Some(timeout) => match pool.join_timeout(timeout) {
                    Ok(report) => joins.push(report),
                    Err(e) => {
                        error!(pool = pool.name(), error = %e, "Pool did not stop");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                },
            }
        }
        if let Some(e) = first_error {
            return (ShutdownReport { residue, joins }, Some(e));
        }

        // Producers may have written between the drain and their exit.
        residue.command += self.command_queue.drain_and_unblock();
        residue.telemetry += self.telemetry_queue.drain_and_unblock();
        residue.heartbeat += self.heartbeat_queue.drain_and_unblock();

        self.exit.clear_exit();
        self.state = PipelineState::Stopped;
        info!("Stopped");
        (ShutdownReport { residue, joins }, None)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if matches!(self.state, PipelineState::Running | PipelineState::Draining) {
            warn!(state = %self.state, "Pipeline dropped before shutdown, requesting exit");
            self.exit.request_exit();
        }
    }
}

/// Build, run and shut down one session.
///
/// Every failure is folded into the outcome's negative status; a session
/// that reaches Stopped returns 0. A failed shutdown still carries the
/// session report.
pub fn run_session(
    config: &SessionConfig,
    launcher: Launcher,
    exit: &ExitSignal,
) -> SessionOutcome {
    let started = Instant::now();

    let mut pipeline = match Pipeline::build_with_exit(config, launcher, exit.clone()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to build pipeline");
            return SessionOutcome::failed(&e);
        }
    };
    if let Err(e) = pipeline.start_all() {
        return SessionOutcome::failed(&e);
    }

    let summary = match pipeline.run(config.duration) {
        Ok(summary) => summary,
        Err(e) => return SessionOutcome::failed(&e),
    };
    let (shutdown, shutdown_error) = pipeline.drain_and_join_partial();
    let report = SessionReport::new(&summary, shutdown, started.elapsed());
    if let Some(e) = shutdown_error {
        return SessionOutcome::interrupted(&e, report);
    }

    let failed = report.failed_workers();
    if failed > 0 {
        warn!(failed, "Some workers did not exit cleanly");
    }
    SessionOutcome {
        status: STATUS_OK,
        message: format!(
            "Session stopped after {:.1}s ({})",
            report.elapsed.as_secs_f64(),
            report.stop_reason
        ),
        report: Some(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{STATUS_SHUTDOWN, STATUS_SPAWN, STATUS_VALIDATION};
    use crate::worker::{ProcessLauncher, RoutineRegistry, SetupFailurePolicy, ValidationError};

    /// Fast simulated vehicle and short timeouts.
    fn fast_config() -> SessionConfig {
        SessionConfig {
            connection: "sim:heartbeat_ms=20,telemetry_ms=10".to_string(),
            duration: Duration::from_millis(600),
            poll: Duration::from_millis(20),
            worker_queue_timeout: Duration::from_millis(50),
            heartbeat_period: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_millis(100),
            telemetry_window: Duration::from_millis(200),
            join_timeout: Some(Duration::from_secs(10)),
            ..SessionConfig::default()
        }
    }

    fn assert_queues_empty(pipeline: &Pipeline) {
        assert!(pipeline.heartbeat_queue().is_empty());
        assert!(pipeline.telemetry_queue().is_empty());
        assert!(pipeline.command_queue().is_empty());
    }

    #[test]
    fn test_end_to_end_thread_session() {
        let exit = ExitSignal::new();
        let outcome = run_session(&fast_config(), Launcher::Threads, &exit);

        assert_eq!(outcome.status, STATUS_OK, "{}", outcome.message);
        let report = outcome.report.unwrap();
        assert_eq!(report.stop_reason, StopReason::Budget);
        assert!(report.heartbeats > 0);
        assert!(report.commands > 0);
        assert_eq!(report.joins.len(), 4);
        assert_eq!(report.failed_workers(), 0);
        assert!(!exit.is_exit_requested());
    }

    #[test]
    fn test_lifecycle_and_reuse() {
        let mut pipeline = Pipeline::build(&fast_config(), Launcher::Threads).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Building);
        assert!(pipeline.run(Duration::ZERO).is_err());
        assert!(pipeline.shutdown().is_err());

        for _ in 0..2 {
            pipeline.start_all().unwrap();
            assert_eq!(pipeline.state(), PipelineState::Running);
            assert!(pipeline.start_all().is_err());

            let summary = pipeline.run(Duration::from_millis(200)).unwrap();
            assert_eq!(summary.stop_reason, StopReason::Budget);

            let report = pipeline.shutdown().unwrap();
            assert_eq!(pipeline.state(), PipelineState::Stopped);
            assert!(report.joins.iter().all(JoinReport::all_succeeded));
            assert!(pipeline.pools().iter().all(|p| p.running() == 0));
            assert!(!pipeline.exit_signal().is_exit_requested());
            assert_queues_empty(&pipeline);
        }
    }

    #[test]
    fn test_stress_small_queues_slow_consumer() {
        let config = SessionConfig {
            heartbeat_queue: 1,
            telemetry_queue: 1,
            command_queue: 1,
            telemetry_workers: 2,
            command_interval: Duration::from_millis(100),
            duration: Duration::from_millis(800),
            ..fast_config()
        };
        let mut pipeline = Pipeline::build(&config, Launcher::Threads).unwrap();
        pipeline.start_all().unwrap();

        let watcher_queue = pipeline.telemetry_queue().clone();
        let watcher = std::thread::spawn(move || {
            let mut peak = 0;
            for _ in 0..60 {
                peak = peak.max(watcher_queue.len());
                std::thread::sleep(Duration::from_millis(10));
            }
            peak
        });

        pipeline.run(config.duration).unwrap();
        let report = pipeline.shutdown().unwrap();
        assert!(watcher.join().unwrap() <= 1);
        assert!(report.joins.iter().all(JoinReport::all_succeeded));
        assert_queues_empty(&pipeline);
    }

    #[test]
    fn test_disconnect_stops_session() {
        let config = SessionConfig {
            connection: "sim:silent,telemetry_ms=10".to_string(),
            heartbeat_timeout: Duration::from_millis(10),
            heartbeat_threshold: 2,
            duration: Duration::from_secs(20),
            ..fast_config()
        };
        let outcome = run_session(&config, Launcher::Threads, &ExitSignal::new());
        let report = outcome.report.unwrap();
        assert_eq!(report.stop_reason, StopReason::Disconnected);
        assert!(report.disconnects >= 1);
        assert!(report.elapsed < Duration::from_secs(20));
    }

    #[test]
    fn test_keep_running_on_disconnect() {
        let config = SessionConfig {
            connection: "sim:silent".to_string(),
            heartbeat_timeout: Duration::from_millis(10),
            heartbeat_threshold: 1,
            stop_on_disconnect: false,
            duration: Duration::from_millis(300),
            ..fast_config()
        };
        let report = run_session(&config, Launcher::Threads, &ExitSignal::new())
            .report
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Budget);
        assert!(report.disconnects > 1);
    }

    #[test]
    fn test_external_exit_request_stops_session() {
        let exit = ExitSignal::new();
        let trigger = exit.clone();
        let config = SessionConfig {
            duration: Duration::from_secs(30),
            ..fast_config()
        };
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.request_exit();
        });

        let outcome = run_session(&config, Launcher::Threads, &exit);
        stopper.join().unwrap();
        let report = outcome.report.unwrap();
        assert_eq!(report.stop_reason, StopReason::ExitRequested);
        assert!(!exit.is_exit_requested());
    }

    #[test]
    fn test_setup_failure_requests_exit() {
        let config = SessionConfig {
            connection: "serial:/dev/ttyACM0".to_string(),
            duration: Duration::from_secs(30),
            ..fast_config()
        };
        let outcome = run_session(&config, Launcher::Threads, &ExitSignal::new());
        // The session still drains and joins cleanly.
        assert_eq!(outcome.status, STATUS_OK);
        let report = outcome.report.unwrap();
        assert_eq!(report.stop_reason, StopReason::ExitRequested);
        assert_eq!(report.failed_workers(), 4);
    }

    #[test]
    fn test_isolated_setup_failure_keeps_running() {
        let config = SessionConfig {
            connection: "serial:/dev/ttyACM0".to_string(),
            setup_failure: SetupFailurePolicy::Isolate,
            duration: Duration::from_millis(200),
            ..fast_config()
        };
        let report = run_session(&config, Launcher::Threads, &ExitSignal::new())
            .report
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Budget);
        assert_eq!(report.heartbeats, 0);
    }

    #[test]
    fn test_zero_replicas_names_pool() {
        let config = SessionConfig {
            command_workers: 0,
            ..fast_config()
        };
        let outcome = run_session(&config, Launcher::Threads, &ExitSignal::new());
        assert_eq!(outcome.status, STATUS_VALIDATION);
        assert!(outcome.message.contains("command pool"));
        assert!(outcome.report.is_none());

        let err = Pipeline::build(
            &SessionConfig {
                senders: 0,
                ..fast_config()
            },
            Launcher::Threads,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            MavflowError::PoolSetup {
                pool: "heartbeat sender",
                source: ValidationError::ZeroReplicas,
            }
        ));
    }

    #[test]
    fn test_unregistered_routine_fails_validation() {
        let launcher = Launcher::Processes(ProcessLauncher::new(
            "/nonexistent/mavflow",
            RoutineRegistry::new(),
        ));
        let outcome = run_session(&fast_config(), launcher, &ExitSignal::new());
        assert_eq!(outcome.status, STATUS_VALIDATION);
        assert!(outcome.message.contains("heartbeat sender"));
    }

    #[test]
    fn test_spawn_failure_is_negative_status() {
        let launcher = Launcher::Processes(ProcessLauncher::new(
            "/nonexistent/mavflow",
            crate::roles::registry(),
        ));
        let exit = ExitSignal::new();
        let outcome = run_session(&fast_config(), launcher, &exit);
        assert_eq!(outcome.status, STATUS_SPAWN);
        assert!(!exit.is_exit_requested());
    }

    #[test]
    fn test_failed_shutdown_keeps_report() {
        let summary = RunSummary {
            heartbeats: 7,
            disconnects: 1,
            commands: 3,
            stop_reason: StopReason::Disconnected,
            ran_for: Duration::from_secs(2),
        };
        let shutdown = ShutdownReport {
            residue: QueueResidue {
                heartbeat: 1,
                telemetry: 0,
                command: 2,
            },
            joins: vec![JoinReport {
                pool: "heartbeat_sender".to_string(),
                replicas: vec![],
            }],
        };
        let err = MavflowError::JoinTimeout {
            pool: "telemetry".to_string(),
            pending: 1,
        };

        let report = SessionReport::new(&summary, shutdown, Duration::from_secs(3));
        let outcome = SessionOutcome::interrupted(&err, report);
        assert_eq!(outcome.status, STATUS_SHUTDOWN);
        assert!(!outcome.is_success());
        assert!(outcome.message.contains("telemetry"));

        let report = outcome.report.unwrap();
        assert_eq!(report.heartbeats, 7);
        assert_eq!(report.commands, 3);
        assert_eq!(report.stop_reason, StopReason::Disconnected);
        assert_eq!(report.residue.total(), 3);
        assert_eq!(report.joins.len(), 1);
        assert_eq!(report.elapsed, Duration::from_secs(3));
    }
}
