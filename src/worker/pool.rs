//! Pool manager: runs `count` replicas of a descriptor's routine and joins
//! them.

use super::broker::{BrokerSession, BrokerStats, serve};
use super::descriptor::{ValidationError, WorkerDescriptor};
use super::proc::Proc;
use super::protocol::WorkerLaunch;
use super::routine::{WorkerContext, WorkerOutcome, run_worker};
use super::signals::{TerminationReason, analyze_wait_status};
use super::spawn::{Launcher, spawn_named_thread, spawn_worker};
use super::transport::LocalTransport;
use crate::error::{MavflowError, Result};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Grace period between SIGTERM and SIGKILL when a join times out.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Poll interval for thread joins with a deadline.
const THREAD_POLL: Duration = Duration::from_millis(10);

/// Outcome of one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaReport {
    pub replica: usize,
    /// OS pid in process mode.
    pub pid: Option<u32>,
    pub reason: TerminationReason,
}

/// Outcome of joining a whole pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub pool: String,
    pub replicas: Vec<ReplicaReport>,
}

impl JoinReport {
    /// True when every replica exited cleanly.
    pub fn all_succeeded(&self) -> bool {
        self.replicas.iter().all(|r| r.reason.is_success())
    }

    /// Number of replicas whose routine never got past setup.
    pub fn setup_failures(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| r.reason.is_setup_failure())
            .count()
    }
}

/// A running replica.
enum WorkerHandle {
    Process {
        replica: usize,
        proc: Proc,
        broker: JoinHandle<io::Result<BrokerStats>>,
    },
    Thread {
        replica: usize,
        handle: JoinHandle<WorkerOutcome>,
    },
}

impl WorkerHandle {
    fn replica(&self) -> usize {
        match self {
            Self::Process { replica, .. } | Self::Thread { replica, .. } => *replica,
        }
    }
}

/// Spawns, tracks and joins the replicas described by a [`WorkerDescriptor`].
pub struct Pool {
    descriptor: WorkerDescriptor,
    launcher: Launcher,
    workers: Vec<WorkerHandle>,
}

impl Pool {
    /// Validate queue arity (and registry membership in process mode).
    /// Spawns nothing.
    pub fn create(
        descriptor: WorkerDescriptor,
        launcher: Launcher,
    ) -> std::result::Result<Self, ValidationError> {
        descriptor.check_arity()?;
        if let Launcher::Processes(ref process) = launcher {
            let name = descriptor.routine().name;
            if process.registry().get(name).is_none() {
                return Err(ValidationError::UnknownRoutine(name.to_string()));
            }
        }
        Ok(Self {
            descriptor,
            launcher,
            workers: Vec::new(),
        })
    }

    /// Routine name, used as the pool's name in logs and reports.
    pub fn name(&self) -> &'static str {
        self.descriptor.routine().name
    }

    pub fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    /// Number of replicas currently running (spawned and not yet joined).
    pub fn running(&self) -> usize {
        self.workers.len()
    }

    /// Pids of running process replicas.
    pub fn pids(&self) -> Vec<u32> {
        self.workers
            .iter()
            .filter_map(|w| match w {
                WorkerHandle::Process { proc, .. } => Some(proc.pid().as_raw() as u32),
                WorkerHandle::Thread { .. } => None,
            })
            .collect()
    }

    /// Spawn exactly `count` replicas.
    ///
    /// On failure the replicas already spawned stay tracked, so a following
    /// [`Pool::join`] (after requesting exit) reaps them.
    #[instrument(level = "debug", skip(self), fields(pool = self.name()))]
    pub fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Err(MavflowError::Worker(format!(
                "Pool {} is already running",
                self.name()
            )));
        }

        let count = self.descriptor.count();
        info!(
            pool = self.name(),
            replicas = count,
            mode = self.mode(),
            "Starting worker pool"
        );
        for replica in 0..count {
            let handle = match &self.launcher {
                Launcher::Processes(_) => self.start_process(replica)?,
                Launcher::Threads => self.start_thread(replica)?,
            };
            self.workers.push(handle);
        }
        Ok(())
    }

    fn mode(&self) -> &'static str {
        match self.launcher {
            Launcher::Processes(_) => "process",
            Launcher::Threads => "thread",
        }
    }

    fn label(&self, replica: usize) -> String {
        format!("{}#{}", self.name(), replica)
    }

    fn start_process(&self, replica: usize) -> Result<WorkerHandle> {
        let Launcher::Processes(launcher) = &self.launcher else {
            return Err(MavflowError::Worker("not a process pool".into()));
        };
        let d = &self.descriptor;

        let mut spawned = spawn_worker(launcher, self.name(), replica)?;
        let launch = WorkerLaunch {
            args: d.args().clone(),
            inputs: d.input_names(),
            outputs: d.output_names(),
            setup_failure: d.setup_failure(),
        };
        // On error `spawned.proc` drops here and kills the child.
        spawned.writer.write_line(&launch.to_line()).map_err(|e| {
            MavflowError::Worker(format!(
                "Failed to send launch to {}: {}",
                self.label(replica),
                e
            ))
        })?;

        let session = BrokerSession {
            label: self.label(replica),
            exit: d.exit().clone(),
            inputs: d.inputs().to_vec(),
            outputs: d.outputs().to_vec(),
        };
        let (reader, writer) = (spawned.reader, spawned.writer);
        let broker = spawn_named_thread(format!("broker-{}", self.label(replica)), move || {
            serve(reader, writer, session)
        })?;

        debug!(
            worker = %self.label(replica),
            pid = spawned.proc.pid().as_raw(),
            "Spawned worker process"
        );
        Ok(WorkerHandle::Process {
            replica,
            proc: spawned.proc,
            broker,
        })
    }

    fn start_thread(&self, replica: usize) -> Result<WorkerHandle> {
        let d = &self.descriptor;
        let routine = *d.routine();
        let args = d.args().clone();
        let policy = d.setup_failure();
        let transport = LocalTransport::new(
            d.exit().clone(),
            d.inputs().to_vec(),
            d.outputs().to_vec(),
        );
        let (inputs, outputs) = (d.input_names(), d.output_names());

        let handle = spawn_named_thread(self.label(replica), move || {
            let ctx =
                WorkerContext::new(routine.name, replica, Arc::new(transport), inputs, outputs);
            run_worker(&routine, &args, &ctx, policy)
        })?;
        Ok(WorkerHandle::Thread { replica, handle })
    }

    /// Block until every replica has terminated.
    ///
    /// There is no timeout: a routine that never observes the exit signal
    /// hangs here. See [`Pool::join_timeout`].
    #[instrument(level = "debug", skip(self), fields(pool = self.name()))]
    pub fn join(&mut self) -> JoinReport {
        let mut report = JoinReport {
            pool: self.name().to_string(),
            replicas: Vec::with_capacity(self.workers.len()),
        };
        for handle in std::mem::take(&mut self.workers) {
            report.replicas.push(self.finish(handle, None));
        }
        self.log_report(&report);
        report
    }

    /// Join with a deadline. Process replicas still running at the deadline
    /// are stopped with SIGTERM, then SIGKILL. Thread replicas cannot be
    /// stopped; if any are still running the call fails and they stay
    /// tracked.
    #[instrument(level = "debug", skip(self), fields(pool = self.name()))]
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<JoinReport> {
        let deadline = Instant::now() + timeout;
        let mut report = JoinReport {
            pool: self.name().to_string(),
            replicas: Vec::with_capacity(self.workers.len()),
        };
        let mut pending = Vec::new();

        for handle in std::mem::take(&mut self.workers) {
            match handle {
                WorkerHandle::Thread { replica, handle } => {
                    while !handle.is_finished() && Instant::now() < deadline {
                        std::thread::sleep(THREAD_POLL);
                    }
                    if handle.is_finished() {
                        let handle = WorkerHandle::Thread { replica, handle };
                        report.replicas.push(self.finish(handle, None));
                    } else {
                        pending.push(WorkerHandle::Thread { replica, handle });
                    }
                }
                process => report.replicas.push(self.finish(process, Some(deadline))),
            }
        }

        if !pending.is_empty() {
            let count = pending.len();
            self.workers = pending;
            warn!(pool = self.name(), pending = count, "Worker threads did not stop in time");
            return Err(MavflowError::JoinTimeout {
                pool: self.name().to_string(),
                pending: count,
            });
        }

        self.log_report(&report);
        Ok(report)
    }

    fn finish(&self, handle: WorkerHandle, deadline: Option<Instant>) -> ReplicaReport {
        let replica = handle.replica();
        match handle {
            WorkerHandle::Process {
                mut proc, broker, ..
            } => {
                let pid = proc.pid().as_raw() as u32;
                let status = match deadline {
                    None => proc.wait(),
                    Some(deadline) => match proc.wait_until(deadline) {
                        Ok(Some(status)) => Ok(status),
                        Ok(None) => {
                            warn!(
                                worker = %self.label(replica),
                                pid,
                                "Worker did not exit in time, stopping it"
                            );
                            proc.stop(KILL_GRACE)
                        }
                        Err(e) => Err(e),
                    },
                };
                let reason = match status {
                    Ok(status) => analyze_wait_status(status),
                    Err(e) => {
                        warn!(
                            worker = %self.label(replica),
                            error = %e,
                            "Failed to reap worker"
                        );
                        TerminationReason::Unknown
                    }
                };

                // The child is gone, so its stdout hit EOF and the broker
                // is returning.
                match broker.join() {
                    Ok(Ok(stats)) => {
                        debug!(worker = %self.label(replica), ?stats, "Broker finished")
                    }
                    Ok(Err(e)) => debug!(
                        worker = %self.label(replica),
                        error = %e,
                        "Broker link ended with error"
                    ),
                    Err(_) => warn!(worker = %self.label(replica), "Broker thread panicked"),
                }

                ReplicaReport {
                    replica,
                    pid: Some(pid),
                    reason,
                }
            }
            WorkerHandle::Thread { handle, .. } => {
                let reason = match handle.join() {
                    Ok(outcome) => TerminationReason::Exited(outcome.exit_code()),
                    Err(_) => {
                        warn!(worker = %self.label(replica), "Worker thread panicked");
                        TerminationReason::Panicked
                    }
                };
                ReplicaReport {
                    replica,
                    pid: None,
                    reason,
                }
            }
        }
    }

    fn log_report(&self, report: &JoinReport) {
        for replica in &report.replicas {
            let (worker, reason) = (self.label(replica.replica), &replica.reason);
            if reason.is_success() {
                debug!(worker = %worker, pid = replica.pid, %reason, "Worker joined");
            } else {
                warn!(worker = %worker, pid = replica.pid, %reason, "Worker joined");
            }
        }
        info!(
            pool = self.name(),
            replicas = report.replicas.len(),
            "Worker pool joined"
        );
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!(
                pool = self.name(),
                running = self.workers.len(),
                "Pool dropped without join, terminating workers"
            );
            // Dropping a Proc kills and reaps it. Thread replicas are
            // detached and stop on the exit signal.
            self.descriptor.exit().request_exit();
            self.workers.clear();
        }
    }
}
