//! Worker subprocess spawning.
//!
//! Workers are the same executable re-run in hidden `worker` mode. Uses
//! `std::process::Command` (posix_spawn where available) rather than a raw
//! fork so the parent's threads are never duplicated.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::proc::Proc;
use super::routine::RoutineRegistry;
use crate::error::{MavflowError, Result};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

/// How process workers are launched.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    registry: RoutineRegistry,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    /// Launch `program worker ...`; `registry` must mirror the routines the
    /// program knows.
    pub fn new(program: impl Into<PathBuf>, registry: RoutineRegistry) -> Self {
        Self {
            program: program.into(),
            registry,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Re-execute the running binary.
    pub fn current_exe(registry: RoutineRegistry) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            MavflowError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::new(exe, registry))
    }

    /// Append an argument to every worker command line.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for every spawned worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn registry(&self) -> &RoutineRegistry {
        &self.registry
    }
}

/// Where pool replicas run.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// One OS process per replica.
    Processes(ProcessLauncher),
    /// One OS thread per replica inside the current process.
    Threads,
}

/// A freshly spawned worker and its end of the IPC pipes.
pub struct SpawnedWorker {
    pub proc: Proc,
    /// Writes to the worker's stdin.
    pub writer: LineWriter,
    /// Reads from the worker's stdout.
    pub reader: LineReader,
}

/// Spawn one worker subprocess for `routine`.
pub fn spawn_worker(
    launcher: &ProcessLauncher,
    routine: &str,
    replica: usize,
) -> Result<SpawnedWorker> {
    let mut cmd = Command::new(&launcher.program);
    cmd.arg("worker")
        .arg("--routine")
        .arg(routine)
        .arg("--replica")
        .arg(replica.to_string())
        .args(&launcher.args);

    // stdout carries IPC; logs go to the inherited stderr.
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    for (key, value) in &launcher.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        MavflowError::Worker(format!(
            "Failed to spawn worker {} from {}: {}",
            routine,
            launcher.program.display(),
            e
        ))
    })?;

    let proc = Proc::new(Pid::from_raw(child.id() as i32));
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| MavflowError::Worker("Child stdin not captured".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MavflowError::Worker("Child stdout not captured".into()))?;

    Ok(SpawnedWorker {
        proc,
        writer: LineWriter::new(PipeFd::from(stdin)),
        reader: LineReader::new(PipeFd::from(stdout)),
    })
}

/// Spawn a named service thread (broker or thread-mode replica).
pub fn spawn_named_thread<F, T>(name: String, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| MavflowError::Worker(format!("Failed to spawn thread: {}", e)))
}
