//! Process handle for worker subprocesses.
//!
//! The handle only owns the pid. The child's pipes are handed to its broker
//! thread at spawn time.

use crate::error::{MavflowError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child with a deadline.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Handle to a worker subprocess.
#[derive(Debug)]
pub struct Proc {
    pid: Pid,
    reaped: bool,
}

impl Proc {
    pub fn new(pid: Pid) -> Self {
        Self { pid, reaped: false }
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(MavflowError::Worker("Process already reaped".into()));
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.reaped = true;
                    return Ok(status);
                }
                // Stop/continue notifications are not terminations.
                Ok(_) | Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    self.reaped = true;
                    return Err(MavflowError::Worker(format!("waitpid failed: {}", e)));
                }
            }
        }
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(MavflowError::Worker("Process already reaped".into()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                self.reaped = true;
                Err(MavflowError::Worker(format!("waitpid failed: {}", e)))
            }
        }
    }

    /// Wait until `deadline`. Returns `None` if the process is still running.
    pub fn wait_until(&mut self, deadline: Instant) -> Result<Option<WaitStatus>> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(REAP_POLL);
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| MavflowError::Worker(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL to the process and wait for it to exit.
    pub fn kill(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(MavflowError::Worker("Process already reaped".into()));
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| MavflowError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        self.wait()
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    pub fn stop(&mut self, grace: Duration) -> Result<WaitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        self.terminate()?;
        if let Some(status) = self.wait_until(Instant::now() + grace)? {
            return Ok(status);
        }
        self.kill()
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate();
            std::thread::sleep(REAP_POLL);

            if let Ok(Some(_)) = self.try_wait() {
                return;
            }

            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
