//! Reclaiming exited child processes.
//!
//! Generation steps may leave grandchildren behind that get reparented to
//! us. `reap` collects every exited child without blocking, but only while no
//! structured command is in flight (see [`Subprocesses`]).

use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::process::Subprocesses;

#[derive(Debug, Default)]
pub struct ReapReport {
    /// `(pid, status)` of every child collected.
    pub reaped: Vec<(i32, String)>,
    /// The round was skipped because a command was running.
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct ZombieReaper {
    subprocesses: Arc<Subprocesses>,
}

impl ZombieReaper {
    pub fn new(subprocesses: Arc<Subprocesses>) -> Self {
        Self { subprocesses }
    }

    /// Collect exited children until none are left or the rest are alive.
    pub fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let Some(_exclusive) = self.subprocesses.try_exclusive() else {
            tracing::debug!("commands in flight, skipping reap");
            report.skipped = true;
            return report;
        };

        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "waitpid failed");
                    break;
                }
                Ok(status) => {
                    let pid = status.pid().map(Pid::as_raw).unwrap_or_default();
                    tracing::info!(pid, status = ?status, "reaped child process");
                    report.reaped.push((pid, format!("{status:?}")));
                }
            }
        }
        report
    }
}
