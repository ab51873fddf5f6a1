//! Structured, time-bounded execution of external commands.
//!
//! Commands are built as explicit argument vectors (never through a shell),
//! run in their own process group, and polled until they exit or their
//! timeout expires; on expiry the whole group is killed. Stdout and stderr
//! are merged into an anonymous temp file so a chatty child can never block
//! on a full pipe while we poll.
//!
//! Every running command holds a shared guard on the process-wide reap gate.
//! The zombie reaper only runs while it can take the gate exclusively, so a
//! `waitpid(-1)` never collects the exit status of a child that is still
//! being waited on here. Anything in the process that spawns children should
//! go through [`Subprocesses`].

use std::ffi::OsStr;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::error::CommandError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// `waitpid(-1)` is process-wide, so is the gate.
static REAP_GATE: RwLock<()> = RwLock::new(());

/// Result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub status: ExitStatus,
    /// Merged stdout and stderr, lossily decoded.
    pub output: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Convert a non-zero exit into [`CommandError::Failed`].
    pub fn check(self) -> Result<CommandOutput, CommandError> {
        if self.success() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            command: self.command,
            status: self.status.to_string(),
            output: self.output.trim().to_string(),
        })
    }

    /// First non-empty output line, used for one-line log summaries.
    pub fn first_line(&self) -> &str {
        self.output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// Runner shared by every component that spawns external commands.
#[derive(Debug, Default)]
pub struct Subprocesses {
    _private: (),
}

impl Subprocesses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `command` to completion or until `timeout` expires.
    ///
    /// A non-zero exit is returned as `Ok`; use [`CommandOutput::check`] to
    /// treat it as an error.
    pub fn run(
        &self,
        command: &mut Command,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let label = describe(command);
        let io = |source| CommandError::Io {
            command: label.clone(),
            source,
        };

        let _in_flight = REAP_GATE.read().unwrap_or_else(PoisonError::into_inner);

        let mut capture = tempfile::tempfile().map_err(io)?;
        let stdout = capture.try_clone().map_err(io)?;
        let stderr = capture.try_clone().map_err(io)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: command.get_program().to_string_lossy().into_owned(),
            source,
        })?;
        tracing::debug!(command = %label, pid = child.id(), "spawned");

        let status = loop {
            match child.try_wait().map_err(io)? {
                Some(status) => break status,
                None if started.elapsed() >= timeout => {
                    kill_group(&mut child);
                    tracing::warn!(command = %label, ?timeout, "command timed out, killed");
                    return Err(CommandError::TimedOut {
                        command: label,
                        timeout,
                    });
                }
                None => sleep(POLL_INTERVAL),
            }
        };

        let mut bytes = Vec::new();
        capture.seek(SeekFrom::Start(0)).map_err(io)?;
        capture.read_to_end(&mut bytes).map_err(io)?;

        Ok(CommandOutput {
            command: label,
            status,
            output: String::from_utf8_lossy(&bytes).into_owned(),
            elapsed: started.elapsed(),
        })
    }

    /// Take the reap gate exclusively, or `None` while any command runs.
    pub(crate) fn try_exclusive(&self) -> Option<RwLockWriteGuard<'static, ()>> {
        match REAP_GATE.try_write() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

/// `program arg1 arg2 …` for logs and error messages.
pub fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(pgid, Signal::SIGKILL) {
        tracing::debug!(error = %err, "killpg failed, killing child only");
        let _ = child.kill();
    }
    let _ = child.wait();
}
