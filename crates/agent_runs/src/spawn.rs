use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::RunError;

/// Liveness check the tailer polls to decide when a run is over.
pub trait ProcessProbe: Send {
    fn is_alive(&mut self) -> bool;
}

/// A backend process started outside the controlling application's lifetime.
///
/// Freshly spawned processes keep their [`Child`] so exit can be observed and reaped; processes
/// re-attached after a restart are tracked by pid alone.
#[derive(Debug)]
pub struct DetachedProcess {
    pid: u32,
    child: Option<Child>,
}

impl DetachedProcess {
    /// Tracks an already running process, e.g. one recorded before a restart.
    pub fn attach(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends SIGTERM to the run's process group (the process itself elsewhere).
    pub fn terminate(&mut self) -> Result<(), RunError> {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return Ok(());
            }
        }
        signal_terminate(self.pid, self.child.as_mut())
    }
}

impl ProcessProbe for DetachedProcess {
    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.pid, %status, "backend process exited");
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "try_wait failed; probing pid");
                    pid_alive(self.pid)
                }
            },
            None => pid_alive(self.pid),
        }
    }
}

/// Starts `binary` with stdin closed and stdout/stderr appended to `log`, in its own process
/// group, so it keeps running when this process exits.
pub fn spawn_detached(
    binary: &Path,
    args: &[String],
    working_dir: &Path,
    log: File,
) -> Result<DetachedProcess, RunError> {
    let stderr = log.try_clone().map_err(|source| RunError::Launch {
        binary: binary.to_path_buf(),
        source,
    })?;

    let mut command = Command::new(binary);
    command
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(false);
    detach(&mut command);

    let child = spawn_with_retry(&mut command, binary)?;
    let pid = child.id().ok_or_else(|| RunError::Launch {
        binary: binary.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, "process exited before reporting a pid"),
    })?;
    debug!(pid, binary = %binary.display(), "spawned detached backend process");

    Ok(DetachedProcess {
        pid,
        child: Some(child),
    })
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, RunError> {
    let mut backoff = Duration::from_millis(2);
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) if is_text_busy(&source) && attempt < 4 => {
                attempt += 1;
                std::thread::sleep(backoff);
                backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
            }
            Err(source) => {
                return Err(RunError::Launch {
                    binary: binary.to_path_buf(),
                    source,
                })
            }
        }
    }
}

#[cfg(unix)]
fn is_text_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &io::Error) -> bool {
    false
}

/// `kill(pid, 0)`: a process we may not signal still exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Without a portable probe a recorded process is assumed alive; the tail ends on a terminal event.
#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn signal_terminate(pid: u32, _child: Option<&mut Child>) -> Result<(), RunError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| RunError::Signal {
        pid,
        message: "pid out of range".to_string(),
    })?;
    let target = Pid::from_raw(raw);
    let result = match killpg(target, Signal::SIGTERM) {
        // Not a group leader (e.g. spawned by an older build); signal the process itself.
        Err(Errno::ESRCH) => kill(target, Signal::SIGTERM),
        other => other,
    };
    match result {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(RunError::Signal {
            pid,
            message: errno.desc().to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn signal_terminate(pid: u32, child: Option<&mut Child>) -> Result<(), RunError> {
    match child {
        Some(child) => child.start_kill().map_err(|err| RunError::Signal {
            pid,
            message: err.to_string(),
        }),
        None => Err(RunError::Signal {
            pid,
            message: "cannot signal a re-attached process on this platform".to_string(),
        }),
    }
}
