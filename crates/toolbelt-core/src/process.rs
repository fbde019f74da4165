//! Process discovery and forced termination.
//!
//! Everything platform-specific about killing a runaway command lives here so
//! the runner's timeout path can stay platform-agnostic:
//!
//! - Linux: candidates come from `/proc/<pid>/cmdline`, kills are `SIGKILL`.
//! - Other Unix: candidates come from `ps -axww -o pid= -o command=`.
//! - Windows: no command-line scan; `taskkill /F /T` takes the whole tree
//!   rooted at the direct child.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KillError {
    #[error("permission denied killing pid {0}")]
    PermissionDenied(u32),

    #[error("failed to kill pid {pid}: {message}")]
    Failed { pid: u32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    /// The process was gone before the signal landed.
    AlreadyExited,
}

/// What the forced-kill path actually managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KillReport {
    pub killed: Vec<u32>,
    pub already_exited: Vec<u32>,
    pub failed: Vec<(u32, String)>,
}

impl KillReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, pid: u32, result: Result<KillOutcome, KillError>) {
        match result {
            Ok(KillOutcome::Killed) => self.killed.push(pid),
            Ok(KillOutcome::AlreadyExited) => self.already_exited.push(pid),
            Err(e) => {
                tracing::warn!(pid, error = %e, "forced kill failed");
                self.failed.push((pid, e.to_string()));
            }
        }
    }
}

/// Find live processes whose command line matches `argv`.
///
/// A candidate matches when its arguments equal `argv[1..]` exactly and its
/// program is either identical to `argv[0]` or has the same file name (the
/// launched name may have been resolved through the search path). The calling
/// process is never included.
///
/// This is a best-effort heuristic: an unrelated process that happens to run
/// the very same command line is indistinguishable and will match too.
pub fn find_by_command_line(argv: &[String]) -> Vec<u32> {
    if argv.is_empty() {
        return Vec::new();
    }
    let own = std::process::id();
    let mut pids: Vec<u32> = platform::candidates()
        .into_iter()
        .filter(|(pid, _)| *pid != own)
        .filter(|(_, candidate)| command_line_matches(candidate, argv))
        .map(|(pid, _)| pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Unconditionally kill a single process.
pub fn kill_pid(pid: u32) -> Result<KillOutcome, KillError> {
    platform::kill_pid(pid)
}

/// Kill every member of the process group led by `pgid`.
///
/// Only meaningful for children launched in their own group; on platforms
/// without process groups this degrades to [`kill_pid`].
pub fn kill_group(pgid: u32) -> Result<KillOutcome, KillError> {
    platform::kill_group(pgid)
}

fn command_line_matches(candidate: &[String], argv: &[String]) -> bool {
    if candidate.len() != argv.len() || candidate.is_empty() {
        return false;
    }
    candidate[1..] == argv[1..] && same_program(&candidate[0], &argv[0])
}

fn same_program(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (Path::new(a).file_name(), Path::new(b).file_name()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{unix_signals, KillError, KillOutcome};

    pub(super) fn candidates() -> Vec<(u32, Vec<String>)> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter_map(|pid| {
                // Processes can vanish mid-scan; skip anything unreadable.
                let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
                let argv = split_cmdline(&raw);
                (!argv.is_empty()).then_some((pid, argv))
            })
            .collect()
    }

    /// `/proc/<pid>/cmdline` is NUL-separated with a trailing NUL. Zombies and
    /// kernel threads have an empty file.
    pub(super) fn split_cmdline(raw: &[u8]) -> Vec<String> {
        raw.split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect()
    }

    pub(super) fn kill_pid(pid: u32) -> Result<KillOutcome, KillError> {
        unix_signals::kill_pid(pid)
    }

    pub(super) fn kill_group(pgid: u32) -> Result<KillOutcome, KillError> {
        unix_signals::kill_group(pgid)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use super::{unix_signals, KillError, KillOutcome};

    pub(super) fn candidates() -> Vec<(u32, Vec<String>)> {
        let output = match std::process::Command::new("ps")
            .args(["-axww", "-o", "pid=", "-o", "command="])
            .output()
        {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                tracing::warn!(status = %o.status, "ps exited unsuccessfully");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to run ps");
                return Vec::new();
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_ps_line)
            .collect()
    }

    /// `ps` only gives the space-joined command, so arguments containing
    /// whitespace cannot be recovered exactly.
    fn parse_ps_line(line: &str) -> Option<(u32, Vec<String>)> {
        let line = line.trim_start();
        let (pid, rest) = line.split_once(char::is_whitespace)?;
        let pid = pid.parse().ok()?;
        let argv: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
        (!argv.is_empty()).then_some((pid, argv))
    }

    pub(super) fn kill_pid(pid: u32) -> Result<KillOutcome, KillError> {
        unix_signals::kill_pid(pid)
    }

    pub(super) fn kill_group(pgid: u32) -> Result<KillOutcome, KillError> {
        unix_signals::kill_group(pgid)
    }
}

#[cfg(unix)]
mod unix_signals {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    use super::{KillError, KillOutcome};

    pub(super) fn kill_pid(pid: u32) -> Result<KillOutcome, KillError> {
        classify(pid, kill(Pid::from_raw(pid as i32), Signal::SIGKILL))
    }

    pub(super) fn kill_group(pgid: u32) -> Result<KillOutcome, KillError> {
        classify(pgid, killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL))
    }

    fn classify(pid: u32, result: nix::Result<()>) -> Result<KillOutcome, KillError> {
        match result {
            Ok(()) => Ok(KillOutcome::Killed),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyExited),
            Err(Errno::EPERM) => Err(KillError::PermissionDenied(pid)),
            Err(e) => Err(KillError::Failed {
                pid,
                message: e.desc().to_string(),
            }),
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::{KillError, KillOutcome};

    pub(super) fn candidates() -> Vec<(u32, Vec<String>)> {
        Vec::new()
    }

    pub(super) fn kill_pid(pid: u32) -> Result<KillOutcome, KillError> {
        let output = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .map_err(|e| KillError::Failed {
                pid,
                message: format!("taskkill: {e}"),
            })?;
        if output.status.success() {
            return Ok(KillOutcome::Killed);
        }
        // taskkill exits 128 when the pid no longer exists.
        if output.status.code() == Some(128) {
            return Ok(KillOutcome::AlreadyExited);
        }
        Err(KillError::Failed {
            pid,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    pub(super) fn kill_group(pgid: u32) -> Result<KillOutcome, KillError> {
        kill_pid(pgid)
    }
}
