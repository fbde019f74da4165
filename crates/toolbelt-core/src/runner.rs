//! Bounded command runner.
//!
//! Runs an external program with a literal argument vector (no shell), drains
//! its output while it runs, and guarantees the call returns shortly after a
//! wall-clock deadline. When the deadline fires, every process whose command
//! line matches the launched one is killed with `SIGKILL` (or the whole tree
//! via `taskkill /T` on Windows), and the caller gets back whatever was
//! printed up to that point.
//!
//! # Flow
//!
//! ```text
//! spawn ──► reader tasks ──► shared buffer
//!   │
//!   ├──► deadline task ── sleep_until(deadline) ─┐
//!   │                                           ├─► Phase (Mutex) decides once
//!   └──► wait for exit + pipes closed ──────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::RunError;
use crate::process::{self, KillReport};
use crate::text;

/// Default time allowed for pipes to close after the kill path has run.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCapture {
    /// stdout and stderr interleaved into one buffer.
    #[default]
    Combined,
    /// stdout only; stderr passes through to the parent.
    StdoutOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillStrategy {
    /// Kill the child plus every process whose command line matches it.
    #[default]
    CommandLine,
    /// Start the child in its own process group and kill the group.
    /// Unix only; elsewhere this behaves like `CommandLine`.
    ProcessGroup,
}

/// A fully described invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    pub capture: OutputCapture,
    pub kill_strategy: KillStrategy,
    pub kill_grace: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            timeout,
            capture: OutputCapture::default(),
            kill_strategy: KillStrategy::default(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn capture(mut self, capture: OutputCapture) -> Self {
        self.capture = capture;
        self
    }

    pub fn kill_strategy(mut self, strategy: KillStrategy) -> Self {
        self.kill_strategy = strategy;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// The full launched command line, program first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        match self.capture {
            OutputCapture::Combined => cmd.stderr(Stdio::piped()),
            OutputCapture::StdoutOnly => cmd.stderr(Stdio::inherit()),
        };
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        if self.kill_strategy == KillStrategy::ProcessGroup {
            cmd.process_group(0);
        }
        cmd
    }
}

/// Output of a command that exited zero before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Captured text exactly as printed (not trimmed).
    pub output: String,
    pub pid: Option<u32>,
    pub elapsed: Duration,
}

/// Run `program` with `args`, returning its combined output or an error that
/// says whether it failed to start, timed out, or exited non-zero.
pub async fn run_command_with_timeout<S: AsRef<str>>(
    program: &str,
    args: &[S],
    timeout: Duration,
) -> Result<String, RunError> {
    let spec = CommandSpec::new(program, timeout).args(args.iter().map(|a| a.as_ref()));
    run(&spec).await.map(|out| out.output)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
    TimedOut,
}

/// Everything the deadline task needs to clean up after a timeout.
#[derive(Debug, Clone)]
struct KillTarget {
    pid: Option<u32>,
    argv: Vec<String>,
    strategy: KillStrategy,
}

/// One launched process, exclusively owned by a single [`run`] call.
struct ManagedProcess {
    pid: Option<u32>,
    argv: Vec<String>,
    output: Arc<Mutex<Vec<u8>>>,
    phase: Arc<Mutex<Phase>>,
    /// Fixed at spawn; never extended.
    deadline: Instant,
}

impl ManagedProcess {
    fn output_text(&self) -> String {
        let buf = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Try to move `Running -> next`. Returns the phase that won.
    fn settle(&self, next: Phase) -> Phase {
        settle(&self.phase, next)
    }
}

fn settle(phase: &Mutex<Phase>, next: Phase) -> Phase {
    let mut current = phase.lock().unwrap_or_else(PoisonError::into_inner);
    if *current == Phase::Running {
        *current = next;
    }
    *current
}

/// Run a command under its deadline. See the module docs for the flow.
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, RunError> {
    let started = Instant::now();
    let mut child = spec.build_command().spawn().map_err(|source| RunError::Launch {
        program: spec.program.clone(),
        source,
    })?;

    let proc = ManagedProcess {
        pid: child.id(),
        argv: spec.argv(),
        output: Arc::new(Mutex::new(Vec::new())),
        phase: Arc::new(Mutex::new(Phase::Running)),
        deadline: deadline_after(started, spec.timeout),
    };
    tracing::debug!(
        command = %text::command_line(&proc.argv),
        pid = ?proc.pid,
        timeout = ?spec.timeout,
        "spawned bounded command"
    );

    // Start draining before anything else so a chatty child never blocks on
    // a full pipe.
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(drain(stdout, Arc::clone(&proc.output))));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(drain(stderr, Arc::clone(&proc.output))));
    }
    let reader_aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();

    let (fired_tx, mut fired_rx) = oneshot::channel();
    let deadline_task = tokio::spawn(watch_deadline(
        proc.deadline,
        Arc::clone(&proc.phase),
        KillTarget {
            pid: proc.pid,
            argv: proc.argv.clone(),
            strategy: spec.kill_strategy,
        },
        fired_tx,
    ));

    let completion = async move {
        let status = child.wait().await;
        for reader in readers {
            let _ = reader.await;
        }
        status
    };
    tokio::pin!(completion);

    let status = tokio::select! {
        status = &mut completion => {
            match proc.settle(Phase::Completed) {
                Phase::Completed => {
                    deadline_task.abort();
                    Some(status)
                }
                // The deadline won the race while we were finishing up; its
                // kill report is on the way.
                _ => None,
            }
        }
        Ok(report) = &mut fired_rx => {
            return Err(finish_timeout(spec, &proc, report, completion, &reader_aborts).await);
        }
    };

    match status {
        Some(status) => finish_exit(spec, &proc, status, started.elapsed()),
        None => {
            let report = fired_rx.await.unwrap_or_default();
            Err(timed_out(spec, &proc, report))
        }
    }
}

async fn finish_timeout<F>(
    spec: &CommandSpec,
    proc: &ManagedProcess,
    report: KillReport,
    completion: std::pin::Pin<&mut F>,
    reader_aborts: &[tokio::task::AbortHandle],
) -> RunError
where
    F: Future<Output = std::io::Result<ExitStatus>>,
{
    // Killed processes close their pipe ends; anything that escaped the kill
    // and still holds one gets cut off after the grace period.
    if tokio::time::timeout(spec.kill_grace, completion).await.is_err() {
        tracing::warn!(
            program = %spec.program,
            grace = ?spec.kill_grace,
            "output pipes still open after kill; abandoning readers"
        );
        for abort in reader_aborts {
            abort.abort();
        }
    }
    timed_out(spec, proc, report)
}

fn timed_out(spec: &CommandSpec, proc: &ManagedProcess, kill: KillReport) -> RunError {
    tracing::info!(
        program = %spec.program,
        pid = ?proc.pid,
        timeout = ?spec.timeout,
        killed = ?kill.killed,
        "command timed out"
    );
    RunError::TimedOut {
        program: spec.program.clone(),
        timeout: spec.timeout,
        output: proc.output_text(),
        kill,
    }
}

fn finish_exit(
    spec: &CommandSpec,
    proc: &ManagedProcess,
    status: std::io::Result<ExitStatus>,
    elapsed: Duration,
) -> Result<CommandOutput, RunError> {
    let status = status.map_err(|source| RunError::Wait {
        program: spec.program.clone(),
        source,
    })?;
    let output = proc.output_text();
    tracing::debug!(program = %spec.program, %status, ?elapsed, "command exited");
    if !status.success() {
        return Err(RunError::NonZeroExit {
            program: spec.program.clone(),
            code: status.code(),
            output,
        });
    }
    Ok(CommandOutput {
        output,
        pid: proc.pid,
        elapsed,
    })
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]),
        }
    }
}

/// About thirty years out; stands in for timeouts that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .unwrap_or_else(|| started + FAR_FUTURE)
}

/// Single-shot deadline. Claims the phase before killing anything so a
/// process that just finished is never reported as timed out.
async fn watch_deadline(
    deadline: Instant,
    phase: Arc<Mutex<Phase>>,
    target: KillTarget,
    fired: oneshot::Sender<KillReport>,
) {
    tokio::time::sleep_until(deadline).await;
    if settle(&phase, Phase::TimedOut) != Phase::TimedOut {
        return;
    }
    let report = match tokio::task::spawn_blocking(move || kill_target(&target)).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "kill task failed");
            KillReport::default()
        }
    };
    let _ = fired.send(report);
}

fn kill_target(target: &KillTarget) -> KillReport {
    let mut report = KillReport::default();

    #[cfg(unix)]
    if target.strategy == KillStrategy::ProcessGroup {
        if let Some(pgid) = target.pid {
            report.record(pgid, process::kill_group(pgid));
            return report;
        }
    }

    let mut pids = process::find_by_command_line(&target.argv);
    if let Some(pid) = target.pid {
        if !pids.contains(&pid) {
            pids.insert(0, pid);
        }
    }
    for pid in pids {
        report.record(pid, process::kill_pid(pid));
    }
    report
}
