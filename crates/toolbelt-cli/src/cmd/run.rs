use crate::cmd::block_on;
use crate::output::print_json;
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use toolbelt_core::config::Config;
use toolbelt_core::runner::{self, CommandSpec, KillStrategy, OutputCapture};
use toolbelt_core::RunError;

/// Exit status for a timed-out run, as `timeout(1)` reports it.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit status when the program could not be started, as shells report it.
pub const EXIT_LAUNCH_FAILED: i32 = 127;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes for `toolbelt run`
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RunExit(pub RunError);

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        exit_code_for(&self.0)
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub struct RunArgs {
    pub timeout: Option<Duration>,
    pub stdout_only: bool,
    pub process_group: bool,
    pub kill_grace: Option<Duration>,
    pub command: Vec<String>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let spec = build_spec(&config, args)?;

    tracing::debug!(program = %spec.program, timeout = ?spec.timeout, "toolbelt run");
    let result = block_on(runner::run(&spec))?;

    match result {
        Ok(out) => {
            if json {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "exit_code": 0,
                    "output": out.output,
                    "pid": out.pid,
                    "elapsed_ms": out.elapsed.as_millis() as u64,
                }))?;
            } else {
                emit(&out.output)?;
            }
            Ok(())
        }
        Err(err) => {
            if json {
                print_json(&failure_json(&err))?;
            } else if let Some(partial) = err.partial_output() {
                emit(partial)?;
            }
            Err(RunExit(err).into())
        }
    }
}

fn build_spec(config: &Config, args: RunArgs) -> anyhow::Result<CommandSpec> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("no command given; usage: toolbelt run -- PROGRAM [ARGS...]"))?;

    let capture = if args.stdout_only {
        OutputCapture::StdoutOnly
    } else {
        config.runner.capture
    };
    let kill_strategy = if args.process_group {
        KillStrategy::ProcessGroup
    } else {
        config.runner.kill_strategy
    };

    Ok(
        CommandSpec::new(program.as_str(), args.timeout.unwrap_or(config.runner.timeout()))
            .args(rest.iter().cloned())
            .capture(capture)
            .kill_strategy(kill_strategy)
            .kill_grace(args.kill_grace.unwrap_or(config.runner.kill_grace())),
    )
}

fn failure_json(err: &RunError) -> serde_json::Value {
    let status = match err {
        RunError::TimedOut { .. } => "timed_out",
        RunError::Launch { .. } => "launch_failed",
        RunError::NonZeroExit { .. } => "exited",
        RunError::Wait { .. } => "wait_failed",
    };
    let mut value = serde_json::json!({
        "status": status,
        "exit_code": exit_code_for(err),
        "output": err.partial_output(),
        "error": err.to_string(),
    });
    if let RunError::TimedOut { kill, .. } = err {
        value["kill"] = serde_json::json!(kill);
    }
    value
}

fn exit_code_for(err: &RunError) -> i32 {
    match err {
        RunError::TimedOut { .. } => EXIT_TIMED_OUT,
        RunError::Launch { .. } => EXIT_LAUNCH_FAILED,
        // A signal death has no code of its own.
        RunError::NonZeroExit { code, .. } => code.filter(|c| *c != 0).unwrap_or(1),
        RunError::Wait { .. } => 1,
    }
}

fn emit(output: &str) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &[&str]) -> RunArgs {
        RunArgs {
            timeout: None,
            stdout_only: false,
            process_group: false,
            kill_grace: None,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn spec_takes_defaults_from_config() {
        let mut config = Config::default();
        config.runner.timeout_ms = 1_500;
        config.runner.kill_strategy = KillStrategy::ProcessGroup;
        let spec = build_spec(&config, args(&["make", "-j4", "test"])).unwrap();
        assert_eq!(spec.program, "make");
        assert_eq!(spec.args, vec!["-j4", "test"]);
        assert_eq!(spec.timeout, Duration::from_millis(1_500));
        assert_eq!(spec.kill_strategy, KillStrategy::ProcessGroup);
        assert_eq!(spec.capture, OutputCapture::Combined);
    }

    #[test]
    fn flags_override_config() {
        let mut a = args(&["ls"]);
        a.timeout = Some(Duration::from_secs(3));
        a.stdout_only = true;
        a.process_group = true;
        let spec = build_spec(&Config::default(), a).unwrap();
        assert_eq!(spec.timeout, Duration::from_secs(3));
        assert_eq!(spec.capture, OutputCapture::StdoutOnly);
        assert_eq!(spec.kill_strategy, KillStrategy::ProcessGroup);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(build_spec(&Config::default(), args(&[])).is_err());
    }

    #[test]
    fn exit_codes_follow_shell_conventions() {
        let launch = RunExit(RunError::Launch {
            program: "nope".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(launch.exit_code(), 127);

        let exited = RunExit(RunError::NonZeroExit {
            program: "false".into(),
            code: Some(3),
            output: String::new(),
        });
        assert_eq!(exited.exit_code(), 3);

        let signalled = RunExit(RunError::NonZeroExit {
            program: "sleep".into(),
            code: None,
            output: String::new(),
        });
        assert_eq!(signalled.exit_code(), 1);
    }
}
