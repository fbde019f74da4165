use std::time::Duration;

use thiserror::Error;

use crate::process::KillReport;

/// Failure modes of a single bounded command invocation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    TimedOut {
        program: String,
        timeout: Duration,
        /// Output captured before the process was killed.
        output: String,
        kill: KillReport,
    },

    #[error("'{program}' exited with {}", describe_exit(.code))]
    NonZeroExit {
        program: String,
        /// `None` when the process was terminated by a signal.
        code: Option<i32>,
        output: String,
    },

    #[error("failed waiting on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::TimedOut { .. })
    }

    pub fn is_launch_failure(&self) -> bool {
        matches!(self, RunError::Launch { .. })
    }

    /// Whatever the process printed before the run ended, if it started at all.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            RunError::TimedOut { output, .. } | RunError::NonZeroExit { output, .. } => {
                Some(output)
            }
            RunError::Launch { .. } | RunError::Wait { .. } => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ToolbeltError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("tag already exists: {0}")]
    TagExists(String),

    #[error("invalid version tag '{0}': expected [v]MAJOR.MINOR.PATCH")]
    InvalidVersion(String),

    #[error("invalid duration '{0}': expected e.g. 500ms, 5s, 2m, 1h")]
    InvalidDuration(String),

    #[error("malformed CSV in {path} at line {line}: {reason}")]
    Csv {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ToolbeltError>;
