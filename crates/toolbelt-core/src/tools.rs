//! Detection of the external binaries the helpers shell out to.

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Git,
    Kubectl,
    Docker,
    Helm,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Git, Tool::Kubectl, Tool::Docker, Tool::Helm];

    pub fn binary(&self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::Kubectl => "kubectl",
            Tool::Docker => "docker",
            Tool::Helm => "helm",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Detected {
    pub tool: Tool,
    pub path: Option<PathBuf>,
}

/// Resolve a program name through the search path, the same lookup the
/// runner's spawn performs.
pub fn resolve(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

pub fn detect(tool: Tool) -> Detected {
    Detected {
        tool,
        path: resolve(tool.binary()),
    }
}

pub fn detect_all() -> Vec<Detected> {
    Tool::ALL.iter().copied().map(detect).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_names_are_stable() {
        assert_eq!(Tool::Git.binary(), "git");
        assert_eq!(Tool::Kubectl.binary(), "kubectl");
        assert_eq!(Tool::Docker.binary(), "docker");
        assert_eq!(Tool::Helm.binary(), "helm");
    }

    #[test]
    fn detect_all_reports_every_tool() {
        // Actual presence depends on the test machine.
        let detected = detect_all();
        assert_eq!(detected.len(), Tool::ALL.len());
    }

    #[test]
    fn unknown_program_does_not_resolve() {
        assert!(resolve("this-command-does-not-exist").is_none());
    }
}
