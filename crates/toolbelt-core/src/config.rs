use crate::error::{Result, ToolbeltError};
use crate::paths;
use crate::runner::{KillStrategy, OutputCapture};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Defaults for bounded command runs. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default = "default_run_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub capture: OutputCapture,
    #[serde(default)]
    pub kill_strategy: KillStrategy,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_run_timeout_ms() -> u64 {
    60_000
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_run_timeout_ms(),
            capture: OutputCapture::default(),
            kill_strategy: KillStrategy::default(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_git_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_git_timeout_ms() -> u64 {
    30_000
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            timeout_ms: default_git_timeout_ms(),
        }
    }
}

impl GitConfig {
    /// The configured remote, or `origin` when it is blank.
    pub fn remote(&self) -> &str {
        match self.remote.trim() {
            "" => "origin",
            remote => remote,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// KubeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubeConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_wait_timeout_ms() -> u64 {
    600_000
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub kube: KubeConfig,
}

impl Config {
    /// Load `toolbelt.yaml` from `root`. A missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        let errors: Vec<String> = config
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(ToolbeltError::Config(errors.join("; ")));
        }
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    /// Check values that parse fine but make no sense at runtime.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.runner.timeout_ms == 0 {
            push(
                WarnLevel::Error,
                "runner.timeout_ms must be greater than zero".into(),
            );
        }
        if self.git.timeout_ms == 0 {
            push(
                WarnLevel::Error,
                "git.timeout_ms must be greater than zero".into(),
            );
        }
        if self.kube.poll_interval_ms == 0 {
            push(
                WarnLevel::Error,
                "kube.poll_interval_ms must be greater than zero".into(),
            );
        }
        if self.kube.namespace.trim().is_empty() {
            push(WarnLevel::Error, "kube.namespace must not be empty".into());
        }
        if self.runner.kill_grace_ms == 0 {
            push(
                WarnLevel::Warning,
                "runner.kill_grace_ms is 0: output still in flight at kill time will be dropped"
                    .into(),
            );
        }
        if self.kube.poll_interval_ms > self.kube.wait_timeout_ms {
            push(
                WarnLevel::Warning,
                format!(
                    "kube.poll_interval_ms ({}) exceeds kube.wait_timeout_ms ({}); waits will poll once",
                    self.kube.poll_interval_ms, self.kube.wait_timeout_ms
                ),
            );
        }
        if self.git.remote.trim().is_empty() {
            push(WarnLevel::Warning, "git.remote is empty; using 'origin'".into());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.runner.timeout(), Duration::from_secs(60));
        assert_eq!(config.git.remote, "origin");
        assert_eq!(config.kube.namespace, "default");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "runner:\n  timeout_ms: 1500\n  kill_strategy: process_group\nkube:\n  namespace: ci\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runner.timeout(), Duration::from_millis(1500));
        assert_eq!(config.runner.kill_strategy, KillStrategy::ProcessGroup);
        assert_eq!(config.runner.capture, OutputCapture::Combined);
        assert_eq!(config.kube.namespace, "ci");
        assert_eq!(config.kube.poll_interval_ms, 2_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "runner:\n  timout_ms: 10\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.git.remote = "upstream".into();
        config.runner.capture = OutputCapture::StdoutOnly;
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn zero_timeout_fails_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::config_path(dir.path()), "runner:\n  timeout_ms: 0\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, ToolbeltError::Config(_)), "{err}");
    }

    #[test]
    fn validate_warns_on_odd_values() {
        let mut config = Config::default();
        config.runner.kill_grace_ms = 0;
        config.kube.poll_interval_ms = 10_000;
        config.kube.wait_timeout_ms = 5_000;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
    }

    #[test]
    fn blank_remote_falls_back_to_origin() {
        let config: Config = serde_yaml::from_str("git:\n  remote: \"  \"\n").unwrap();
        assert_eq!(config.git.remote(), "origin");
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);

        let config: Config = serde_yaml::from_str("git:\n  remote: upstream\n").unwrap();
        assert_eq!(config.git.remote(), "upstream");
    }

    #[test]
    fn default_config_is_clean() {
        assert!(Config::default().validate().is_empty());
    }
}
