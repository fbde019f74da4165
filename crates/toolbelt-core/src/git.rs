//! Git plumbing on top of the bounded runner.
//!
//! Every call goes through [`crate::runner::run`], so a hung `git` (credential
//! prompt, stalled fetch) is killed at the configured deadline instead of
//! blocking the build.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunError, ToolbeltError};
use crate::runner::{self, CommandSpec};
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bump {
    Major,
    Minor,
    Patch,
}

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| {
        Regex::new(r"^(?P<prefix>v?)(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)$").unwrap()
    })
}

/// Compute the tag that follows `tag` under `bump`, keeping a `v` prefix if
/// present. `v1.2.3` + `Minor` is `v1.3.0`.
pub fn next_version(tag: &str, bump: Bump) -> Result<String> {
    let caps = version_re()
        .captures(tag.trim())
        .ok_or_else(|| ToolbeltError::InvalidVersion(tag.to_string()))?;
    let part = |name: &str| -> Result<u64> {
        caps[name]
            .parse()
            .map_err(|_| ToolbeltError::InvalidVersion(tag.to_string()))
    };
    let (major, minor, patch) = (part("major")?, part("minor")?, part("patch")?);
    let (major, minor, patch) = match bump {
        Bump::Major => (major + 1, 0, 0),
        Bump::Minor => (major, minor + 1, 0),
        Bump::Patch => (major, minor, patch + 1),
    };
    Ok(format!("{}{major}.{minor}.{patch}", &caps["prefix"]))
}

/// A repository working directory plus the deadline applied to each command.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clone `url` into `dest` and return a handle on the new checkout.
    ///
    /// Runs from the current directory, so relative `url` and `dest` resolve
    /// the way they would for `git clone` typed in a shell.
    pub async fn clone_repo(url: &str, dest: &Path, timeout: Duration) -> Result<Git> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::io::ensure_dir(parent)?;
        }
        let dest_str = dest.to_string_lossy().into_owned();
        let args = ["clone", "--quiet", url, dest_str.as_str()];
        run_git(None, timeout, &args).await.map_err(|e| git_error(&args, e))?;
        Ok(Git::new(dest, timeout))
    }

    pub async fn repo_root(&self) -> Result<PathBuf> {
        let out = self.git(&["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    pub async fn current_branch(&self) -> Result<String> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    pub async fn head_commit(&self, short: bool) -> Result<String> {
        let args: &[&str] = if short {
            &["rev-parse", "--short", "HEAD"]
        } else {
            &["rev-parse", "HEAD"]
        };
        Ok(self.git(args).await?.trim().to_string())
    }

    /// True when there are no staged, unstaged, or untracked changes.
    pub async fn is_clean(&self) -> Result<bool> {
        let out = self.git(&["status", "--porcelain"]).await?;
        Ok(text::non_empty_lines(&out).is_empty())
    }

    /// All tags, highest version first.
    pub async fn tags(&self) -> Result<Vec<String>> {
        let out = self
            .git(&["tag", "--list", "--sort=-version:refname"])
            .await?;
        Ok(text::non_empty_lines(&out)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// The most recent tag reachable from HEAD, or `None` if there is none.
    pub async fn latest_tag(&self) -> Result<Option<String>> {
        match self.git(&["describe", "--tags", "--abbrev=0"]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(ToolbeltError::Git { message, .. })
                if text::contains_any(
                    &message,
                    &["No names found", "No tags can describe", "cannot describe"],
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn tag_exists(&self, name: &str) -> Result<bool> {
        let reference = format!("refs/tags/{name}");
        let args = ["rev-parse", "--quiet", "--verify", reference.as_str()];
        match run_git(Some(&self.dir), self.timeout, &args).await {
            Ok(_) => Ok(true),
            // --verify --quiet exits 1 with no output for a missing ref.
            Err(RunError::NonZeroExit {
                code: Some(1),
                output,
                ..
            }) if output.trim().is_empty() => Ok(false),
            Err(e) => Err(git_error(&args, e)),
        }
    }

    /// Create `name` at HEAD: annotated when `message` is given, lightweight
    /// otherwise. Refuses to move an existing tag.
    pub async fn create_tag(&self, name: &str, message: Option<&str>) -> Result<()> {
        if self.tag_exists(name).await? {
            return Err(ToolbeltError::TagExists(name.to_string()));
        }
        match message {
            Some(msg) => self.git(&["tag", "--annotate", "--message", msg, name]).await?,
            None => self.git(&["tag", name]).await?,
        };
        tracing::info!(tag = name, dir = %self.dir.display(), "created tag");
        Ok(())
    }

    pub async fn push_tag(&self, remote: &str, name: &str) -> Result<()> {
        let refspec = format!("refs/tags/{name}");
        self.git(&["push", "--quiet", remote, &refspec]).await?;
        tracing::info!(tag = name, remote, "pushed tag");
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.dir), self.timeout, args)
            .await
            .map_err(|e| git_error(args, e))
    }
}

/// `dir: None` inherits the caller's working directory.
async fn run_git(
    dir: Option<&Path>,
    timeout: Duration,
    args: &[&str],
) -> std::result::Result<String, RunError> {
    let mut spec = CommandSpec::new("git", timeout)
        .args(args.iter().copied())
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C");
    if let Some(dir) = dir {
        spec = spec.cwd(dir);
    }
    runner::run(&spec).await.map(|out| out.output)
}

fn git_error(args: &[&str], err: RunError) -> ToolbeltError {
    match err {
        RunError::NonZeroExit { output, .. } => ToolbeltError::Git {
            command: text::command_line(args),
            message: text::truncate_chars(output.trim(), 500),
        },
        e => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn git_available() -> bool {
        crate::tools::resolve("git").is_some()
    }

    async fn init_repo(dir: &Path) -> Git {
        let git = Git::new(dir, TIMEOUT);
        git.git(&["init", "--quiet"]).await.unwrap();
        git.git(&["symbolic-ref", "HEAD", "refs/heads/main"])
            .await
            .unwrap();
        git.git(&["config", "user.name", "Toolbelt Test"])
            .await
            .unwrap();
        git.git(&["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        git.git(&["config", "commit.gpgsign", "false"]).await.unwrap();
        git.git(&["config", "tag.gpgsign", "false"]).await.unwrap();
        git.git(&["commit", "--quiet", "--allow-empty", "-m", "init"])
            .await
            .unwrap();
        git
    }

    #[test]
    fn next_version_bumps_each_part() {
        assert_eq!(next_version("v1.2.3", Bump::Patch).unwrap(), "v1.2.4");
        assert_eq!(next_version("v1.2.3", Bump::Minor).unwrap(), "v1.3.0");
        assert_eq!(next_version("v1.2.3", Bump::Major).unwrap(), "v2.0.0");
        assert_eq!(next_version("0.9.9", Bump::Minor).unwrap(), "0.10.0");
    }

    #[test]
    fn next_version_rejects_non_semver() {
        for bad in ["latest", "v1.2", "v1.2.3-rc1", "release-1.0.0"] {
            assert!(
                matches!(
                    next_version(bad, Bump::Patch),
                    Err(ToolbeltError::InvalidVersion(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn branch_head_and_cleanliness() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let git = init_repo(dir.path()).await;

        assert_eq!(git.current_branch().await.unwrap(), "main");
        let full = git.head_commit(false).await.unwrap();
        let short = git.head_commit(true).await.unwrap();
        assert_eq!(full.len(), 40);
        assert!(full.starts_with(&short));

        assert!(git.is_clean().await.unwrap());
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        assert!(!git.is_clean().await.unwrap());

        let root = git.repo_root().await.unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn tags_are_created_listed_and_protected() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let git = init_repo(dir.path()).await;

        assert_eq!(git.latest_tag().await.unwrap(), None);
        assert!(!git.tag_exists("v0.1.0").await.unwrap());

        git.create_tag("v0.1.0", None).await.unwrap();
        git.create_tag("v0.2.0", Some("second release")).await.unwrap();

        assert!(git.tag_exists("v0.1.0").await.unwrap());
        assert_eq!(git.tags().await.unwrap(), vec!["v0.2.0", "v0.1.0"]);
        assert_eq!(git.latest_tag().await.unwrap().as_deref(), Some("v0.2.0"));

        let err = git.create_tag("v0.1.0", None).await.unwrap_err();
        assert!(matches!(err, ToolbeltError::TagExists(_)), "{err}");
    }

    #[tokio::test]
    async fn failures_carry_git_message() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let err = Git::new(dir.path(), TIMEOUT)
            .current_branch()
            .await
            .unwrap_err();
        let ToolbeltError::Git { command, message } = err else {
            panic!("expected Git error, got {err:?}");
        };
        assert_eq!(command, "rev-parse --abbrev-ref HEAD");
        assert!(message.contains("not a git repository"), "{message}");
    }

    #[tokio::test]
    async fn tag_exists_outside_a_repo_is_an_error() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let err = Git::new(dir.path(), TIMEOUT)
            .tag_exists("v1.0.0")
            .await
            .unwrap_err();
        let ToolbeltError::Git { message, .. } = err else {
            panic!("expected Git error, got {err:?}");
        };
        assert!(message.contains("not a git repository"), "{message}");
    }

    #[tokio::test]
    async fn clone_resolves_relative_paths_from_current_dir() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        init_repo(&origin).await;

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let cloned = Git::clone_repo("origin", Path::new("work/clone"), TIMEOUT).await;
        std::env::set_current_dir(previous).unwrap();

        let clone = cloned.unwrap();
        assert_eq!(clone.dir(), Path::new("work/clone"));
        assert!(dir.path().join("work/clone/.git").is_dir());
        assert!(!dir.path().join("work/work").exists());
    }

    #[tokio::test]
    async fn clone_then_push_tag_to_origin() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        init_repo(&origin).await;

        let origin_url = origin.to_string_lossy().into_owned();
        let clone = Git::clone_repo(&origin_url, &dir.path().join("work/clone"), TIMEOUT)
            .await
            .unwrap();
        clone.git(&["config", "user.name", "Toolbelt Test"]).await.unwrap();
        clone
            .git(&["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        assert_eq!(clone.current_branch().await.unwrap(), "main");

        clone.create_tag("v1.0.0", None).await.unwrap();
        clone.push_tag("origin", "v1.0.0").await.unwrap();

        let origin_git = Git::new(&origin, TIMEOUT);
        assert!(origin_git.tag_exists("v1.0.0").await.unwrap());
    }
}
