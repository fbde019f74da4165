use crate::cmd::block_on;
use crate::output::print_json;
use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use std::path::Path;
use toolbelt_core::config::Config;
use toolbelt_core::git::{self, Bump, Git};

#[derive(Subcommand)]
pub enum GitSubcommand {
    /// Print the repository top-level directory
    Root,
    /// Print the current branch
    Branch,
    /// Print the HEAD commit
    Head {
        #[arg(long)]
        short: bool,
    },
    /// Report whether the working tree is clean
    Status,
    /// List tags, highest version first
    Tags,
    /// Create a tag at HEAD
    Tag {
        name: String,
        /// Annotate the tag with this message
        #[arg(long, short = 'm')]
        message: Option<String>,
        /// Push the tag after creating it
        #[arg(long)]
        push: bool,
        /// Remote to push to (default: git.remote)
        #[arg(long)]
        remote: Option<String>,
    },
    /// Print the version that follows the latest tag
    NextTag {
        #[arg(long, value_enum, default_value_t = BumpArg::Patch)]
        bump: BumpArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BumpArg {
    Major,
    Minor,
    Patch,
}

impl From<BumpArg> for Bump {
    fn from(b: BumpArg) -> Self {
        match b {
            BumpArg::Major => Bump::Major,
            BumpArg::Minor => Bump::Minor,
            BumpArg::Patch => Bump::Patch,
        }
    }
}

/// Tag used as the base when a repository has none yet.
const INITIAL_TAG: &str = "v0.0.0";

pub fn run(root: &Path, subcmd: GitSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let repo = Git::new(root, config.git.timeout());
    block_on(dispatch(&repo, &config, subcmd, json))?
}

async fn dispatch(
    repo: &Git,
    config: &Config,
    subcmd: GitSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        GitSubcommand::Root => {
            let root = repo.repo_root().await?;
            emit(json, "root", &root.display().to_string())
        }
        GitSubcommand::Branch => emit(json, "branch", &repo.current_branch().await?),
        GitSubcommand::Head { short } => emit(json, "commit", &repo.head_commit(short).await?),
        GitSubcommand::Status => {
            let clean = repo.is_clean().await?;
            if json {
                print_json(&serde_json::json!({ "clean": clean }))
            } else {
                println!("{}", if clean { "clean" } else { "dirty" });
                Ok(())
            }
        }
        GitSubcommand::Tags => {
            let tags = repo.tags().await?;
            if json {
                print_json(&tags)
            } else {
                for tag in &tags {
                    println!("{tag}");
                }
                Ok(())
            }
        }
        GitSubcommand::Tag {
            name,
            message,
            push,
            remote,
        } => {
            repo.create_tag(&name, message.as_deref())
                .await
                .with_context(|| format!("failed to create tag '{name}'"))?;
            let remote = remote.unwrap_or_else(|| config.git.remote().to_string());
            if push {
                repo.push_tag(&remote, &name)
                    .await
                    .with_context(|| format!("failed to push tag '{name}' to {remote}"))?;
            }
            if json {
                print_json(&serde_json::json!({
                    "tag": name,
                    "annotated": message.is_some(),
                    "pushed": push,
                    "remote": push.then_some(remote),
                }))
            } else {
                if push {
                    println!("Created and pushed {name} to {remote}");
                } else {
                    println!("Created {name}");
                }
                Ok(())
            }
        }
        GitSubcommand::NextTag { bump } => {
            let latest = repo.latest_tag().await?;
            let base = latest.as_deref().unwrap_or(INITIAL_TAG);
            let next = git::next_version(base, bump.into())?;
            if json {
                print_json(&serde_json::json!({ "latest": latest, "next": next }))
            } else {
                println!("{next}");
                Ok(())
            }
        }
    }
}

fn emit(json: bool, key: &str, value: &str) -> anyhow::Result<()> {
    if json {
        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), serde_json::Value::from(value));
        print_json(&map)
    } else {
        println!("{value}");
        Ok(())
    }
}
