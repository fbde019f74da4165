use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use toolbelt_core::config::{Config, WarnLevel};
use toolbelt_core::{io, paths};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (defaults filled in)
    Show,

    /// Write a toolbelt.yaml with default values if none exists
    Init,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Init => init(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

fn init(root: &Path, json: bool) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    let data = serde_yaml::to_string(&Config::default())?;
    let written = io::write_if_missing(&path, data.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    if json {
        print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "created": written,
        }))
    } else {
        if written {
            println!("Created {}", path.display());
        } else {
            println!("{} already exists", path.display());
        }
        Ok(())
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    // Parsed directly so warnings print alongside errors.
    let config: Config = if path.exists() {
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&data).with_context(|| format!("invalid {}", path.display()))?
    } else {
        Config::default()
    };
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
