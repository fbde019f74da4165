use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use toolbelt_core::{io, text};

#[derive(Subcommand)]
pub enum FileSubcommand {
    /// Report whether PATH is a file, a directory, or missing
    Exists { path: String },
    /// Print the non-blank lines of a file
    Lines { path: String },
    /// Print a CSV file as a table (first record is the header)
    Csv {
        path: String,
        /// Treat every record as data
        #[arg(long)]
        no_header: bool,
    },
    /// List files with an extension under a directory (default: project root)
    Find {
        /// Extension without the dot, e.g. yaml
        #[arg(long)]
        ext: String,
        dir: Option<String>,
    },
    /// Append LINE to PATH unless it is already there
    EnsureLine { path: String, line: String },
}

pub fn run(root: &Path, subcmd: FileSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        FileSubcommand::Exists { path } => exists(&path, json),
        FileSubcommand::Lines { path } => lines(&path, json),
        FileSubcommand::Csv { path, no_header } => csv(&path, no_header, json),
        FileSubcommand::Find { ext, dir } => find(root, dir.as_deref(), &ext, json),
        FileSubcommand::EnsureLine { path, line } => ensure_line(&path, &line, json),
    }
}

fn resolve(path: &str) -> anyhow::Result<PathBuf> {
    io::expand_home(path).with_context(|| format!("cannot resolve {path}"))
}

fn exists(path: &str, json: bool) -> anyhow::Result<()> {
    let resolved = resolve(path)?;
    let kind = if io::file_exists(&resolved) {
        "file"
    } else if io::dir_exists(&resolved) {
        "dir"
    } else {
        "missing"
    };
    if json {
        print_json(&serde_json::json!({
            "path": resolved.display().to_string(),
            "exists": kind != "missing",
            "kind": kind,
        }))?;
    } else {
        println!("{kind}");
    }
    if kind == "missing" {
        anyhow::bail!("{} does not exist", resolved.display());
    }
    Ok(())
}

fn lines(path: &str, json: bool) -> anyhow::Result<()> {
    let resolved = resolve(path)?;
    let content = std::fs::read_to_string(&resolved)
        .with_context(|| format!("failed to read {}", resolved.display()))?;
    let lines = text::non_empty_lines(&content);
    if json {
        return print_json(&lines);
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn csv(path: &str, no_header: bool, json: bool) -> anyhow::Result<()> {
    let resolved = resolve(path)?;
    let mut records = io::read_csv(&resolved)?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    let header: Vec<String> = if no_header {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (1..=width).map(|i| format!("COL{i}")).collect()
    } else {
        records.remove(0)
    };
    let headers: Vec<&str> = header.iter().map(String::as_str).collect();
    print_table(&headers, records);
    Ok(())
}

fn find(root: &Path, dir: Option<&str>, ext: &str, json: bool) -> anyhow::Result<()> {
    let base = match dir {
        Some(d) => resolve(d)?,
        None => root.to_path_buf(),
    };
    let ext = ext.trim_start_matches('.');
    let files = io::find_files(&base, ext)
        .with_context(|| format!("failed to scan {}", base.display()))?;
    let shown: Vec<String> = files
        .iter()
        .map(|f| f.strip_prefix(&base).unwrap_or(f).display().to_string())
        .collect();
    if json {
        return print_json(&shown);
    }
    for f in &shown {
        println!("{f}");
    }
    Ok(())
}

fn ensure_line(path: &str, line: &str, json: bool) -> anyhow::Result<()> {
    let resolved = resolve(path)?;
    let changed = io::ensure_line(&resolved, line)
        .with_context(|| format!("failed to update {}", resolved.display()))?;
    if json {
        print_json(&serde_json::json!({ "changed": changed }))
    } else {
        println!("{}", if changed { "added" } else { "present" });
        Ok(())
    }
}
