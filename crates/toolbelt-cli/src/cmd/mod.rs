pub mod config;
pub mod file;
pub mod git;
pub mod kube;
pub mod run;
pub mod tools;

use anyhow::Context;
use std::future::Future;
use std::time::Duration;

/// Drive a library future to completion from the synchronous CLI.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    Ok(rt.block_on(fut))
}

/// clap value parser for `500ms`, `30s`, `2m`, `1h`.
pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    toolbelt_core::text::parse_duration(s).map_err(|e| e.to_string())
}

/// clap value parser for `KEY=VALUE`.
pub fn parse_kv(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, _)) if k.trim().is_empty() => Err(format!("key cannot be empty in: {s}")),
        Some((k, v)) => Ok((k.trim().to_string(), v.to_string())),
        None => Err(format!("expected KEY=VALUE, got: {s}")),
    }
}
