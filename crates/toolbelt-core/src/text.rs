//! Small string helpers shared by the runner, git plumbing, and the CLI.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{Result, ToolbeltError};

static DURATION_RE: OnceLock<Regex> = OnceLock::new();

fn duration_re() -> &'static Regex {
    DURATION_RE
        .get_or_init(|| Regex::new(r"^(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>ms|s|m|h)?$").unwrap())
}

/// Parse a human duration: `250ms`, `1.5s`, `2m`, `1h`. A bare number is
/// seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let caps = duration_re()
        .captures(trimmed)
        .ok_or_else(|| ToolbeltError::InvalidDuration(input.to_string()))?;
    let value: f64 = caps["value"]
        .parse()
        .map_err(|_| ToolbeltError::InvalidDuration(input.to_string()))?;
    let secs = match caps.name("unit").map(|m| m.as_str()) {
        Some("ms") => value / 1000.0,
        Some("m") => value * 60.0,
        Some("h") => value * 3600.0,
        _ => value,
    };
    Duration::try_from_secs_f64(secs).map_err(|_| ToolbeltError::InvalidDuration(input.to_string()))
}

/// Render a duration in the same notation [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 || ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Render an argument vector as a copy-pasteable shell line, quoting
/// anything that is not obviously safe. For logs and error messages only;
/// the runner never hands this string to a shell.
pub fn command_line<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Truncate to at most `max` characters, appending `…` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

pub fn non_empty_lines(s: &str) -> Vec<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Lowercase, ASCII alphanumerics separated by single hyphens.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
