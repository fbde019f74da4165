use std::path::{Path, PathBuf};

use toolbelt_core::paths;

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `TOOLBELT_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of the cwd holding `toolbelt.yaml`
/// 3. Nearest ancestor of the cwd holding `.git/`
/// 4. The cwd itself
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    paths::find_root(&cwd).unwrap_or(cwd)
}
