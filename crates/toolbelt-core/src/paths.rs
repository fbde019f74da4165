use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "toolbelt.yaml";
pub const GIT_DIR: &str = ".git";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Walk upward from `start` to the first directory holding `toolbelt.yaml`,
/// then to the first holding `.git/`.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    find_upward(start, |dir| dir.join(CONFIG_FILE).is_file())
        .or_else(|| find_upward(start, |dir| dir.join(GIT_DIR).exists()))
}

fn find_upward(start: &Path, is_root: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|dir| is_root(dir)).map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_marker_wins_over_git() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let project = dir.path().join("tools");
        std::fs::create_dir_all(project.join("src/deep")).unwrap();
        std::fs::write(project.join(CONFIG_FILE), "").unwrap();

        assert_eq!(find_root(&project.join("src/deep")), Some(project));
    }

    #[test]
    fn falls_back_to_git_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_root(&nested), Some(dir.path().to_path_buf()));
    }
}
