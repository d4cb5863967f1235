use std::env;
use std::path::{Path, PathBuf};

use dirs_next::home_dir;

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Resolve a path from an environment override, falling back to `default`.
///
/// Blank values are ignored so an exported-but-empty variable does not point
/// the studio at the current directory.
pub fn path_from_env_or(var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    if let Ok(path) = env::var(var) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }
    default()
}

/// Walk up from `start` looking for a directory containing `marker`.
///
/// `start` may be a file; the search begins at its parent directory.
pub fn find_ancestor_with(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut current = if start.is_dir() { Some(start) } else { start.parent() };
    while let Some(directory) = current {
        if directory.join(marker).exists() {
            return Some(directory.to_path_buf());
        }
        current = directory.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_default() {
        temp_env::with_var("STUDIO_TEST_PATH", Some("/tmp/custom/file.yaml"), || {
            let path = path_from_env_or("STUDIO_TEST_PATH", || PathBuf::from("fallback"));
            assert_eq!(path, PathBuf::from("/tmp/custom/file.yaml"));
        });
        temp_env::with_var("STUDIO_TEST_PATH", Some("   "), || {
            let path = path_from_env_or("STUDIO_TEST_PATH", || PathBuf::from("fallback"));
            assert_eq!(path, PathBuf::from("fallback"));
        });
    }

    #[test]
    fn finds_marker_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("tasks").join("reports");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("requirements.txt"), "").unwrap();
        let entrypoint = nested.join("report.py");
        std::fs::write(&entrypoint, "").unwrap();

        let found = find_ancestor_with(&entrypoint, "requirements.txt");
        assert_eq!(found.as_deref(), Some(root.path()));
        assert!(find_ancestor_with(&entrypoint, "does-not-exist.marker").is_none());
    }
}
