//! `PATH` entries contributed by installed packages.
//!
//! Packages installed during this process may add directories to the search
//! path. Those entries are appended to the inherited `PATH` for every spawned
//! command and every executable lookup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::ui::prelude::*;

#[derive(Debug, Default)]
pub struct PathOverlay {
    base: OsString,
    entries: Mutex<Vec<PathBuf>>,
}

impl PathOverlay {
    pub fn from_env() -> Self {
        Self::with_base(std::env::var_os("PATH").unwrap_or_default())
    }

    pub fn with_base(base: impl Into<OsString>) -> Self {
        Self {
            base: base.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn same_entry(a: &Path, b: &Path) -> bool {
        if cfg!(windows) {
            a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
        } else {
            a == b
        }
    }

    fn contains(&self, path: &Path) -> bool {
        std::env::split_paths(&self.base).any(|p| Self::same_entry(&p, path))
            || self.entries().iter().any(|p| Self::same_entry(p, path))
    }

    /// Add directories to the search path, returning the ones actually added.
    ///
    /// Directories that do not exist or are already present are skipped.
    pub fn contribute(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut added = Vec::new();
        for path in paths {
            if !path.exists() {
                emit(
                    Level::Debug,
                    "package.path.skip",
                    &format!("Not adding {} to PATH: directory does not exist", path.display()),
                    None,
                );
                continue;
            }
            if self.contains(path) {
                continue;
            }
            self.entries().push(path.clone());
            added.push(path.clone());
        }
        added
    }

    pub fn withdraw(&self, paths: &[PathBuf]) {
        self.entries()
            .retain(|entry| !paths.iter().any(|p| Self::same_entry(entry, p)));
    }

    pub fn added(&self) -> Vec<PathBuf> {
        self.entries().clone()
    }

    /// The full search path: inherited entries followed by contributed ones.
    pub fn search_path(&self) -> OsString {
        let combined: Vec<PathBuf> = std::env::split_paths(&self.base)
            .chain(self.entries().iter().cloned())
            .collect();
        std::env::join_paths(combined).unwrap_or_else(|_| self.base.clone())
    }

    /// Resolve an executable name against the full search path.
    pub fn lookup(&self, program: &str) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(program, Some(self.search_path()), cwd).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_contribute_skips_missing_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let overlay = PathOverlay::with_base("/usr/bin");

        let existing = dir.path().to_path_buf();
        let missing = dir.path().join("nope");
        let added = overlay.contribute(&[existing.clone(), missing, existing.clone()]);

        assert_eq!(added, vec![existing.clone()]);
        assert_eq!(overlay.added(), vec![existing]);
    }

    #[test]
    fn test_inherited_entries_are_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let overlay = PathOverlay::with_base(dir.path().as_os_str());
        assert!(overlay.contribute(&[dir.path().to_path_buf()]).is_empty());
    }

    #[test]
    fn test_withdraw_and_search_path() {
        let dir = TempDir::new().unwrap();
        let overlay = PathOverlay::with_base("/usr/bin");
        overlay.contribute(&[dir.path().to_path_buf()]);

        let joined: Vec<PathBuf> = std::env::split_paths(&overlay.search_path()).collect();
        assert_eq!(joined.last().unwrap(), dir.path());

        overlay.withdraw(&[dir.path().to_path_buf()]);
        assert!(overlay.added().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_finds_contributed_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("panelctl-test-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let overlay = PathOverlay::with_base("/nonexistent-bin");
        assert!(overlay.lookup("panelctl-test-tool").is_none());
        overlay.contribute(&[dir.path().to_path_buf()]);
        assert_eq!(overlay.lookup("panelctl-test-tool"), Some(tool));
    }
}
