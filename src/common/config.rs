//! Engine configuration stored in `engine.toml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths;

pub const DEFAULT_REPOSITORY_URL: &str = "https://packages.gameap.com/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra catalog directories layered over the built-in documents, in order
    pub catalog_dirs: Vec<PathBuf>,
    /// Base URL substituted for `{repository}` in catalog documents
    pub repository_url: String,
    /// Where self-contained packages drop their systemd units
    pub chroot_units_dir: PathBuf,
    /// Poll interval for wait-for-service and wait-for-files steps
    pub wait_interval_secs: u64,
    /// Number of polls before a wait step times out
    pub wait_attempts: u32,
    pub windows_services_dir: PathBuf,
    pub windows_log_dir: PathBuf,
    pub download_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_dirs: Vec::new(),
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            chroot_units_dir: PathBuf::from("/etc/systemd/system"),
            wait_interval_secs: 5,
            wait_attempts: 10,
            windows_services_dir: paths::default_windows_services_dir(),
            windows_log_dir: paths::default_windows_log_dir(),
            download_timeout_secs: 600,
        }
    }
}

impl EngineConfig {
    /// Load the configuration from the default location.
    pub fn load() -> Result<Self> {
        let path = paths::engine_config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing engine config {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("serializing engine config")?;
        fs::write(path, content)
            .with_context(|| format!("writing engine config {}", path.display()))
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("engine.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.wait_attempts, 10);
        assert_eq!(config.wait_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "wait_attempts = 3\ncatalog_dirs = [\"/srv/catalog\"]\n").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.wait_attempts, 3);
        assert_eq!(config.catalog_dirs, vec![PathBuf::from("/srv/catalog")]);
        assert_eq!(config.repository_url, DEFAULT_REPOSITORY_URL);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "wait_attempts = \"many\"").unwrap();
        assert!(EngineConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("engine.toml");
        let config = EngineConfig {
            wait_interval_secs: 1,
            ..EngineConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }
}
