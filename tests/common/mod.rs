use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Isolated home and config directories for one panelctl invocation.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        fs::create_dir_all(temp_dir.path().join("home"))?;
        fs::create_dir_all(temp_dir.path().join("config"))?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_home(&self) -> PathBuf {
        self.path().join("config")
    }

    /// Write a catalog document into an overlay directory and return the
    /// overlay root.
    pub fn write_catalog(&self, set: &str, file_name: &str, content: &str) -> Result<PathBuf> {
        let root = self.path().join("catalogs");
        let dir = root.join(set);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(file_name), content)?;
        Ok(root)
    }

    pub fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(env!("CARGO_BIN_EXE_panelctl"))
            .args(args)
            .env("HOME", self.path().join("home"))
            .env("XDG_CONFIG_HOME", self.config_home())
            .env_remove("NO_COLOR")
            .current_dir(self.path())
            .output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run against a fixed Debian bookworm amd64 host.
    pub fn run_on_bookworm(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full = vec![
            "--distro",
            "debian",
            "--distro-version",
            "12",
            "--codename",
            "bookworm",
            "--arch",
            "amd64",
        ];
        full.extend_from_slice(args);
        self.run(&full)
    }
}

/// Parse JSON-lines output.
pub fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
