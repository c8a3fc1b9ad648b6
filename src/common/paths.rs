use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for panelctl

/// Directory holding `engine.toml`
pub fn panelctl_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("panelctl");
    Ok(config_dir)
}

/// Path of the engine configuration file
pub fn engine_config_path() -> Result<PathBuf> {
    Ok(panelctl_config_dir()?.join("engine.toml"))
}

/// Overlay catalog directory picked up automatically when it exists
pub fn user_catalog_dir() -> Option<PathBuf> {
    let dir = dirs::config_dir()?.join("panelctl").join("packages");
    dir.is_dir().then_some(dir)
}

/// Default location of installed Windows service definitions
pub fn default_windows_services_dir() -> PathBuf {
    default_windows_root().join("services")
}

/// Default location of Windows service logs
pub fn default_windows_log_dir() -> PathBuf {
    default_windows_root().join("logs")
}

fn default_windows_root() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("gameap")
}
