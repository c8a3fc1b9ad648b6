use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::Result;

/// Metadata reported by a backend search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub architecture: String,
    pub version: String,
    pub size: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_size_kb: Option<u64>,
}

/// Caller-supplied values for one install request.
///
/// Catalog steps reference them as `{config:<key>}`; the panel uses this to
/// hand database credentials to post-install scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    config: BTreeMap<String, String>,
}

impl InstallOptions {
    pub fn with_config_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config_values(&self) -> &BTreeMap<String, String> {
        &self.config
    }
}

/// The operations every installation backend and wrapper provides.
///
/// Names passed in are the names this layer understands: logical names for
/// catalog-backed wrappers, concrete names for raw package managers.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Short backend name used in log lines.
    fn name(&self) -> &str;

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>>;

    /// Raw package managers ignore `options`.
    async fn install(&self, names: &[String], options: &InstallOptions) -> Result<()>;

    /// Refresh package metadata. Backends without metadata succeed immediately.
    async fn check_for_updates(&self) -> Result<()>;

    async fn remove(&self, names: &[String]) -> Result<()>;

    /// Remove including configuration, where the backend distinguishes the two.
    async fn purge(&self, names: &[String]) -> Result<()>;
}
