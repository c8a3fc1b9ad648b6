//! Primary/secondary backend composition.

use async_trait::async_trait;
use std::sync::Arc;

use super::error::{PackageError, Result};
use super::manager::{InstallOptions, PackageInfo, PackageManager};
use crate::ui::prelude::*;

/// Tries the primary backend first and the secondary when it fails.
///
/// Removal only ever targets the primary: the secondary may not have
/// installed what is being removed.
pub struct Fallback {
    primary: Arc<dyn PackageManager>,
    secondary: Arc<dyn PackageManager>,
    label: String,
}

impl Fallback {
    pub fn new(primary: Arc<dyn PackageManager>, secondary: Arc<dyn PackageManager>) -> Self {
        let label = format!("{}+{}", primary.name(), secondary.name());
        Self {
            primary,
            secondary,
            label,
        }
    }

    fn falling_back(&self, operation: &str, error: &PackageError) {
        emit(
            Level::Warn,
            "package.fallback",
            &format!(
                "{} with {} failed ({}), trying {}",
                operation,
                self.primary.name(),
                error,
                self.secondary.name()
            ),
            None,
        );
    }
}

#[async_trait]
impl PackageManager for Fallback {
    fn name(&self) -> &str {
        &self.label
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let primary = self.primary.search(name).await;
        let secondary = self.secondary.search(name).await;
        match (primary, secondary) {
            (Ok(mut found), Ok(more)) => {
                found.extend(more);
                Ok(found)
            }
            (Err(e), Ok(found)) => {
                emit(
                    Level::Debug,
                    "package.fallback.search",
                    &format!("search with {} failed: {}", self.primary.name(), e),
                    None,
                );
                Ok(found)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(p), Err(s)) => Err(PackageError::fallback(p, s)),
        }
    }

    async fn install(&self, names: &[String], options: &InstallOptions) -> Result<()> {
        let primary = match self.primary.install(names, options).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };
        self.falling_back("install", &primary);
        self.secondary
            .install(names, options)
            .await
            .map_err(|secondary| PackageError::fallback(primary, secondary))
    }

    async fn check_for_updates(&self) -> Result<()> {
        let primary = match self.primary.check_for_updates().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };
        self.falling_back("update", &primary);
        self.secondary
            .check_for_updates()
            .await
            .map_err(|secondary| PackageError::fallback(primary, secondary))
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        self.primary.remove(names).await
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        self.primary.purge(names).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::manager::testing::FakeBackend;

    fn compose(primary: FakeBackend, secondary: FakeBackend) -> (Fallback, Arc<FakeBackend>, Arc<FakeBackend>) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        (
            Fallback::new(primary.clone(), secondary.clone()),
            primary,
            secondary,
        )
    }

    fn php() -> Vec<String> {
        vec!["php".to_string()]
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let (fallback, primary, secondary) =
            compose(FakeBackend::new("apt"), FakeBackend::new("chroot"));
        fallback.install(&php(), &InstallOptions::default()).await.unwrap();
        assert_eq!(primary.calls(), vec!["install php"]);
        assert!(secondary.calls().is_empty());
        assert_eq!(fallback.name(), "apt+chroot");
    }

    #[tokio::test]
    async fn test_secondary_rescues_failed_install() {
        let (fallback, _, secondary) = compose(
            FakeBackend::new("apt").failing("install"),
            FakeBackend::new("chroot"),
        );
        fallback.install(&php(), &InstallOptions::default()).await.unwrap();
        assert_eq!(secondary.calls(), vec!["install php"]);
    }

    #[tokio::test]
    async fn test_both_failures_are_reported() {
        let (fallback, _, _) = compose(
            FakeBackend::new("apt").failing("install"),
            FakeBackend::new("chroot").failing("install"),
        );
        let err = fallback.install(&php(), &InstallOptions::default()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("apt install"), "{}", message);
        assert!(message.contains("chroot install"), "{}", message);
    }

    #[tokio::test]
    async fn test_update_falls_back() {
        let (fallback, _, secondary) = compose(
            FakeBackend::new("apt").failing("update"),
            FakeBackend::new("chroot"),
        );
        fallback.check_for_updates().await.unwrap();
        assert_eq!(secondary.calls(), vec!["update"]);
    }

    #[tokio::test]
    async fn test_remove_targets_primary_only() {
        let (fallback, primary, secondary) = compose(
            FakeBackend::new("apt").failing("remove"),
            FakeBackend::new("chroot"),
        );
        assert!(fallback.remove(&php()).await.is_err());
        fallback.purge(&php()).await.unwrap();
        assert_eq!(primary.calls(), vec!["remove php", "purge php"]);
        assert!(secondary.calls().is_empty());
    }

    #[tokio::test]
    async fn test_search_concatenates_results() {
        let (fallback, _, _) = compose(
            FakeBackend::new("apt").with_result("php8.2"),
            FakeBackend::new("chroot").with_result("php"),
        );
        let names: Vec<String> = fallback
            .search("php")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["php8.2", "php"]);
    }

    #[tokio::test]
    async fn test_search_primary_error_is_tolerated() {
        let (fallback, _, _) = compose(
            FakeBackend::new("apt").failing("search"),
            FakeBackend::new("chroot").with_result("php"),
        );
        assert_eq!(fallback.search("php").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_secondary_error_fails() {
        let (fallback, _, _) = compose(
            FakeBackend::new("apt").with_result("php8.2"),
            FakeBackend::new("chroot").failing("search"),
        );
        assert!(fallback.search("php").await.is_err());
    }
}
