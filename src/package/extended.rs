//! Catalog-driven wrapper around a native package manager.
//!
//! Callers speak in logical names (`php`, `lib32gcc`). The wrapper expands
//! each into the concrete names the native tool understands, installs
//! dependencies first and runs the catalog's pre-install, install and
//! post-install steps around the native call.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::catalog::Catalog;
use super::context::ExecContext;
use super::descriptor::Descriptor;
use super::error::{PackageError, Phase, Result};
use super::manager::{InstallOptions, PackageInfo, PackageManager};
use super::plan::install_order;
use crate::ui::prelude::*;

pub struct Extended {
    inner: Arc<dyn PackageManager>,
    catalog: Option<Arc<Catalog<Descriptor>>>,
    ctx: ExecContext,
    completed: Mutex<HashSet<String>>,
}

fn clean(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

impl Extended {
    pub fn new(
        inner: Arc<dyn PackageManager>,
        catalog: Arc<Catalog<Descriptor>>,
        ctx: ExecContext,
    ) -> Self {
        Self {
            inner,
            catalog: Some(catalog),
            ctx,
            completed: Mutex::new(HashSet::new()),
        }
    }

    /// A wrapper with no catalog: names reach the native tool unchanged.
    pub fn passthrough(inner: Arc<dyn PackageManager>, ctx: ExecContext) -> Self {
        Self {
            inner,
            catalog: None,
            ctx,
            completed: Mutex::new(HashSet::new()),
        }
    }

    fn is_completed(&self, name: &str) -> bool {
        self.completed
            .lock()
            .map(|done| done.contains(name))
            .unwrap_or(false)
    }

    fn mark_completed(&self, name: &str) {
        if let Ok(mut done) = self.completed.lock() {
            done.insert(name.to_string());
        }
    }

    async fn install_descriptor(
        &self,
        descriptor: &Descriptor,
        options: &InstallOptions,
    ) -> Result<()> {
        let name = descriptor.name.as_str();
        if descriptor.is_noop() {
            emit(
                Level::Debug,
                "package.noop",
                &format!("{} needs nothing on this platform", name),
                None,
            );
            return Ok(());
        }
        let descriptor = &descriptor.with_runtime(&self.ctx.runtime_values(descriptor, options));

        self.ctx
            .run_steps(name, Phase::PreInstall, &descriptor.pre_install, None)
            .await?;

        let targets = descriptor.native_targets();
        if !targets.is_empty() {
            emit(
                Level::Info,
                "package.install",
                &format!(
                    "Installing {} with {} ({})",
                    name,
                    self.inner.name(),
                    targets.join(", ")
                ),
                None,
            );
            self.inner.install(&targets, options).await?;
        }

        self.ctx
            .run_steps(name, Phase::Install, &descriptor.install, None)
            .await?;
        self.ctx
            .run_steps(name, Phase::PostInstall, &descriptor.post_install, None)
            .await
    }

    /// Concrete names for removal. Virtual and no-op packages own nothing
    /// native and are skipped.
    fn removal_targets(&self, names: &[String]) -> Result<Vec<String>> {
        let names = clean(names);
        let Some(catalog) = &self.catalog else {
            return Ok(names);
        };

        let mut targets = Vec::new();
        for name in &names {
            let descriptor = catalog
                .get(name)
                .ok_or_else(|| PackageError::NotFound(name.clone()))?;
            for target in descriptor.native_targets() {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }
}

#[async_trait]
impl PackageManager for Extended {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let targets = self
            .catalog
            .as_ref()
            .and_then(|c| c.get(name))
            .map(Descriptor::native_targets)
            .unwrap_or_else(|| vec![name.to_string()]);

        let mut found = Vec::new();
        for target in targets {
            found.extend(self.inner.search(&target).await?);
        }
        Ok(found)
    }

    async fn install(&self, names: &[String], options: &InstallOptions) -> Result<()> {
        let Some(catalog) = &self.catalog else {
            let pending: Vec<String> = clean(names)
                .into_iter()
                .filter(|n| !self.is_completed(n))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            self.inner.install(&pending, options).await?;
            for name in &pending {
                self.mark_completed(name);
            }
            return Ok(());
        };

        let order = install_order(catalog, names)?;
        for name in order {
            if self.is_completed(&name) {
                continue;
            }
            let descriptor = catalog
                .get(&name)
                .ok_or_else(|| PackageError::NotFound(name.clone()))?;
            self.install_descriptor(descriptor, options).await?;
            self.mark_completed(&name);
        }
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<()> {
        self.inner.check_for_updates().await
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        let targets = self.removal_targets(names)?;
        if targets.is_empty() {
            return Ok(());
        }
        self.inner.remove(&targets).await
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        let targets = self.removal_targets(names)?;
        if targets.is_empty() {
            return Ok(());
        }
        self.inner.purge(&targets).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::platform::{Distribution, Platform};
    use crate::package::catalog::{CatalogSet, CatalogSource, MemorySource, sources_for};
    use crate::package::context::testing::*;
    use crate::package::manager::testing::FakeBackend;
    use crate::package::substitute::Substitutions;
    use std::collections::HashMap;

    struct Harness {
        extended: Extended,
        backend: Arc<FakeBackend>,
        runner: Arc<RecordingRunner>,
    }

    fn vars(platform: &Platform) -> Substitutions {
        Substitutions::for_platform(platform, "").with_env(HashMap::new())
    }

    fn with_catalog(catalog: Catalog<Descriptor>) -> Harness {
        let backend = Arc::new(FakeBackend::new("apt"));
        let runner = Arc::new(RecordingRunner::default());
        let ctx = context(runner.clone(), Arc::new(FakeServices::default()));
        Harness {
            extended: Extended::new(backend.clone(), Arc::new(catalog), ctx),
            backend,
            runner,
        }
    }

    fn builtin_apt(arch: &str) -> Harness {
        let platform = Platform::new(Distribution::Debian, "12", "bookworm", arch);
        let catalog =
            Catalog::load(&sources_for(CatalogSet::Apt, &[]), &platform, &vars(&platform)).unwrap();
        with_catalog(catalog)
    }

    fn from_yaml(yaml: &str) -> Harness {
        let platform = Platform::new(Distribution::Ubuntu, "22.04", "jammy", "amd64");
        let sources: Vec<Box<dyn CatalogSource>> =
            vec![Box::new(MemorySource::new([("default.yaml", yaml)]))];
        with_catalog(Catalog::load(&sources, &platform, &vars(&platform)).unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_lib32gcc_on_amd64_installs_concrete_name() {
        let h = builtin_apt("amd64");
        h.extended.install(&names(&["lib32gcc"]), &InstallOptions::default()).await.unwrap();
        assert_eq!(h.backend.calls(), vec!["install lib32gcc-s1"]);
    }

    #[tokio::test]
    async fn test_lib32gcc_on_arm64_is_a_noop() {
        let h = builtin_apt("arm64");
        h.extended.install(&names(&["lib32gcc"]), &InstallOptions::default()).await.unwrap();
        assert!(h.backend.calls().is_empty());
        assert!(h.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_steps_wrap_native_install() {
        let h = from_yaml(
            "packages:
  - name: php
    replace-with: [php8.1-fpm, php8.1-cli]
    pre-install:
      - run-commands:
          - add-apt-repository -y ppa:ondrej/php
    post-install:
      - run-commands:
          - systemctl enable php8.1-fpm
",
        );
        h.extended.install(&names(&["php"]), &InstallOptions::default()).await.unwrap();
        assert_eq!(h.backend.calls(), vec!["install php8.1-fpm php8.1-cli"]);
        assert_eq!(
            h.runner.commands(),
            vec![
                "add-apt-repository -y ppa:ondrej/php",
                "systemctl enable php8.1-fpm"
            ]
        );
    }

    #[tokio::test]
    async fn test_config_values_reach_post_install() {
        let h = from_yaml(
            "packages:
  - name: mariadb-server
    post-install:
      - run-commands:
          - mysql -u root -e \"CREATE USER '{config:db-user}' IDENTIFIED BY '{config:db-password}'\"
",
        );
        let options = InstallOptions::default()
            .with_config_value("db-user", "gameap")
            .with_config_value("db-password", "s3cret");
        h.extended
            .install(&names(&["mariadb-server"]), &options)
            .await
            .unwrap();
        assert_eq!(h.backend.calls(), vec!["install mariadb-server"]);
        assert_eq!(
            h.runner.commands(),
            vec!["mysql -u root -e \"CREATE USER 'gameap' IDENTIFIED BY 's3cret'\""]
        );
    }

    #[tokio::test]
    async fn test_virtual_package_runs_dependencies_then_steps() {
        let h = from_yaml(
            "packages:
  - name: php
    replace-with: [php-cli]
  - name: curl
  - name: composer
    virtual: true
    dependencies: [php, curl]
    install:
      - run-commands:
          - php composer-setup.php --install-dir=/usr/local/bin
",
        );
        h.extended.install(&names(&["composer"]), &InstallOptions::default()).await.unwrap();

        assert_eq!(h.backend.calls(), vec!["install php-cli", "install curl"]);
        assert_eq!(
            h.runner.commands(),
            vec!["php composer-setup.php --install-dir=/usr/local/bin"]
        );
    }

    #[tokio::test]
    async fn test_self_dependency_rejected_before_any_command() {
        let h = from_yaml(
            "packages:
  - name: nginx
    dependencies: [nginx]
    pre-install:
      - run-commands: [echo never]
",
        );
        let err = h
            .extended
            .install(&names(&["nginx"]), &InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::SelfDependency(_)));
        assert!(h.backend.calls().is_empty());
        assert!(h.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let h = builtin_apt("amd64");
        let err = h
            .extended
            .install(&names(&["curl", "no-such-package"]), &InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::NotFound(name) if name == "no-such-package"));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_requests_run_once() {
        let h = builtin_apt("amd64");
        h.extended.install(&names(&["curl", "curl"]), &InstallOptions::default()).await.unwrap();
        h.extended.install(&names(&["curl"]), &InstallOptions::default()).await.unwrap();
        assert_eq!(h.backend.calls(), vec!["install curl"]);
    }

    #[tokio::test]
    async fn test_step_failure_names_package_and_phase() {
        let h = from_yaml(
            "packages:
  - name: apache2
    post-install:
      - run-commands: [a2enmod rewrite, systemctl restart apache2]
",
        );
        h.runner.respond("a2enmod", 1, "");
        let err = h
            .extended
            .install(&names(&["apache2"]), &InstallOptions::default())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("apache2"), "{}", message);
        assert!(matches!(
            err,
            PackageError::Step {
                phase: Phase::PostInstall,
                index: 1,
                ..
            }
        ));
        assert_eq!(h.runner.commands(), vec!["a2enmod rewrite"]);
    }

    #[tokio::test]
    async fn test_remove_resolves_aliases_and_skips_virtual() {
        let h = builtin_apt("amd64");
        h.extended
            .purge(&names(&["mysql-server", "composer", "php-extensions"]))
            .await
            .unwrap();
        let calls = h.backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("purge default-mysql-server php-bcmath"));
    }

    #[tokio::test]
    async fn test_remove_of_noop_package_skips_backend() {
        let h = builtin_apt("arm64");
        h.extended.remove(&names(&["lib32gcc"])).await.unwrap();
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_passthrough_forwards_names() {
        let backend = Arc::new(FakeBackend::new("dnf"));
        let ctx = context(
            Arc::new(RecordingRunner::default()),
            Arc::new(FakeServices::default()),
        );
        let extended = Extended::passthrough(backend.clone(), ctx);
        extended.install(&names(&["htop", " ", "htop"]), &InstallOptions::default()).await.unwrap();
        extended.remove(&names(&["htop"])).await.unwrap();
        assert_eq!(backend.calls(), vec!["install htop", "remove htop"]);
    }

    #[tokio::test]
    async fn test_search_uses_concrete_names() {
        let h = builtin_apt("amd64");
        h.extended.search("mysql-server").await.unwrap();
        h.extended.search("htop").await.unwrap();
        assert_eq!(
            h.backend.calls(),
            vec!["search default-mysql-server", "search htop"]
        );
    }
}
