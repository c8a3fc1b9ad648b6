//! Self-contained packages: a prebuilt tree unpacked into its own directory
//! plus a systemd unit.
//!
//! A successful install leaves an [`InstallRecord`] in the tree. Remove and
//! purge refuse to delete a directory that does not carry one. Names bundled
//! with another package install their host but are left alone on removal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::package::catalog::{Catalog, CatalogEntry};
use crate::package::command::{CommandSpec, run_checked};
use crate::package::context::ExecContext;
use crate::package::download::{archive_kind, file_name_from_url, sha256_file};
use crate::package::error::{PackageError, Result};
use crate::package::manager::{InstallOptions, PackageInfo, PackageManager};
use crate::package::ownership::{Owner, chown_recursive};
use crate::package::substitute::Substitutions;
use crate::ui::prelude::*;

pub const MARKER_FILE: &str = ".panelctl-package";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChrootDocument {
    pub name: String,
    pub archive_url: Option<String>,
    pub archive_sha256: Option<String>,
    pub unit_url: Option<String>,
    pub install_path: Option<String>,
    pub bundled_with: Option<String>,
    pub owner: Option<OwnerDocument>,
    pub info: InfoDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerDocument {
    pub user: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoDocument {
    pub version: String,
    pub size: String,
    pub description: String,
}

/// A self-contained package resolved for the running platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChrootPackage {
    pub name: String,
    pub archive_url: Option<String>,
    pub archive_sha256: Option<String>,
    pub unit_url: Option<String>,
    pub install_path: PathBuf,
    pub bundled_with: Option<String>,
    pub owner: Option<OwnerDocument>,
    pub info: InfoDocument,
}

impl CatalogEntry for ChrootPackage {
    type Document = ChrootDocument;

    fn name_mut(doc: &mut ChrootDocument) -> &mut String {
        &mut doc.name
    }

    fn resolve(doc: ChrootDocument, vars: &Substitutions) -> Self {
        let apply = |value: Option<String>| {
            value
                .map(|v| vars.apply(&v).trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let install_path = apply(doc.install_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/opt").join(&doc.name));

        Self {
            archive_url: apply(doc.archive_url),
            archive_sha256: doc
                .archive_sha256
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            unit_url: apply(doc.unit_url),
            install_path,
            bundled_with: doc
                .bundled_with
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            owner: doc.owner,
            info: doc.info,
            name: doc.name,
        }
    }
}

/// Content of the marker file left in an installed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub name: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_path: Option<PathBuf>,
}

impl InstallRecord {
    pub fn read(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
        toml::from_str(&content).ok()
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MARKER_FILE);
        let content = toml::to_string_pretty(self).map_err(|e| {
            PackageError::io(
                format!("serializing {}", path.display()),
                std::io::Error::other(e),
            )
        })?;
        std::fs::write(&path, content)
            .map_err(|e| PackageError::io(format!("writing {}", path.display()), e))
    }
}

#[derive(Debug, Clone, Copy)]
enum Intent {
    Install,
    Remove,
}

pub struct Chroot {
    catalog: Arc<Catalog<ChrootPackage>>,
    ctx: ExecContext,
    units_dir: PathBuf,
}

impl Chroot {
    pub fn new(
        catalog: Arc<Catalog<ChrootPackage>>,
        ctx: ExecContext,
        units_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            ctx,
            units_dir,
        }
    }

    /// Map requested names onto the packages that actually carry them.
    ///
    /// Every name is checked before anything happens. For installs, bundled
    /// names resolve to the package that ships them. For removals they are
    /// skipped: the host package stays until it is removed by name. Each
    /// package appears once.
    fn resolve_names(&self, names: &[String], intent: Intent) -> Result<Vec<&ChrootPackage>> {
        let mut requested: Vec<&ChrootPackage> = Vec::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let package = self
                .catalog
                .get(name)
                .ok_or_else(|| PackageError::NotFound(name.to_string()))?;
            requested.push(package);
        }

        let mut resolved: Vec<&ChrootPackage> = Vec::new();
        for package in requested {
            let package = match (&package.bundled_with, intent) {
                (None, _) => package,
                (Some(host), Intent::Install) => self
                    .catalog
                    .get(host)
                    .ok_or_else(|| PackageError::NotFound(host.clone()))?,
                (Some(host), Intent::Remove) => {
                    emit(
                        Level::Debug,
                        "package.chroot.bundled",
                        &format!(
                            "{} ships with {}, leaving {} in place",
                            package.name, host, host
                        ),
                        None,
                    );
                    continue;
                }
            };
            if !resolved.iter().any(|p| p.name == package.name) {
                resolved.push(package);
            }
        }
        Ok(resolved)
    }

    fn unit_path(&self, package: &ChrootPackage) -> Option<PathBuf> {
        package
            .unit_url
            .as_deref()
            .map(|url| self.units_dir.join(file_name_from_url(url)))
    }

    async fn install_one(&self, package: &ChrootPackage) -> Result<()> {
        let dir = &package.install_path;
        if dir.join(MARKER_FILE).exists() {
            emit(
                Level::Info,
                "package.chroot.present",
                &format!("{} is already installed in {}", package.name, dir.display()),
                None,
            );
            return Ok(());
        }

        let url = package
            .archive_url
            .as_deref()
            .ok_or_else(|| PackageError::Download {
                url: String::new(),
                reason: format!("no archive-url declared for {}", package.name),
            })?;

        emit(
            Level::Info,
            "package.chroot.install",
            &format!("Installing {} into {}", package.name, dir.display()),
            None,
        );

        let scratch = tempfile::Builder::new()
            .prefix("panelctl-chroot")
            .tempdir()
            .map_err(|e| PackageError::io("creating download directory", e))?;
        let archive = scratch.path().join(file_name_from_url(url));
        self.ctx.downloader.fetch(url, &archive).await?;

        if let Some(expected) = &package.archive_sha256
            && !self.ctx.dry_run
        {
            let actual = sha256_file(&archive)?;
            if &actual != expected {
                return Err(PackageError::ChecksumMismatch {
                    url: url.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        if !self.ctx.dry_run {
            std::fs::create_dir_all(dir)
                .map_err(|e| PackageError::io(format!("creating {}", dir.display()), e))?;
        }
        let flags = archive_kind(&archive).unwrap_or(&["-xzf"]);
        let extract = CommandSpec::new("tar")
            .args(flags.iter().copied())
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(dir.display().to_string());
        run_checked(self.ctx.runner.as_ref(), &extract, &[]).await?;

        let unit_path = self.unit_path(package);
        if let (Some(unit_url), Some(unit_path)) = (&package.unit_url, &unit_path) {
            self.ctx.downloader.fetch(unit_url, unit_path).await?;
            run_checked(
                self.ctx.runner.as_ref(),
                &CommandSpec::new("systemctl").arg("daemon-reload"),
                &[],
            )
            .await?;
        }

        if let Some(owner) = &package.owner
            && !self.ctx.dry_run
        {
            let resolved = Owner::lookup(&owner.user, owner.group.as_deref())?;
            let root = dir.clone();
            let token = self.ctx.token.clone();
            tokio::task::spawn_blocking(move || chown_recursive(&root, resolved, &token))
                .await
                .map_err(|e| {
                    PackageError::io(
                        format!("changing ownership of {}", dir.display()),
                        std::io::Error::other(e),
                    )
                })??;
        }

        if !self.ctx.dry_run {
            InstallRecord {
                name: package.name.clone(),
                version: package.info.version.clone(),
                installed_at: Utc::now(),
                unit_path,
            }
            .write(dir)?;
        }

        emit(
            Level::Success,
            "package.chroot.installed",
            &format!("Installed {}", package.name),
            None,
        );
        Ok(())
    }

    async fn remove_one(&self, package: &ChrootPackage) -> Result<()> {
        let dir = &package.install_path;
        if !dir.exists() {
            emit(
                Level::Info,
                "package.chroot.absent",
                &format!("{} is not installed", package.name),
                None,
            );
            return Ok(());
        }
        if !dir.join(MARKER_FILE).exists() {
            return Err(PackageError::NotOwned { path: dir.clone() });
        }

        let unit_path = InstallRecord::read(dir)
            .and_then(|record| record.unit_path)
            .or_else(|| self.unit_path(package));

        if self.ctx.dry_run {
            emit(
                Level::Info,
                "package.chroot.dry_run",
                &format!("[DRY RUN] remove {}", dir.display()),
                None,
            );
            return Ok(());
        }

        emit(
            Level::Info,
            "package.chroot.remove",
            &format!("Removing {}", dir.display()),
            None,
        );
        std::fs::remove_dir_all(dir)
            .map_err(|e| PackageError::io(format!("removing {}", dir.display()), e))?;

        if let Some(unit) = unit_path.filter(|p| p.exists()) {
            std::fs::remove_file(&unit)
                .map_err(|e| PackageError::io(format!("removing {}", unit.display()), e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PackageManager for Chroot {
    fn name(&self) -> &str {
        "chroot"
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let Some(package) = self.catalog.get(name) else {
            return Ok(Vec::new());
        };
        let info = match &package.bundled_with {
            Some(host) => self.catalog.get(host).map(|p| &p.info),
            None => Some(&package.info),
        };
        Ok(info
            .map(|info| PackageInfo {
                name: package.name.clone(),
                version: info.version.clone(),
                size: info.size.clone(),
                description: info.description.clone(),
                ..Default::default()
            })
            .into_iter()
            .collect())
    }

    async fn install(&self, names: &[String], _options: &InstallOptions) -> Result<()> {
        for package in self.resolve_names(names, Intent::Install)? {
            self.install_one(package).await?;
        }
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        for package in self.resolve_names(names, Intent::Remove)? {
            self.remove_one(package).await?;
        }
        Ok(())
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        self.remove(names).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::platform::{Distribution, Platform};
    use crate::package::catalog::{CatalogSource, MemorySource};
    use crate::package::context::testing::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Harness {
        chroot: Chroot,
        runner: Arc<RecordingRunner>,
        install_dir: PathBuf,
        units: TempDir,
        _root: TempDir,
        _source: TempDir,
    }

    fn harness(sha256: Option<&str>) -> Harness {
        let root = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let units = TempDir::new().unwrap();
        std::fs::write(source.path().join("php8.1-amd64.tar.gz"), "archive").unwrap();
        std::fs::write(source.path().join("php8.1-fpm.service"), "[Unit]").unwrap();
        let install_dir = root.path().join("php");

        let checksum = sha256
            .map(|s| format!("    archive-sha256: {}\n", s))
            .unwrap_or_default();
        let yaml = format!(
            "packages:
  - name: php
    archive-url: file://{src}/php8.1-{{architecture}}.tar.gz
    unit-url: file://{src}/php8.1-fpm.service
    install-path: {dir}
{checksum}    info:
      version: '8.1'
  - name: php-extensions
    bundled-with: php
",
            src = source.path().display(),
            dir = install_dir.display(),
            checksum = checksum,
        );

        let platform = Platform::new(Distribution::Debian, "13", "trixie", "amd64");
        let vars = Substitutions::for_platform(&platform, "").with_env(HashMap::new());
        let sources: Vec<Box<dyn CatalogSource>> =
            vec![Box::new(MemorySource::new([("default.yaml", yaml)]))];
        let catalog = Catalog::load(&sources, &platform, &vars).unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let ctx = context(runner.clone(), Arc::new(FakeServices::default()));
        Harness {
            chroot: Chroot::new(Arc::new(catalog), ctx, units.path().to_path_buf()),
            runner,
            install_dir,
            units,
            _root: root,
            _source: source,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_install_writes_unit_and_marker() {
        let h = harness(None);
        h.chroot
            .install(&names(&["php", "php-extensions"]), &InstallOptions::default())
            .await
            .unwrap();

        let commands = h.runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("tar -xzf "));
        assert!(commands[0].ends_with(&format!("-C {}", h.install_dir.display())));
        assert_eq!(commands[1], "systemctl daemon-reload");

        let unit = h.units.path().join("php8.1-fpm.service");
        assert_eq!(std::fs::read_to_string(&unit).unwrap(), "[Unit]");

        let record = InstallRecord::read(&h.install_dir).unwrap();
        assert_eq!(record.name, "php");
        assert_eq!(record.version, "8.1");
        assert_eq!(record.unit_path, Some(unit));
    }

    #[tokio::test]
    async fn test_install_is_noop_when_marked() {
        let h = harness(None);
        h.chroot.install(&names(&["php"]), &InstallOptions::default()).await.unwrap();
        h.chroot.install(&names(&["php-extensions"]), &InstallOptions::default()).await.unwrap();
        assert_eq!(h.runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_stops_install() {
        let h = harness(Some("00ff"));
        let err = h.chroot.install(&names(&["php"]), &InstallOptions::default()).await.unwrap_err();
        assert!(matches!(err, PackageError::ChecksumMismatch { .. }));
        assert!(h.runner.commands().is_empty());
        assert!(!h.install_dir.exists());
    }

    #[tokio::test]
    async fn test_unknown_name_fails_before_any_work() {
        let h = harness(None);
        let err = h
            .chroot
            .install(&names(&["php", "mysql"]), &InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::NotFound(name) if name == "mysql"));
        assert!(h.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_remove_refuses_unmarked_directory() {
        let h = harness(None);
        std::fs::create_dir_all(&h.install_dir).unwrap();
        std::fs::write(h.install_dir.join("keep.txt"), "operator data").unwrap();

        let err = h.chroot.purge(&names(&["php"])).await.unwrap_err();
        assert!(matches!(err, PackageError::NotOwned { .. }));
        assert!(h.install_dir.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_directory_is_ok() {
        let h = harness(None);
        h.chroot.remove(&names(&["php"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_deletes_tree_and_unit() {
        let h = harness(None);
        h.chroot.install(&names(&["php"]), &InstallOptions::default()).await.unwrap();
        h.chroot.remove(&names(&["php"])).await.unwrap();

        assert!(!h.install_dir.exists());
        assert!(!h.units.path().join("php8.1-fpm.service").exists());
    }

    #[tokio::test]
    async fn test_remove_bundled_name_leaves_host_installed() {
        let h = harness(None);
        h.chroot.install(&names(&["php"]), &InstallOptions::default()).await.unwrap();
        h.chroot.remove(&names(&["php-extensions"])).await.unwrap();
        h.chroot.purge(&names(&["php-extensions"])).await.unwrap();

        assert!(h.install_dir.join(MARKER_FILE).exists());
        assert!(h.units.path().join("php8.1-fpm.service").exists());
    }

    #[tokio::test]
    async fn test_remove_validates_every_name_first() {
        let h = harness(None);
        h.chroot.install(&names(&["php"]), &InstallOptions::default()).await.unwrap();
        let err = h
            .chroot
            .remove(&names(&["php", "mysql"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::NotFound(name) if name == "mysql"));
        assert!(h.install_dir.join(MARKER_FILE).exists());
    }

    #[tokio::test]
    async fn test_search_bundled_reports_host_info() {
        let h = harness(None);
        let found = h.chroot.search("php-extensions").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "php-extensions");
        assert_eq!(found[0].version, "8.1");
    }

    #[test]
    fn test_install_path_defaults_under_opt() {
        let vars = Substitutions::default();
        let package = ChrootPackage::resolve(
            ChrootDocument {
                name: "node".to_string(),
                ..Default::default()
            },
            &vars,
        );
        assert_eq!(package.install_path, PathBuf::from("/opt/node"));
    }
}
