//! Backend selection and the installation facade used by the CLI.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::backend::{Apt, Chroot, Dnf, ToolGeneration, Windows};
use super::backend::chroot::ChrootPackage;
use super::catalog::{Catalog, CatalogSet, sources_for};
use super::context::ExecContext;
use super::descriptor::Descriptor;
use super::error::{PackageError, Result};
use super::extended::Extended;
use super::fallback::Fallback;
use super::manager::{InstallOptions, PackageInfo, PackageManager};
use super::substitute::Substitutions;
use crate::common::config::EngineConfig;
use crate::common::platform::Platform;
use crate::ui::prelude::*;

/// Debian-family releases the apt catalogs fully cover. Other releases get
/// the self-contained backend as a fallback.
pub const NATIVE_APT_CODENAMES: &[&str] = &["buster", "bullseye", "bookworm", "focal", "jammy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeTool {
    Apt,
    Dnf,
    Yum,
}

impl NativeTool {
    fn catalog_set(self) -> CatalogSet {
        match self {
            NativeTool::Apt => CatalogSet::Apt,
            NativeTool::Dnf | NativeTool::Yum => CatalogSet::Dnf,
        }
    }
}

/// Which backend chain serves a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum Selection {
    /// Native tool wrapped with the catalog for its family
    Catalog {
        tool: NativeTool,
        chroot_fallback: bool,
    },
    Windows,
    /// Unrecognised distribution with a known tool on PATH; names are passed
    /// through unchanged
    Passthrough { tool: NativeTool },
}

/// Pick the backend chain for `platform`. `has_tool` reports whether an
/// executable is on PATH.
pub fn select_backend(platform: &Platform, has_tool: impl Fn(&str) -> bool) -> Result<Selection> {
    let distribution = &platform.distribution;
    if distribution.is_debian_based() {
        let native = NATIVE_APT_CODENAMES.contains(&platform.codename.as_str());
        return Ok(Selection::Catalog {
            tool: NativeTool::Apt,
            chroot_fallback: !native,
        });
    }
    if distribution.is_rpm_based() {
        let tool = if has_tool("dnf") {
            NativeTool::Dnf
        } else {
            NativeTool::Yum
        };
        return Ok(Selection::Catalog {
            tool,
            chroot_fallback: false,
        });
    }
    if distribution.is_windows() {
        return Ok(Selection::Windows);
    }

    [
        ("apt", NativeTool::Apt),
        ("dnf", NativeTool::Dnf),
        ("yum", NativeTool::Yum),
    ]
    .into_iter()
    .find(|(program, _)| has_tool(program))
    .map(|(_, tool)| Selection::Passthrough { tool })
    .ok_or_else(|| PackageError::UnsupportedDistribution(distribution.id().to_string()))
}

/// A package definition as the running platform sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Resolved {
    Descriptor(Descriptor),
    SelfContained(ChrootPackage),
}

pub struct Engine {
    platform: Platform,
    selection: Selection,
    manager: Arc<dyn PackageManager>,
    descriptors: Option<Arc<Catalog<Descriptor>>>,
    self_contained: Option<Arc<Catalog<ChrootPackage>>>,
}

impl Engine {
    /// Select and assemble the backend chain for `platform`.
    pub fn build(
        platform: Platform,
        config: &EngineConfig,
        ctx: ExecContext,
        overlay_dirs: &[PathBuf],
    ) -> Result<Self> {
        let overlay = ctx.overlay.clone();
        let selection = select_backend(&platform, |tool| overlay.lookup(tool).is_some())?;
        Self::assemble(platform, selection, config, ctx, overlay_dirs)
    }

    pub fn assemble(
        platform: Platform,
        selection: Selection,
        config: &EngineConfig,
        ctx: ExecContext,
        overlay_dirs: &[PathBuf],
    ) -> Result<Self> {
        let vars = Substitutions::for_platform(&platform, &config.repository_url);
        let load = |set: CatalogSet| -> Result<Arc<Catalog<Descriptor>>> {
            Ok(Arc::new(Catalog::load(
                &sources_for(set, overlay_dirs),
                &platform,
                &vars,
            )?))
        };

        let mut descriptors = None;
        let mut self_contained = None;

        let manager: Arc<dyn PackageManager> = match selection {
            Selection::Catalog {
                tool,
                chroot_fallback,
            } => {
                let catalog = load(tool.catalog_set())?;
                descriptors = Some(catalog.clone());
                let extended: Arc<dyn PackageManager> = Arc::new(Extended::new(
                    native(tool, ctx.clone()),
                    catalog,
                    ctx.clone(),
                ));

                if chroot_fallback {
                    let chroot_catalog: Arc<Catalog<ChrootPackage>> = Arc::new(Catalog::load(
                        &sources_for(CatalogSet::Chroot, overlay_dirs),
                        &platform,
                        &vars,
                    )?);
                    self_contained = Some(chroot_catalog.clone());
                    let chroot = Arc::new(Chroot::new(
                        chroot_catalog,
                        ctx,
                        config.chroot_units_dir.clone(),
                    ));
                    Arc::new(Fallback::new(extended, chroot))
                } else {
                    extended
                }
            }
            Selection::Windows => {
                let catalog = load(CatalogSet::Windows)?;
                descriptors = Some(catalog.clone());
                Arc::new(Windows::new(
                    catalog,
                    ctx,
                    config.windows_services_dir.clone(),
                    config.windows_log_dir.clone(),
                ))
            }
            Selection::Passthrough { tool } => {
                Arc::new(Extended::passthrough(native(tool, ctx.clone()), ctx))
            }
        };

        emit(
            Level::Debug,
            "package.engine.backend",
            &format!("Using {} backend for {}", manager.name(), platform),
            None,
        );

        Ok(Self {
            platform,
            selection,
            manager,
            descriptors,
            self_contained,
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn backend_name(&self) -> &str {
        self.manager.name()
    }

    /// Install packages one at a time in the given order. The first failure
    /// stops the run.
    pub async fn install(&self, names: &[String], options: &InstallOptions) -> Result<()> {
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            emit(
                Level::Info,
                "package.engine.install",
                &format!("Installing {}", name),
                None,
            );
            self.manager
                .install(&[name.to_string()], options)
                .await?;
        }
        Ok(())
    }

    pub async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        self.manager.search(name).await
    }

    pub async fn check_for_updates(&self) -> Result<()> {
        self.manager.check_for_updates().await
    }

    pub async fn remove(&self, names: &[String]) -> Result<()> {
        self.manager.remove(names).await
    }

    pub async fn purge(&self, names: &[String]) -> Result<()> {
        self.manager.purge(names).await
    }

    /// The definition `install` would act on for `name`.
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        if let Some(descriptor) = self.descriptors.as_ref().and_then(|c| c.get(name)) {
            return Ok(Resolved::Descriptor(descriptor.clone()));
        }
        if let Some(package) = self.self_contained.as_ref().and_then(|c| c.get(name)) {
            return Ok(Resolved::SelfContained(package.clone()));
        }
        Err(PackageError::NotFound(name.to_string()))
    }
}

fn native(tool: NativeTool, ctx: ExecContext) -> Arc<dyn PackageManager> {
    match tool {
        NativeTool::Apt => Arc::new(Apt::new(ctx)),
        NativeTool::Dnf => Arc::new(Dnf::new(ToolGeneration::Dnf, ctx)),
        NativeTool::Yum => Arc::new(Dnf::new(ToolGeneration::Yum, ctx)),
    }
}
