//! Shared execution context handed to every backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::command::{CommandRunner, CommandSpec, DryRunRunner, ShellRunner, run_checked};
use super::descriptor::{Descriptor, Grant, Step};
use super::download::Downloader;
use super::env_path::PathOverlay;
use super::error::{PackageError, Phase, Result};
use super::manager::InstallOptions;
use super::services::{ServiceStatus, SystemServices};
use super::substitute::RuntimeValues;
use super::wait::{WaitPolicy, wait_until};
use crate::common::config::EngineConfig;
use crate::ui::prelude::*;

#[derive(Clone)]
pub struct ExecContext {
    pub runner: Arc<dyn CommandRunner>,
    pub services: Arc<dyn ServiceStatus>,
    pub overlay: Arc<PathOverlay>,
    pub downloader: Arc<Downloader>,
    pub token: CancellationToken,
    pub wait: WaitPolicy,
    /// No filesystem changes outside spawned commands
    pub dry_run: bool,
}

impl ExecContext {
    /// Context backed by real processes, or a printing runner for dry runs.
    pub fn from_config(
        config: &EngineConfig,
        token: CancellationToken,
        dry_run: bool,
    ) -> Result<Self> {
        let overlay = Arc::new(PathOverlay::from_env());
        let runner: Arc<dyn CommandRunner> = if dry_run {
            Arc::new(DryRunRunner)
        } else {
            Arc::new(ShellRunner::new(token.clone(), overlay.clone()))
        };

        Ok(Self {
            runner,
            services: Arc::new(SystemServices),
            overlay,
            downloader: Arc::new(Downloader::new(
                config.download_timeout(),
                token.clone(),
                dry_run,
            )?),
            token,
            wait: WaitPolicy {
                interval: config.wait_interval(),
                attempts: config.wait_attempts,
            },
            dry_run,
        })
    }

    /// Where `binary` lives: absolute paths must exist, bare names are
    /// searched on PATH including directories added by earlier installs.
    pub fn locate(&self, binary: &str) -> Option<PathBuf> {
        let candidate = Path::new(binary);
        if candidate.is_absolute() {
            candidate.exists().then(|| candidate.to_path_buf())
        } else {
            self.overlay.lookup(binary)
        }
    }

    /// Values bound when `descriptor` starts installing: the directory each
    /// found lookup path lives in, plus the caller's config values.
    pub fn runtime_values(
        &self,
        descriptor: &Descriptor,
        options: &InstallOptions,
    ) -> RuntimeValues {
        let mut values = RuntimeValues::new(options.config_values().clone());
        for binary in &descriptor.lookup_paths {
            let Some(found) = self.locate(binary) else {
                continue;
            };
            emit(
                Level::Debug,
                "package.lookup",
                &format!("{} for {} found at {}", binary, descriptor.name, found.display()),
                None,
            );
            if let Some(dir) = found.parent() {
                values = values.with_lookup_dir(binary.clone(), dir.display().to_string());
            }
        }
        values
    }

    /// Execute steps in order. The first failure stops the sequence and is
    /// reported with the package, phase and step index.
    pub async fn run_steps(
        &self,
        package: &str,
        phase: Phase,
        steps: &[Step],
        cwd: Option<&Path>,
    ) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            self.run_step(step, cwd)
                .await
                .map_err(|e| match e {
                    PackageError::Cancelled => PackageError::Cancelled,
                    other => other.in_step(package, phase, index + 1),
                })?;
        }
        Ok(())
    }

    pub async fn run_step(&self, step: &Step, cwd: Option<&Path>) -> Result<()> {
        match step {
            Step::Command(command) => {
                if command.command.trim().is_empty() {
                    return Ok(());
                }
                let mut spec = CommandSpec::shell(&command.command).cwd(cwd);
                for var in &command.env {
                    spec = spec.env(&var.name, &var.value);
                }
                run_checked(self.runner.as_ref(), &spec, &command.allowed_exit_codes).await?;
                Ok(())
            }
            Step::WaitForService(name) => {
                if self.dry_run {
                    return Ok(());
                }
                let services = self.services.clone();
                wait_until(self.wait, &self.token, &format!("service '{}'", name), || {
                    services.is_running(name)
                })
                .await
            }
            Step::WaitForFiles(paths) => {
                if self.dry_run {
                    return Ok(());
                }
                let listed = paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                wait_until(self.wait, &self.token, &format!("files {}", listed), || {
                    paths.iter().all(|p| p.exists())
                })
                .await
            }
            Step::GrantPermissions(grant) => self.grant(grant).await,
        }
    }

    async fn grant(&self, grant: &Grant) -> Result<()> {
        emit(
            Level::Info,
            "package.grant",
            &format!(
                "Granting {:?} on {} to {}",
                grant.access,
                grant.path.display(),
                grant.user
            ),
            None,
        );
        // directories pass the right on to everything below them
        let (rights, recurse) = if grant.path.is_dir() {
            (format!("(OI)(CI){}", grant.access.icacls_flag()), true)
        } else {
            (grant.access.icacls_flag().to_string(), false)
        };
        let mut spec = CommandSpec::new("icacls").args([
            grant.path.display().to_string(),
            "/grant".to_string(),
            format!("{}:{}", grant.user, rights),
        ]);
        if recurse {
            spec = spec.arg("/T");
        }
        run_checked(self.runner.as_ref(), &spec.arg("/Q"), &[]).await?;
        Ok(())
    }
}
