//! Windows backend: downloaded installers and archives described entirely by
//! the catalog, with long-running programs registered as services through
//! the shawl wrapper.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::package::catalog::Catalog;
use crate::package::command::{CommandSpec, run_checked};
use crate::package::context::ExecContext;
use crate::package::descriptor::{Descriptor, ServiceDefinition};
use crate::package::download::archive_kind;
use crate::package::error::{PackageError, Phase, Result};
use crate::package::manager::{InstallOptions, PackageInfo, PackageManager};
use crate::package::plan::install_order;
use crate::ui::prelude::*;

const DEFAULT_SERVICE_ACCOUNT: &str = r"NT AUTHORITY\NETWORK SERVICE";
const STOP_TIMEOUT_MS: &str = "10000";
const LOG_RETAIN_DAYS: &str = "60";

pub struct Windows {
    catalog: Arc<Catalog<Descriptor>>,
    ctx: ExecContext,
    services_dir: PathBuf,
    log_dir: PathBuf,
    completed: Mutex<HashSet<String>>,
}

/// Arguments passed to `shawl`, up to and including the wrapped command line.
pub fn shawl_arguments(service: &ServiceDefinition, default_log_dir: &Path) -> Vec<String> {
    let name = service.service_name().replace(' ', "_");
    let mut args = vec!["run".to_string(), "--name".to_string(), name.clone()];

    if !service.on_failure.is_empty() {
        args.push("--restart".to_string());
        if let Some(delay) = service
            .on_failure
            .iter()
            .map(|f| f.delay())
            .find(|d| !d.is_zero())
        {
            args.push("--restart-delay".to_string());
            args.push(delay.as_millis().to_string());
        }
    }

    args.push("--stop-timeout".to_string());
    args.push(STOP_TIMEOUT_MS.to_string());

    if let Some(dir) = service.working_directory.as_deref().filter(|d| !d.is_empty()) {
        args.push("--cwd".to_string());
        args.push(dir.to_string());
    }

    let log_dir = service
        .log_directory
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_log_dir.display().to_string());
    args.extend([
        "--log-dir".to_string(),
        log_dir,
        "--log-as".to_string(),
        format!("{}.log", name),
        "--log-rotate".to_string(),
        "daily".to_string(),
        "--log-retain".to_string(),
        LOG_RETAIN_DAYS.to_string(),
    ]);

    for var in &service.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", var.name, var.value));
    }

    args.push("--".to_string());
    args.push(service.executable.clone());
    args.extend(split_arguments(&service.arguments));
    args
}

/// Split a service argument string with shell quoting rules. Backslashes are
/// literal so Windows paths survive. Unbalanced quotes fall back to
/// splitting on whitespace.
fn split_arguments(arguments: &str) -> Vec<String> {
    let mut escaped = String::with_capacity(arguments.len());
    let mut quote = None;
    for c in arguments.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(open), c) if c == open => quote = None,
            (None | Some('"'), '\\') => escaped.push('\\'),
            _ => {}
        }
        escaped.push(c);
    }

    shell_words::split(&escaped).unwrap_or_else(|e| {
        emit(
            Level::Debug,
            "package.service.arguments",
            &format!("{}, splitting `{}` on whitespace", e, arguments),
            None,
        );
        arguments.split_whitespace().map(str::to_string).collect()
    })
}

/// `sc failure` arguments, or `None` when no failure actions are declared.
pub fn failure_arguments(service: &ServiceDefinition) -> Option<Vec<String>> {
    if service.on_failure.is_empty() {
        return None;
    }
    let actions = service
        .on_failure
        .iter()
        .map(|failure| {
            let action = match failure.action.as_str() {
                "restart" | "reboot" | "run" => failure.action.as_str(),
                _ => "",
            };
            format!("{}/{}", action, failure.delay().as_millis())
        })
        .collect::<Vec<_>>()
        .join("/");

    Some(vec![
        "failure".to_string(),
        service.service_name().to_string(),
        format!("reset={}", service.reset_failure_after().as_secs()),
        format!("actions={}", actions),
    ])
}

impl Windows {
    pub fn new(
        catalog: Arc<Catalog<Descriptor>>,
        ctx: ExecContext,
        services_dir: PathBuf,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            ctx,
            services_dir,
            log_dir,
            completed: Mutex::new(HashSet::new()),
        }
    }

    fn service_registered(&self, service: &ServiceDefinition) -> bool {
        self.ctx.services.is_registered(service.service_name())
            || (!service.id.is_empty() && self.ctx.services.is_registered(&service.id))
    }

    /// Every lookup path resolves and, when a service is declared, it is
    /// registered. Packages without lookup paths are never considered
    /// installed.
    pub fn is_installed(&self, descriptor: &Descriptor) -> bool {
        if descriptor.lookup_paths.is_empty() {
            return false;
        }
        if !descriptor
            .lookup_paths
            .iter()
            .all(|path| self.ctx.locate(path).is_some())
        {
            return false;
        }
        match &descriptor.service {
            Some(service) => self.service_registered(service),
            None => true,
        }
    }

    async fn install_one(&self, descriptor: &Descriptor, options: &InstallOptions) -> Result<()> {
        let name = descriptor.name.as_str();
        if self.is_installed(descriptor) {
            emit(
                Level::Info,
                "package.windows.present",
                &format!("{} is already installed, skipping", name),
                None,
            );
            return Ok(());
        }
        let descriptor = &descriptor.with_runtime(&self.ctx.runtime_values(descriptor, options));

        emit(
            Level::Info,
            "package.windows.install",
            &format!("Installing {}", name),
            None,
        );

        let scratch;
        let dir: PathBuf = match &descriptor.install_path {
            Some(path) => path.clone(),
            None => {
                scratch = tempfile::Builder::new()
                    .prefix("panelctl-install")
                    .tempdir()
                    .map_err(|e| PackageError::io("creating temporary install directory", e))?;
                scratch.path().to_path_buf()
            }
        };
        if !self.ctx.dry_run {
            std::fs::create_dir_all(&dir)
                .map_err(|e| PackageError::io(format!("creating {}", dir.display()), e))?;
        }

        self.ctx
            .run_steps(name, Phase::PreInstall, &descriptor.pre_install, Some(&dir))
            .await?;

        if !descriptor.download_urls.is_empty() {
            let file = self
                .ctx
                .downloader
                .fetch_first(&descriptor.download_urls, &dir)
                .await?;
            self.unpack(&file, &dir).await?;
        }

        self.ctx
            .run_steps(name, Phase::Install, &descriptor.install, Some(&dir))
            .await?;

        let added = self.ctx.overlay.contribute(&descriptor.path_env);
        for path in added {
            emit(
                Level::Debug,
                "package.path.add",
                &format!("Added {} to PATH", path.display()),
                None,
            );
        }

        if let Some(service) = &descriptor.service {
            self.register_service(service).await?;
        }

        self.ctx
            .run_steps(name, Phase::PostInstall, &descriptor.post_install, Some(&dir))
            .await?;

        emit(
            Level::Success,
            "package.windows.installed",
            &format!("Installed {}", name),
            None,
        );
        Ok(())
    }

    /// Extract a downloaded archive in place. Installers and plain files are
    /// left for the install steps.
    async fn unpack(&self, file: &Path, dir: &Path) -> Result<()> {
        let Some(flags) = archive_kind(file) else {
            return Ok(());
        };
        let spec = CommandSpec::new("tar")
            .args(flags.iter().copied())
            .arg(file.display().to_string())
            .arg("-C")
            .arg(dir.display().to_string());
        run_checked(self.ctx.runner.as_ref(), &spec, &[]).await?;

        if !self.ctx.dry_run {
            std::fs::remove_file(file)
                .map_err(|e| PackageError::io(format!("removing {}", file.display()), e))?;
        }
        Ok(())
    }

    async fn register_service(&self, service: &ServiceDefinition) -> Result<()> {
        let name = service.service_name();
        if self.service_registered(service) {
            emit(
                Level::Info,
                "package.service.present",
                &format!("Service '{}' already exists", name),
                None,
            );
            return Ok(());
        }

        let shawl = match self.ctx.overlay.lookup("shawl") {
            Some(path) => path,
            None if self.ctx.dry_run => PathBuf::from("shawl.exe"),
            None => return Err(PackageError::NotFound("shawl".to_string())),
        };

        let bin_path = std::iter::once(shawl.display().to_string())
            .chain(shawl_arguments(service, &self.log_dir))
            .collect::<Vec<_>>()
            .join(" ");

        self.save_service_definition(service)?;

        let account = service
            .service_account
            .as_ref()
            .filter(|a| !a.username.is_empty());
        let mut create = CommandSpec::new("sc").args([
            "create".to_string(),
            name.to_string(),
            "start=auto".to_string(),
            format!(
                "obj={}",
                account
                    .map(|a| a.username.as_str())
                    .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
            ),
        ]);
        if let Some(password) = account.and_then(|a| a.password.as_deref()) {
            create = create.arg(format!("password={}", password));
        }
        create = create.arg(format!("binPath={}", bin_path));
        run_checked(self.ctx.runner.as_ref(), &create, &[]).await?;

        if let Some(args) = failure_arguments(service) {
            run_checked(self.ctx.runner.as_ref(), &CommandSpec::new("sc").args(args), &[])
                .await?;
        }

        emit(
            Level::Success,
            "package.service.registered",
            &format!("Registered service '{}'", name),
            None,
        );
        Ok(())
    }

    fn service_definition_path(&self, service: &ServiceDefinition) -> PathBuf {
        self.services_dir
            .join(format!("{}.yaml", service.service_name()))
    }

    fn save_service_definition(&self, service: &ServiceDefinition) -> Result<()> {
        if self.ctx.dry_run {
            return Ok(());
        }
        let path = self.service_definition_path(service);
        let yaml = serde_yaml::to_string(service).map_err(|e| {
            PackageError::io(
                format!("serializing service '{}'", service.service_name()),
                std::io::Error::other(e),
            )
        })?;
        std::fs::create_dir_all(&self.services_dir).map_err(|e| {
            PackageError::io(format!("creating {}", self.services_dir.display()), e)
        })?;
        std::fs::write(&path, yaml)
            .map_err(|e| PackageError::io(format!("writing {}", path.display()), e))
    }

    async fn remove_service(&self, service: &ServiceDefinition) -> Result<()> {
        let name = service.service_name();
        if !self.service_registered(service) {
            emit(
                Level::Debug,
                "package.service.absent",
                &format!("Service '{}' does not exist, nothing to remove", name),
                None,
            );
            return Ok(());
        }

        // a stopped service makes `sc stop` fail
        let stop = CommandSpec::new("sc").args(["stop", name]);
        let stopped = self.ctx.runner.run(&stop).await?;
        if !stopped.success() {
            emit(
                Level::Debug,
                "package.service.stop",
                &format!("`{}` exited with {:?}", stop.display(), stopped.code),
                None,
            );
        }

        let delete = CommandSpec::new("sc").args(["delete", name]);
        run_checked(self.ctx.runner.as_ref(), &delete, &[]).await?;

        let path = self.service_definition_path(service);
        if !self.ctx.dry_run && path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                emit(
                    Level::Warn,
                    "package.service.definition",
                    &format!("Failed to remove {}: {}", path.display(), e),
                    None,
                );
            }
        }
        Ok(())
    }

    async fn remove_one(&self, descriptor: &Descriptor) -> Result<()> {
        let name = descriptor.name.as_str();
        emit(
            Level::Info,
            "package.windows.remove",
            &format!("Removing {}", name),
            None,
        );

        if let Some(service) = &descriptor.service {
            self.remove_service(service).await?;
        }

        for (index, step) in descriptor.uninstall.iter().enumerate() {
            if let Err(e) = self.ctx.run_step(step, None).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                let e = e.in_step(name, Phase::Uninstall, index + 1);
                emit(Level::Warn, "package.uninstall.failed", &e.to_string(), None);
            }
        }

        self.ctx.overlay.withdraw(&descriptor.path_env);
        self.completed.lock().map(|mut done| done.remove(name)).ok();

        emit(
            Level::Success,
            "package.windows.removed",
            &format!("Removed {}", name),
            None,
        );
        Ok(())
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
}

#[async_trait]
impl PackageManager for Windows {
    fn name(&self) -> &str {
        "windows"
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        Ok(self
            .catalog
            .get(name)
            .map(|descriptor| PackageInfo {
                name: descriptor.name.clone(),
                description: descriptor
                    .download_urls
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                ..Default::default()
            })
            .into_iter()
            .collect())
    }

    async fn install(&self, names: &[String], options: &InstallOptions) -> Result<()> {
        let order = install_order(&self.catalog, names)?;
        for name in order {
            if self.is_completed(&name) {
                continue;
            }
            let descriptor = self
                .catalog
                .get(&name)
                .ok_or_else(|| PackageError::NotFound(name.clone()))?;
            self.install_one(descriptor, options).await?;
            self.mark_completed(&name);
        }
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let Some(descriptor) = self.catalog.get(name) else {
                emit(
                    Level::Warn,
                    "package.windows.unknown",
                    &format!("Package {} is not in the catalog, skipping", name),
                    None,
                );
                continue;
            };
            self.remove_one(descriptor).await?;
        }
        Ok(())
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        self.remove(names).await
    }
}
