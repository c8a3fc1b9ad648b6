//! Debian-family backend driving `apt-get` and `apt-cache`.

use async_trait::async_trait;

use crate::package::command::{CommandSpec, run_checked};
use crate::package::context::ExecContext;
use crate::package::error::{PackageError, Result};
use crate::package::manager::{InstallOptions, PackageInfo, PackageManager};

pub struct Apt {
    ctx: ExecContext,
}

impl Apt {
    pub fn new(ctx: ExecContext) -> Self {
        Self { ctx }
    }

    fn apt_get(&self, action: &str, names: &[String]) -> Option<CommandSpec> {
        let names: Vec<&str> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return None;
        }
        Some(
            CommandSpec::new("apt-get")
                .arg(action)
                .arg("-y")
                .args(names)
                .env("DEBIAN_FRONTEND", "noninteractive"),
        )
    }

    async fn run_action(&self, action: &str, names: &[String]) -> Result<()> {
        let Some(spec) = self.apt_get(action, names) else {
            return Ok(());
        };
        run_checked(self.ctx.runner.as_ref(), &spec, &[]).await?;
        Ok(())
    }
}

/// Parse `apt-cache show` output: RFC 822 stanzas separated by blank lines.
pub fn parse_apt_cache_show(output: &str) -> Vec<PackageInfo> {
    let mut packages = Vec::new();
    let mut current: Option<PackageInfo> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            if let Some(info) = current.take() {
                packages.push(info);
            }
            continue;
        }
        // continuation lines belong to the long description
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        let info = current.get_or_insert_with(PackageInfo::default);
        match key.trim() {
            "Package" => info.name = value,
            "Architecture" => info.architecture = value,
            "Version" => info.version = value,
            "Size" => info.size = value,
            "Installed-Size" => info.installed_size_kb = value.parse().ok(),
            "Description" | "Description-en" if info.description.is_empty() => {
                info.description = value
            }
            _ => {}
        }
    }
    if let Some(info) = current {
        packages.push(info);
    }

    packages.retain(|p| !p.name.is_empty());
    packages
}

#[async_trait]
impl PackageManager for Apt {
    fn name(&self) -> &str {
        "apt"
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let spec = CommandSpec::new("apt-cache")
            .args(["show", name])
            .env("DEBIAN_FRONTEND", "noninteractive");
        let out = self.ctx.runner.run(&spec).await?;
        if out.output.contains("No packages found") {
            return Ok(Vec::new());
        }
        if !out.success() {
            return Err(PackageError::CommandFailed {
                command: spec.display(),
                code: out.code,
            });
        }
        Ok(parse_apt_cache_show(&out.output))
    }

    async fn install(&self, names: &[String], _options: &InstallOptions) -> Result<()> {
        self.run_action("install", names).await
    }

    async fn check_for_updates(&self) -> Result<()> {
        let spec = CommandSpec::new("apt-get")
            .args(["update", "-q"])
            .env("DEBIAN_FRONTEND", "noninteractive");
        run_checked(self.ctx.runner.as_ref(), &spec, &[]).await?;
        Ok(())
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        self.run_action("remove", names).await
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        self.run_action("purge", names).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::context::testing::*;
    use std::sync::Arc;

    const SHOW_OUTPUT: &str = "Package: nginx
Version: 1.22.1-9
Installed-Size: 1262
Maintainer: Debian Nginx Maintainers
Architecture: amd64
Description: small, powerful, scalable web/proxy server
 Nginx (\"engine X\") is a high-performance web and reverse proxy server
 created by Igor Sysoev.
Size: 39232

Package: nginx
Version: 1.22.1-9+deb12u1
Architecture: amd64
Size: 40204
Description-en: small, powerful, scalable web/proxy server
";

    fn apt() -> (Apt, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::default());
        let ctx = context(runner.clone(), Arc::new(FakeServices::default()));
        (Apt::new(ctx), runner)
    }

    #[test]
    fn test_parse_apt_cache_show() {
        let packages = parse_apt_cache_show(SHOW_OUTPUT);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "nginx");
        assert_eq!(packages[0].version, "1.22.1-9");
        assert_eq!(packages[0].installed_size_kb, Some(1262));
        assert_eq!(packages[0].size, "39232");
        assert_eq!(
            packages[0].description,
            "small, powerful, scalable web/proxy server"
        );
        assert_eq!(packages[1].version, "1.22.1-9+deb12u1");
        assert_eq!(packages[1].installed_size_kb, None);
    }

    #[tokio::test]
    async fn test_install_skips_blank_names() {
        let (apt, runner) = apt();
        let requested = ["nginx".to_string(), " ".to_string(), String::new()];
        apt.install(&requested, &InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(runner.commands(), vec!["apt-get install -y nginx"]);
    }

    #[tokio::test]
    async fn test_install_nothing_runs_nothing() {
        let (apt, runner) = apt();
        apt.install(&[String::new()], &InstallOptions::default()).await.unwrap();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_search_not_found_is_empty() {
        let (apt, runner) = apt();
        runner.respond("apt-cache show", 100, "E: No packages found\n");
        assert!(apt.search("nosuchpkg").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_and_update_commands() {
        let (apt, runner) = apt();
        apt.purge(&["mysql-server".to_string()]).await.unwrap();
        apt.check_for_updates().await.unwrap();
        assert_eq!(
            runner.commands(),
            vec!["apt-get purge -y mysql-server", "apt-get update -q"]
        );
    }

    #[tokio::test]
    async fn test_failed_install_reports_command() {
        let (apt, runner) = apt();
        runner.respond("apt-get install", 100, "E: Unable to locate package");
        let err = apt
            .install(&["nosuchpkg".to_string()], &InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::CommandFailed { code: Some(100), .. }));
    }
}
