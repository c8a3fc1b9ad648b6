//! RedHat-family backend. `dnf` and the older `yum` share a command line, so
//! one type drives both.

use async_trait::async_trait;

use crate::package::command::{CommandSpec, run_checked};
use crate::package::context::ExecContext;
use crate::package::error::{PackageError, Result};
use crate::package::manager::{InstallOptions, PackageInfo, PackageManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGeneration {
    Dnf,
    Yum,
}

impl ToolGeneration {
    pub fn program(self) -> &'static str {
        match self {
            ToolGeneration::Dnf => "dnf",
            ToolGeneration::Yum => "yum",
        }
    }
}

pub struct Dnf {
    tool: ToolGeneration,
    ctx: ExecContext,
}

impl Dnf {
    pub fn new(tool: ToolGeneration, ctx: ExecContext) -> Self {
        Self { tool, ctx }
    }

    async fn run_action(&self, action: &str, names: &[String]) -> Result<()> {
        let names: Vec<&str> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(());
        }
        let spec = CommandSpec::new(self.tool.program())
            .arg(action)
            .arg("-y")
            .args(names);
        run_checked(self.ctx.runner.as_ref(), &spec, &[]).await?;
        Ok(())
    }
}

/// Parse `dnf info` / `yum info` output. A `Name` line starts a new record;
/// lines with an empty key continue the description.
pub fn parse_info_output(output: &str) -> Vec<PackageInfo> {
    let mut packages = Vec::new();
    let mut current: Option<PackageInfo> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Name" => {
                if let Some(info) = current.take() {
                    packages.push(info);
                }
                current = Some(PackageInfo {
                    name: value.to_string(),
                    ..Default::default()
                });
            }
            key => {
                let Some(info) = current.as_mut() else {
                    continue;
                };
                match key {
                    "Version" => info.version = value.to_string(),
                    "Arch" | "Architecture" => info.architecture = value.to_string(),
                    "Size" => info.size = value.to_string(),
                    "Description" => info.description = value.to_string(),
                    "" if !value.is_empty() => {
                        info.description.push(' ');
                        info.description.push_str(value);
                    }
                    _ => {}
                }
            }
        }
    }
    if let Some(info) = current {
        packages.push(info);
    }
    packages
}

#[async_trait]
impl PackageManager for Dnf {
    fn name(&self) -> &str {
        self.tool.program()
    }

    async fn search(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let spec = CommandSpec::new(self.tool.program()).args(["info", name]);
        let out = self.ctx.runner.run(&spec).await?;
        if out.output.contains("No matching Packages") {
            return Ok(Vec::new());
        }
        if !out.success() {
            return Err(PackageError::CommandFailed {
                command: spec.display(),
                code: out.code,
            });
        }
        Ok(parse_info_output(&out.output))
    }

    async fn install(&self, names: &[String], _options: &InstallOptions) -> Result<()> {
        self.run_action("install", names).await
    }

    /// Metadata is refreshed on demand by dnf itself.
    async fn check_for_updates(&self) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        self.run_action("remove", names).await
    }

    async fn purge(&self, names: &[String]) -> Result<()> {
        self.run_action("remove", names).await
    }
}
