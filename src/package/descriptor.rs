//! Package descriptors.
//!
//! A [`PackageDocument`] is one `packages:` entry exactly as written in a
//! catalog YAML file. Once substituted for the running platform it becomes a
//! [`Descriptor`], whose steps are typed [`Step`] values rather than loose
//! records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::command::normalize_command;
use super::substitute::{PACKAGE_INSTALL_PATH, RuntimeValues, Substitutions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// One declarative step as written in a document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StepDocument {
    pub run_commands: Vec<String>,
    pub allowed_install_exit_codes: Vec<i32>,
    pub wait_for_service: Option<String>,
    pub wait_for_files: Vec<String>,
    pub env: Vec<EnvVar>,
    pub grant_permissions: Vec<PermissionDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionDocument {
    pub path: String,
    pub user: String,
    pub access: String,
}

/// Access level granted on a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    #[default]
    Read,
    ReadExecute,
    Write,
    Modify,
    FullControl,
}

impl Access {
    /// Unrecognised values grant read access.
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "rx" | "read-execute" | "readexecute" => Access::ReadExecute,
            "w" | "write" => Access::Write,
            "m" | "modify" => Access::Modify,
            "f" | "full-control" | "fullcontrol" => Access::FullControl,
            _ => Access::Read,
        }
    }

    /// Simple right accepted by `icacls /grant`.
    pub fn icacls_flag(self) -> &'static str {
        match self {
            Access::Read => "R",
            Access::ReadExecute => "RX",
            Access::Write => "W",
            Access::Modify => "M",
            Access::FullControl => "F",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UninstallDocument {
    pub run_commands: Vec<String>,
    pub allowed_uninstall_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailureAction {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// Windows service registration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub executable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<FailureAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ServiceDefinition {
    /// Registered service name, falling back to the id.
    pub fn service_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Window after which the failure counter resets. Defaults to one hour.
    pub fn reset_failure_after(&self) -> Duration {
        self.reset_failure
            .as_deref()
            .map(duration_or_hour)
            .unwrap_or(Duration::from_secs(3600))
    }

    fn substitute(&mut self, vars: &Substitutions) {
        self.executable = vars.apply(&self.executable);
        self.arguments = vars.apply(&self.arguments);
        vars.apply_opt(&mut self.working_directory);
        vars.apply_opt(&mut self.log_directory);
        vars.apply_opt(&mut self.stop_executable);
        vars.apply_opt(&mut self.stop_arguments);
        for var in &mut self.env {
            var.value = vars.apply(&var.value);
        }
    }
}

impl FailureAction {
    /// Delay before the action fires; zero when not set.
    pub fn delay(&self) -> Duration {
        self.delay
            .as_deref()
            .map(duration_or_hour)
            .unwrap_or(Duration::ZERO)
    }
}

/// A value that is present but unparsable falls back to one hour.
fn duration_or_hour(text: &str) -> Duration {
    parse_duration(text).unwrap_or(Duration::from_secs(3600))
}

/// Parse durations such as `500ms`, `10s`, `5m` or `1h30m`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let millis = match &rest[..unit_len] {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            _ => return None,
        };
        total += Duration::from_millis(millis as u64);
        rest = &rest[unit_len..];
    }
    Some(total)
}

/// A package entry as written in a catalog document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PackageDocument {
    pub name: String,
    pub replace_with: Option<Vec<String>>,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub pre_install: Vec<StepDocument>,
    pub install: Vec<StepDocument>,
    pub post_install: Vec<StepDocument>,
    pub dependencies: Vec<String>,
    pub lookup_paths: Vec<String>,
    pub download_urls: Vec<String>,
    pub install_path: Option<String>,
    pub path_env: Vec<String>,
    pub service: Option<ServiceDefinition>,
    pub uninstall: Vec<UninstallDocument>,
}

/// A typed installation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Command(CommandStep),
    /// Block until the named service is running
    WaitForService(String),
    /// Block until every listed path exists
    WaitForFiles(Vec<PathBuf>),
    GrantPermissions(Grant),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub path: PathBuf,
    pub user: String,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandStep {
    pub command: String,
    pub allowed_exit_codes: Vec<i32>,
    pub env: Vec<EnvVar>,
}

/// A package as resolved for the running platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Descriptor {
    pub name: String,
    pub replace_with: Option<Vec<String>>,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub pre_install: Vec<Step>,
    pub install: Vec<Step>,
    pub post_install: Vec<Step>,
    pub dependencies: Vec<String>,
    pub lookup_paths: Vec<String>,
    pub download_urls: Vec<String>,
    pub install_path: Option<PathBuf>,
    pub path_env: Vec<PathBuf>,
    pub service: Option<ServiceDefinition>,
    pub uninstall: Vec<Step>,
}

fn install_steps(documents: Vec<StepDocument>, vars: &Substitutions) -> Vec<Step> {
    let mut steps = Vec::new();
    for doc in documents {
        let env: Vec<EnvVar> = doc
            .env
            .into_iter()
            .map(|var| EnvVar {
                value: vars.apply(&var.value),
                name: var.name,
            })
            .collect();

        for grant in doc.grant_permissions {
            let path = vars.apply(&grant.path);
            if path.trim().is_empty() || grant.user.trim().is_empty() {
                continue;
            }
            steps.push(Step::GrantPermissions(Grant {
                path: PathBuf::from(path),
                user: vars.apply(&grant.user),
                access: Access::parse(&grant.access),
            }));
        }

        for raw in doc.run_commands {
            let command = normalize_command(&vars.apply(&raw));
            if command.is_empty() {
                continue;
            }
            steps.push(Step::Command(CommandStep {
                command,
                allowed_exit_codes: doc.allowed_install_exit_codes.clone(),
                env: env.clone(),
            }));
        }

        if let Some(service) = doc.wait_for_service {
            let service = vars.apply(&service);
            if !service.trim().is_empty() {
                steps.push(Step::WaitForService(service));
            }
        }

        if !doc.wait_for_files.is_empty() {
            steps.push(Step::WaitForFiles(
                doc.wait_for_files
                    .iter()
                    .map(|f| PathBuf::from(vars.apply(f)))
                    .collect(),
            ));
        }
    }
    steps
}

fn uninstall_steps(documents: Vec<UninstallDocument>, vars: &Substitutions) -> Vec<Step> {
    documents
        .into_iter()
        .flat_map(|doc| {
            let allowed = doc.allowed_uninstall_exit_codes;
            doc.run_commands
                .into_iter()
                .map(|raw| normalize_command(&vars.apply(&raw)))
                .filter(|command| !command.is_empty())
                .map(move |command| {
                    Step::Command(CommandStep {
                        command,
                        allowed_exit_codes: allowed.clone(),
                        env: Vec::new(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

impl PackageDocument {
    /// Substitute placeholders and convert into a typed descriptor.
    pub fn resolve(self, vars: &Substitutions) -> Descriptor {
        let install_path = self
            .install_path
            .as_deref()
            .map(|p| vars.apply(p))
            .filter(|p| !p.trim().is_empty());
        let vars = match &install_path {
            Some(path) => vars.with_value(PACKAGE_INSTALL_PATH, path.clone()),
            None => vars.clone(),
        };

        let mut service = self.service;
        if let Some(service) = service.as_mut() {
            service.substitute(&vars);
        }

        Descriptor {
            replace_with: self.replace_with.map(|names| {
                names
                    .iter()
                    .map(|n| vars.apply(n).trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            }),
            is_virtual: self.is_virtual,
            pre_install: install_steps(self.pre_install, &vars),
            install: install_steps(self.install, &vars),
            post_install: install_steps(self.post_install, &vars),
            dependencies: self.dependencies,
            lookup_paths: self.lookup_paths.iter().map(|p| vars.apply(p)).collect(),
            download_urls: self.download_urls.iter().map(|u| vars.apply(u)).collect(),
            install_path: install_path.map(PathBuf::from),
            path_env: self
                .path_env
                .iter()
                .map(|p| PathBuf::from(vars.apply(p)))
                .collect(),
            service,
            uninstall: uninstall_steps(self.uninstall, &vars),
            name: self.name,
        }
    }
}

impl Step {
    fn with_runtime(&self, values: &RuntimeValues) -> Step {
        match self {
            Step::Command(step) => Step::Command(CommandStep {
                command: values.apply(&step.command),
                allowed_exit_codes: step.allowed_exit_codes.clone(),
                env: step
                    .env
                    .iter()
                    .map(|var| EnvVar {
                        name: var.name.clone(),
                        value: values.apply(&var.value),
                    })
                    .collect(),
            }),
            Step::WaitForService(name) => Step::WaitForService(values.apply(name)),
            Step::WaitForFiles(paths) => Step::WaitForFiles(
                paths
                    .iter()
                    .map(|p| PathBuf::from(values.apply(&p.to_string_lossy())))
                    .collect(),
            ),
            Step::GrantPermissions(grant) => Step::GrantPermissions(Grant {
                path: PathBuf::from(values.apply(&grant.path.to_string_lossy())),
                user: grant.user.clone(),
                access: grant.access,
            }),
        }
    }
}

impl Descriptor {
    /// A copy with install-time values bound in steps and the service block.
    pub fn with_runtime(&self, values: &RuntimeValues) -> Descriptor {
        let steps = |steps: &[Step]| -> Vec<Step> {
            steps.iter().map(|step| step.with_runtime(values)).collect()
        };
        let mut service = self.service.clone();
        if let Some(service) = service.as_mut() {
            service.executable = values.apply(&service.executable);
            service.arguments = values.apply(&service.arguments);
            for field in [
                &mut service.working_directory,
                &mut service.stop_executable,
                &mut service.stop_arguments,
            ] {
                if let Some(value) = field.as_mut() {
                    *value = values.apply(value);
                }
            }
            for var in &mut service.env {
                var.value = values.apply(&var.value);
            }
        }

        Descriptor {
            pre_install: steps(&self.pre_install),
            install: steps(&self.install),
            post_install: steps(&self.post_install),
            service,
            ..self.clone()
        }
    }

    /// Concrete names handed to the native package manager.
    ///
    /// Virtual packages and explicit empty replacements yield nothing.
    pub fn native_targets(&self) -> Vec<String> {
        if self.is_virtual {
            return Vec::new();
        }
        match &self.replace_with {
            Some(names) => names.clone(),
            None => vec![self.name.clone()],
        }
    }

    pub fn has_steps(&self) -> bool {
        !self.pre_install.is_empty() || !self.install.is_empty() || !self.post_install.is_empty()
    }

    /// True when installing this package does nothing at all.
    pub fn is_noop(&self) -> bool {
        self.native_targets().is_empty() && !self.has_steps()
    }
}
