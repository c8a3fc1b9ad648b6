use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Installation phase a failing step belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreInstall,
    Install,
    PostInstall,
    Uninstall,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreInstall => "pre-install",
            Phase::Install => "install",
            Phase::PostInstall => "post-install",
            Phase::Uninstall => "uninstall",
        })
    }
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("package '{0}' not found")]
    NotFound(String),

    #[error("package '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("command `{command}` exited with {}", exit_code_label(*.code))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} step {index} of package '{package}' failed")]
    Step {
        package: String,
        phase: Phase,
        index: usize,
        #[source]
        source: Box<PackageError>,
    },

    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("refusing to remove {}: package is not marked as installed", .path.display())]
    NotOwned { path: PathBuf },

    #[error("unsupported distribution '{0}'")]
    UnsupportedDistribution(String),

    #[error("invalid catalog document {document}")]
    Catalog {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("primary backend failed: {primary}; fallback backend failed: {secondary}")]
    Fallback {
        primary: Box<PackageError>,
        secondary: Box<PackageError>,
    },
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl PackageError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PackageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn in_step(self, package: &str, phase: Phase, index: usize) -> Self {
        PackageError::Step {
            package: package.to_string(),
            phase,
            index,
            source: Box::new(self),
        }
    }

    pub fn fallback(primary: PackageError, secondary: PackageError) -> Self {
        PackageError::Fallback {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            PackageError::Cancelled => true,
            PackageError::Step { source, .. } => source.is_cancelled(),
            PackageError::Fallback { primary, secondary } => {
                primary.is_cancelled() || secondary.is_cancelled()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_names_package_and_phase() {
        let err = PackageError::CommandFailed {
            command: "false".to_string(),
            code: Some(1),
        }
        .in_step("nginx", Phase::PostInstall, 2);

        assert_eq!(
            err.to_string(),
            "post-install step 2 of package 'nginx' failed"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "command `false` exited with exit code 1");
    }

    #[test]
    fn test_fallback_error_exposes_both_causes() {
        let err = PackageError::fallback(
            PackageError::NotFound("php".to_string()),
            PackageError::Cancelled,
        );
        let text = err.to_string();
        assert!(text.contains("package 'php' not found"));
        assert!(text.contains("operation cancelled"));
        assert!(err.is_cancelled());
    }
}
