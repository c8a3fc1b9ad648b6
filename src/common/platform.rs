//! Host platform detection.
//!
//! The installation engine keys every decision (which backend to use, which
//! catalog documents apply) on the distribution, its version and codename, and
//! the CPU architecture.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Known operating system distributions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Distribution {
    Debian,
    Ubuntu,
    Raspbian,
    CentOS,
    AlmaLinux,
    Rocky,
    Rhel,
    Fedora,
    Amazon,
    Windows,
    /// Unknown distribution with its os-release ID
    Other(String),
}

impl Distribution {
    pub fn from_id(id: &str) -> Self {
        match id.trim().trim_matches('"').to_lowercase().as_str() {
            "debian" => Self::Debian,
            "ubuntu" => Self::Ubuntu,
            "raspbian" => Self::Raspbian,
            "centos" => Self::CentOS,
            "almalinux" => Self::AlmaLinux,
            "rocky" => Self::Rocky,
            "rhel" => Self::Rhel,
            "fedora" => Self::Fedora,
            "amzn" => Self::Amazon,
            "windows" => Self::Windows,
            other => Self::Other(other.to_string()),
        }
    }

    /// Identifier used in catalog document names and placeholders.
    pub fn id(&self) -> &str {
        match self {
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::Raspbian => "raspbian",
            Self::CentOS => "centos",
            Self::AlmaLinux => "almalinux",
            Self::Rocky => "rocky",
            Self::Rhel => "rhel",
            Self::Fedora => "fedora",
            Self::Amazon => "amzn",
            Self::Windows => "windows",
            Self::Other(id) => id,
        }
    }

    pub fn is_debian_based(&self) -> bool {
        matches!(self, Self::Debian | Self::Ubuntu | Self::Raspbian)
    }

    pub fn is_rpm_based(&self) -> bool {
        matches!(
            self,
            Self::CentOS | Self::AlmaLinux | Self::Rocky | Self::Rhel | Self::Fedora | Self::Amazon
        )
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The (distribution, version, codename, architecture) tuple the engine runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub distribution: Distribution,
    pub version: String,
    pub codename: String,
    pub arch: String,
}

impl Platform {
    pub fn new(
        distribution: Distribution,
        version: impl Into<String>,
        codename: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            distribution,
            version: version.into(),
            codename: codename.into(),
            arch: arch.into(),
        }
    }

    /// Detect the running platform.
    ///
    /// Linux hosts are identified through `/etc/os-release`, falling back to
    /// `/etc/lsb-release`.
    pub fn detect() -> Result<Self> {
        let arch = normalize_arch(std::env::consts::ARCH);

        if cfg!(target_os = "windows") {
            return Ok(Self::new(Distribution::Windows, "", "", arch));
        }

        for candidate in ["/etc/os-release", "/usr/lib/os-release", "/etc/lsb-release"] {
            let path = Path::new(candidate);
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut platform = Self::parse_os_release(&content);
            platform.arch = arch;
            if platform.codename.is_empty() && platform.version.is_empty() {
                anyhow::bail!("unknown operating system: {} has no version", candidate);
            }
            return Ok(platform);
        }

        anyhow::bail!("unknown operating system: no os-release information found")
    }

    /// Parse os-release (or lsb-release) content.
    fn parse_os_release(content: &str) -> Self {
        let field = |key: &str| -> String {
            content
                .lines()
                .find_map(|line| line.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
                .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_lowercase())
                .unwrap_or_default()
        };

        let mut id = field("ID");
        if id.is_empty() {
            id = field("DISTRIB_ID");
        }

        let mut version = field("VERSION_ID");
        if version.is_empty() {
            version = field("DISTRIB_RELEASE");
        }

        let mut codename = field("VERSION_CODENAME");
        if codename.is_empty() {
            codename = field("UBUNTU_CODENAME");
        }
        if codename.is_empty() {
            codename = field("DISTRIB_CODENAME");
        }
        if codename.is_empty() {
            codename = version.clone();
        }

        Self {
            distribution: Distribution::from_id(&id),
            version: version.replace(' ', ""),
            codename: codename.replace(' ', ""),
            arch: String::new(),
        }
    }

    /// Apply command-line overrides on top of a detected platform.
    pub fn with_overrides(
        mut self,
        distribution: Option<&str>,
        version: Option<&str>,
        codename: Option<&str>,
        arch: Option<&str>,
    ) -> Self {
        if let Some(d) = distribution {
            self.distribution = Distribution::from_id(d);
        }
        if let Some(v) = version {
            self.version = v.to_string();
        }
        if let Some(c) = codename {
            self.codename = c.to_string();
        }
        if let Some(a) = arch {
            self.arch = normalize_arch(a);
        }
        self
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) {}",
            self.distribution, self.version, self.codename, self.arch
        )
    }
}

#[derive(Serialize)]
struct PlatformView<'a> {
    distribution: &'a str,
    version: &'a str,
    codename: &'a str,
    architecture: &'a str,
}

impl Platform {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(PlatformView {
            distribution: self.distribution.id(),
            version: &self.version,
            codename: &self.codename,
            architecture: &self.arch,
        })
        .unwrap_or(serde_json::Value::Null)
    }
}

/// Map Rust/uname architecture names to the names used by package catalogs.
pub fn normalize_arch(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        "x86" | "i386" | "i686" | "386" => "x86".to_string(),
        "arm" | "armv7l" | "armhf" => "arm".to_string(),
        other => other.to_string(),
    }
}
