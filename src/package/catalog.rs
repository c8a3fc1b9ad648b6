//! Layered package catalogs.
//!
//! A catalog is folded from YAML documents ordered from least to most
//! specific for the running platform:
//!
//! ```text
//! default.yaml
//! default_<arch>.yaml
//! <distro>.yaml
//! <distro>_<version>.yaml
//! <distro>_<codename>.yaml
//! <distro>_<version>_<arch>.yaml
//! <distro>_<codename>_<arch>.yaml
//! ```
//!
//! A later document replaces an earlier entry with the same name entirely.
//! Missing documents are skipped; malformed ones abort the load. Sources are
//! folded one after another, so an overlay directory always beats the
//! documents built into the binary.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;

use super::descriptor::{Descriptor, PackageDocument};
use super::error::{PackageError, Result};
use super::substitute::Substitutions;
use crate::common::platform::Platform;
use crate::ui::prelude::*;

/// Document file names for a platform, least specific first.
pub fn document_names(platform: &Platform) -> Vec<String> {
    let distro = platform.distribution.id();
    let arch = platform.arch.as_str();
    let version = platform.version.as_str();
    let codename = platform.codename.as_str();

    let mut stems: Vec<String> = vec!["default".to_string()];
    if !arch.is_empty() {
        stems.push(format!("default_{}", arch));
    }
    if !distro.is_empty() {
        stems.push(distro.to_string());
        if !version.is_empty() {
            stems.push(format!("{}_{}", distro, version));
        }
        if !codename.is_empty() {
            stems.push(format!("{}_{}", distro, codename));
        }
        if !arch.is_empty() {
            if !version.is_empty() {
                stems.push(format!("{}_{}_{}", distro, version, arch));
            }
            if !codename.is_empty() {
                stems.push(format!("{}_{}_{}", distro, codename, arch));
            }
        }
    }

    let mut names: Vec<String> = Vec::with_capacity(stems.len());
    for stem in stems {
        let name = format!("{}.yaml", stem);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Which family of documents a backend reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSet {
    Apt,
    Dnf,
    Windows,
    Chroot,
}

impl CatalogSet {
    pub fn dir_name(self) -> &'static str {
        match self {
            CatalogSet::Apt => "apt",
            CatalogSet::Dnf => "dnf",
            CatalogSet::Windows => "windows",
            CatalogSet::Chroot => "chroot",
        }
    }

    fn embedded(self) -> &'static [(&'static str, &'static str)] {
        match self {
            CatalogSet::Apt => APT_DOCUMENTS,
            CatalogSet::Dnf => DNF_DOCUMENTS,
            CatalogSet::Windows => WINDOWS_DOCUMENTS,
            CatalogSet::Chroot => CHROOT_DOCUMENTS,
        }
    }
}

const APT_DOCUMENTS: &[(&str, &str)] = &[
    ("default.yaml", include_str!("catalogs/apt/default.yaml")),
    ("default_arm64.yaml", include_str!("catalogs/apt/default_arm64.yaml")),
    ("debian.yaml", include_str!("catalogs/apt/debian.yaml")),
    ("debian_buster.yaml", include_str!("catalogs/apt/debian_buster.yaml")),
    ("debian_bookworm.yaml", include_str!("catalogs/apt/debian_bookworm.yaml")),
    (
        "debian_bookworm_arm64.yaml",
        include_str!("catalogs/apt/debian_bookworm_arm64.yaml"),
    ),
    ("ubuntu.yaml", include_str!("catalogs/apt/ubuntu.yaml")),
    ("ubuntu_focal.yaml", include_str!("catalogs/apt/ubuntu_focal.yaml")),
    (
        "ubuntu_jammy_arm64.yaml",
        include_str!("catalogs/apt/ubuntu_jammy_arm64.yaml"),
    ),
];

const DNF_DOCUMENTS: &[(&str, &str)] = &[
    ("default.yaml", include_str!("catalogs/dnf/default.yaml")),
    ("amzn.yaml", include_str!("catalogs/dnf/amzn.yaml")),
];

const WINDOWS_DOCUMENTS: &[(&str, &str)] = &[(
    "default.yaml",
    include_str!("catalogs/windows/default.yaml"),
)];

const CHROOT_DOCUMENTS: &[(&str, &str)] = &[(
    "default_amd64.yaml",
    include_str!("catalogs/chroot/default_amd64.yaml"),
)];

/// Where catalog documents come from.
pub trait CatalogSource: Send + Sync {
    fn label(&self) -> String;

    /// Read a document. `Ok(None)` when it does not exist.
    fn read(&self, file_name: &str) -> std::io::Result<Option<String>>;
}

/// Documents compiled into the binary.
pub struct EmbeddedSource {
    set: CatalogSet,
}

impl EmbeddedSource {
    pub fn new(set: CatalogSet) -> Self {
        Self { set }
    }
}

impl CatalogSource for EmbeddedSource {
    fn label(&self) -> String {
        format!("builtin:{}", self.set.dir_name())
    }

    fn read(&self, file_name: &str) -> std::io::Result<Option<String>> {
        Ok(self
            .set
            .embedded()
            .iter()
            .find(|(name, _)| *name == file_name)
            .map(|(_, content)| content.to_string()))
    }
}

/// Documents under `<root>/<set>/`.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, set: CatalogSet) -> Self {
        Self {
            dir: root.into().join(set.dir_name()),
        }
    }
}

impl CatalogSource for DirectorySource {
    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn read(&self, file_name: &str) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(self.dir.join(file_name)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory documents, keyed by file name.
#[derive(Default)]
pub struct MemorySource {
    files: HashMap<String, String>,
}

impl MemorySource {
    pub fn new<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl CatalogSource for MemorySource {
    fn label(&self) -> String {
        "memory".to_string()
    }

    fn read(&self, file_name: &str) -> std::io::Result<Option<String>> {
        Ok(self.files.get(file_name).cloned())
    }
}

/// Entry type a catalog can hold.
pub trait CatalogEntry: Sized {
    type Document: DeserializeOwned;

    /// The entry's logical name, writable so the loader can normalise it.
    fn name_mut(doc: &mut Self::Document) -> &mut String;
    fn resolve(doc: Self::Document, vars: &Substitutions) -> Self;
}

impl CatalogEntry for Descriptor {
    type Document = PackageDocument;

    fn name_mut(doc: &mut PackageDocument) -> &mut String {
        &mut doc.name
    }

    fn resolve(doc: PackageDocument, vars: &Substitutions) -> Self {
        doc.resolve(vars)
    }
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "D: DeserializeOwned"))]
struct CatalogFile<D> {
    #[serde(default = "Vec::new")]
    packages: Vec<D>,
}

/// Immutable mapping from logical package name to its resolved entry.
#[derive(Debug)]
pub struct Catalog<T> {
    entries: HashMap<String, T>,
}

fn catalog_error(document: String, message: &str) -> PackageError {
    PackageError::Catalog {
        document,
        source: <serde_yaml::Error as serde::de::Error>::custom(message),
    }
}

impl<T: CatalogEntry> Catalog<T> {
    pub fn load(
        sources: &[Box<dyn CatalogSource>],
        platform: &Platform,
        vars: &Substitutions,
    ) -> Result<Self> {
        let names = document_names(platform);
        let mut raw: HashMap<String, T::Document> = HashMap::new();
        let mut documents = Vec::new();

        for source in sources {
            for file_name in &names {
                let label = format!("{}/{}", source.label(), file_name);
                let Some(content) = source
                    .read(file_name)
                    .map_err(|e| PackageError::io(format!("reading {}", label), e))?
                else {
                    continue;
                };

                let value: serde_yaml::Value =
                    serde_yaml::from_str(&content).map_err(|source| PackageError::Catalog {
                        document: label.clone(),
                        source,
                    })?;
                if value.is_null() {
                    documents.push(label);
                    continue;
                }

                let file: CatalogFile<T::Document> =
                    serde_yaml::from_value(value).map_err(|source| PackageError::Catalog {
                        document: label.clone(),
                        source,
                    })?;

                for mut doc in file.packages {
                    let name = T::name_mut(&mut doc);
                    let trimmed = name.trim().to_string();
                    if trimmed.is_empty() {
                        return Err(catalog_error(label, "package entry without a name"));
                    }
                    *name = trimmed.clone();
                    raw.insert(trimmed, doc);
                }

                emit(
                    Level::Debug,
                    "package.catalog.loaded",
                    &format!("Loaded catalog document {}", label),
                    None,
                );
                documents.push(label);
            }
        }

        emit(
            Level::Debug,
            "package.catalog.ready",
            &format!(
                "{} packages from {} documents",
                raw.len(),
                documents.len()
            ),
            Some(serde_json::json!({ "documents": documents })),
        );

        let entries = raw
            .into_iter()
            .map(|(name, doc)| (name, T::resolve(doc, vars)))
            .collect();

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    /// Logical names, sorted.
    #[cfg(test)]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The built-in documents for `set`, followed by every overlay directory.
pub fn sources_for(set: CatalogSet, overlay_dirs: &[PathBuf]) -> Vec<Box<dyn CatalogSource>> {
    let mut sources: Vec<Box<dyn CatalogSource>> = vec![Box::new(EmbeddedSource::new(set))];
    for dir in overlay_dirs {
        sources.push(Box::new(DirectorySource::new(dir, set)));
    }
    sources
}
