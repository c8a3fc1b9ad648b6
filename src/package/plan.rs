//! Dependency-first installation order.
//!
//! The whole order is computed before anything runs, so a missing package,
//! a self-dependency or a longer cycle fails the request with no side
//! effects.

use std::collections::HashSet;

use super::catalog::Catalog;
use super::descriptor::Descriptor;
use super::error::{PackageError, Result};

/// Order `roots` and their transitive dependencies so every package comes
/// after the packages it depends on. Each name appears once.
pub fn install_order(catalog: &Catalog<Descriptor>, roots: &[String]) -> Result<Vec<String>> {
    let mut ordered = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();

    for root in roots {
        let root = root.trim();
        if root.is_empty() {
            continue;
        }
        visit(catalog, root, &mut visited, &mut visiting, &mut ordered)?;
    }
    Ok(ordered)
}

fn visit(
    catalog: &Catalog<Descriptor>,
    name: &str,
    visited: &mut HashSet<String>,
    visiting: &mut Vec<String>,
    ordered: &mut Vec<String>,
) -> Result<()> {
    if visited.contains(name) {
        return Ok(());
    }
    if let Some(start) = visiting.iter().position(|n| n == name) {
        let mut cycle = visiting[start..].to_vec();
        cycle.push(name.to_string());
        return Err(PackageError::DependencyCycle(cycle));
    }

    let descriptor = catalog
        .get(name)
        .ok_or_else(|| PackageError::NotFound(name.to_string()))?;
    if descriptor.dependencies.iter().any(|d| d.trim() == name) {
        return Err(PackageError::SelfDependency(name.to_string()));
    }

    visiting.push(name.to_string());
    for dependency in &descriptor.dependencies {
        let dependency = dependency.trim();
        if dependency.is_empty() {
            continue;
        }
        visit(catalog, dependency, visited, visiting, ordered)?;
    }
    visiting.pop();

    visited.insert(name.to_string());
    ordered.push(name.to_string());
    Ok(())
}
