use crate::package_details::PackageDetails;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
}

impl PackageManifest {
    pub fn read(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub version: String,
    /// Absolute path of the installed copy.
    pub dir: PathBuf,
}

pub trait PackageResolver {
    /// `Ok(None)` when the package is not installed.
    fn resolve(&self, package: &PackageDetails) -> Result<Option<ResolvedPackage>>;
}

/// Looks packages up in the project's `node_modules` tree.
#[derive(Debug, Clone)]
pub struct NodeModulesResolver {
    app_root: PathBuf,
}

impl NodeModulesResolver {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        NodeModulesResolver {
            app_root: app_root.into(),
        }
    }
}

impl PackageResolver for NodeModulesResolver {
    fn resolve(&self, package: &PackageDetails) -> Result<Option<ResolvedPackage>> {
        let dir = self.app_root.join(&package.path);
        let manifest_path = dir.join("package.json");
        if !manifest_path.is_file() {
            return Ok(None);
        }

        let manifest = PackageManifest::read(&manifest_path)?;
        let version = manifest
            .version
            .with_context(|| format!("No \"version\" field in {:?}", manifest_path))?;
        Ok(Some(ResolvedPackage { version, dir }))
    }
}
