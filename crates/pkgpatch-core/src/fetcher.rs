use crate::operations::file_operations::copy_dir_all;
use crate::package_details::PackageDetails;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Produces a pristine copy of a published package version.
pub trait PackageFetcher {
    /// Fills `dest` (which already exists and is empty) with the package
    /// contents.
    fn fetch(&self, package: &PackageDetails, version: &str, dest: &Path) -> Result<()>;
}

/// Downloads the tarball with `npm pack` and unpacks it with `tar`.
#[derive(Debug, Clone)]
pub struct NpmPackFetcher {
    app_root: PathBuf,
}

impl NpmPackFetcher {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        NpmPackFetcher {
            app_root: app_root.into(),
        }
    }
}

fn pack_spec(name: &str, version: &str) -> String {
    match version.strip_prefix("file:") {
        Some(path) => path.to_string(),
        None => format!("{}@{}", name, version),
    }
}

impl PackageFetcher for NpmPackFetcher {
    fn fetch(&self, package: &PackageDetails, version: &str, dest: &Path) -> Result<()> {
        let work = TempDir::new().context("Failed to create a download directory")?;

        // Private registries are configured through .npmrc.
        let npmrc = self.app_root.join(".npmrc");
        if npmrc.is_file() {
            fs::copy(&npmrc, work.path().join(".npmrc"))
                .with_context(|| format!("Failed to copy {:?}", npmrc))?;
        }

        let spec = pack_spec(&package.name, version);
        info!("Fetching {} with npm", spec);
        let output = Command::new("npm")
            .arg("pack")
            .arg(&spec)
            .arg("--pack-destination")
            .arg(work.path())
            .current_dir(work.path())
            .output()
            .context("Failed to run npm")?;

        if !output.status.success() {
            return Err(anyhow!(
                "Failed to fetch {}@{}\n{}",
                package.name,
                version,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tarball = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| anyhow!("npm pack did not report a tarball name"))?;
        let tarball = work.path().join(tarball);
        debug!("Extracting {:?} into {:?}", tarball, dest);

        let status = Command::new("tar")
            .arg("xzf")
            .arg(&tarball)
            .arg("-C")
            .arg(dest)
            .arg("--strip-components=1")
            .status()
            .context("Failed to run tar")?;
        if !status.success() {
            bail!("Failed to extract {:?}", tarball);
        }
        Ok(())
    }
}

/// Serves packages from a local directory laid out as
/// `<root>/<package name>/<version>/`.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryFetcher { root: root.into() }
    }
}

impl PackageFetcher for DirectoryFetcher {
    fn fetch(&self, package: &PackageDetails, version: &str, dest: &Path) -> Result<()> {
        let src = self.root.join(&package.name).join(version);
        if !src.is_dir() {
            bail!("No local copy of {}@{} at {:?}", package.name, version, src);
        }
        copy_dir_all(&src, dest, |_| false)
            .with_context(|| format!("Failed to copy {:?}", src))?;
        Ok(())
    }
}
