use anyhow::{Context, Result};
use log::debug;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const DEFAULT_INCLUDE: &str = ".*";
pub const DEFAULT_EXCLUDE: &str = r"^package\.json$";

static DEFAULT_INCLUDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(DEFAULT_INCLUDE).unwrap());
static DEFAULT_EXCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(DEFAULT_EXCLUDE)
        .case_insensitive(true)
        .build()
        .unwrap()
});

/// Decides which files of a package take part in a diff. Paths are matched
/// relative to the package root with `/` separators.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Regex,
    exclude: Regex,
}

fn build(pattern: &str, flag: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .with_context(|| format!("Invalid regular expression for --{}: {:?}", flag, pattern))
}

impl PathFilter {
    pub fn new(include: &str, exclude: &str, case_sensitive: bool) -> Result<Self> {
        Ok(PathFilter {
            include: build(include, "include", case_sensitive)?,
            exclude: build(exclude, "exclude", case_sensitive)?,
        })
    }

    pub fn keeps(&self, relative_path: &str) -> bool {
        self.include.is_match(relative_path) && !self.exclude.is_match(relative_path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        PathFilter {
            include: DEFAULT_INCLUDE_RE.clone(),
            exclude: DEFAULT_EXCLUDE_RE.clone(),
        }
    }
}

/// Deletes every file under `dir` the filter does not keep.
pub fn remove_ignored_files(dir: &Path, filter: &PathFilter) -> Result<()> {
    let mut doomed = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = match entry.path().strip_prefix(dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !filter.keeps(&rel) {
            doomed.push(entry.into_path());
        }
    }

    for path in doomed {
        debug!("Ignoring {:?}", path);
        fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
    }
    Ok(())
}
