use crate::error::{PatchError, PatchResult};
use crate::package_details::PatchedPackageDetails;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct PatchCatalog {
    pub num_patch_files: usize,
    /// Keyed by package path specifier; each series is in application order.
    pub series: BTreeMap<String, Vec<PatchedPackageDetails>>,
    pub unrecognized: Vec<String>,
}

impl PatchCatalog {
    pub fn series_for(&self, path_specifier: &str) -> &[PatchedPackageDetails] {
        self.series
            .get(path_specifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.num_patch_files == 0
    }
}

/// Lists every `.patch` file under `patch_dir` (recursively) as a path
/// relative to it, using `/` separators.
pub fn list_patch_files(patch_dir: &Path) -> PatchResult<Vec<String>> {
    if !patch_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(patch_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(patch_dir).to_path_buf();
            PatchError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".patch") {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(patch_dir) {
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(rel.join("/"));
        }
    }
    Ok(files)
}

pub fn scan(patch_dir: &Path) -> PatchResult<PatchCatalog> {
    let files = list_patch_files(patch_dir)?;
    let mut catalog = PatchCatalog {
        num_patch_files: files.len(),
        ..PatchCatalog::default()
    };

    for file in files {
        match PatchedPackageDetails::from_patch_filename(&file) {
            Some(details) => {
                debug!("Found patch {} for {}", file, details.package.path_specifier);
                catalog
                    .series
                    .entry(details.package.path_specifier.clone())
                    .or_default()
                    .push(details);
            }
            None => {
                warn!("Unrecognized patch file in patches directory: {}", file);
                catalog.unrecognized.push(file);
            }
        }
    }

    for series in catalog.series.values_mut() {
        series.sort_by(|a, b| {
            a.sort_key()
                .cmp(&b.sort_key())
                .then_with(|| a.patch_filename.cmp(&b.patch_filename))
        });
    }

    Ok(catalog)
}

/// Sequence numbers must be unique and increasing; an unnumbered patch is
/// only allowed as the sole member of its series.
pub fn validate_series(path_specifier: &str, series: &[PatchedPackageDetails]) -> PatchResult<()> {
    if series.len() < 2 {
        return Ok(());
    }

    if let Some(unnumbered) = series.iter().find(|p| p.sequence_number.is_none()) {
        return Err(PatchError::InvalidSeries {
            path_specifier: path_specifier.to_string(),
            reason: format!(
                "{} has no sequence number but other patches exist for this package",
                unnumbered.patch_filename
            ),
        });
    }

    for pair in series.windows(2) {
        if pair[0].sequence_number >= pair[1].sequence_number {
            return Err(PatchError::InvalidSeries {
                path_specifier: path_specifier.to_string(),
                reason: format!(
                    "{} and {} share a sequence number",
                    pair[0].patch_filename, pair[1].patch_filename
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_groups_and_orders() {
        let dir = tempdir().unwrap();
        for name in [
            "left-pad+1.3.0+002+second.patch",
            "left-pad+1.3.0+001+initial.patch",
            "left-pad+1.3.0+010.patch",
            "@types+node+18.0.0.patch",
            "notes.txt",
            "garbage.patch",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let catalog = scan(dir.path()).unwrap();

        assert_eq!(catalog.num_patch_files, 5);
        assert_eq!(catalog.unrecognized, vec!["garbage.patch"]);
        let numbers: Vec<_> = catalog
            .series_for("left-pad")
            .iter()
            .map(|p| p.sequence_number)
            .collect();
        assert_eq!(numbers, vec![Some(1), Some(2), Some(10)]);
        assert_eq!(catalog.series_for("@types/node").len(), 1);
        assert!(catalog.series_for("missing").is_empty());
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/left-pad+1.3.0.patch"), "").unwrap();

        let catalog = scan(dir.path()).unwrap();
        assert_eq!(
            catalog.series_for("left-pad")[0].patch_filename,
            "sub/left-pad+1.3.0.patch"
        );
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let catalog = scan(&dir.path().join("patches")).unwrap();
        assert!(catalog.is_empty());
    }

    fn series(names: &[&str]) -> Vec<PatchedPackageDetails> {
        names
            .iter()
            .map(|n| PatchedPackageDetails::from_patch_filename(n).unwrap())
            .collect()
    }

    #[test]
    fn test_validate_series() {
        assert!(validate_series("a", &series(&["a+1.0.0.patch"])).is_ok());
        assert!(validate_series("a", &series(&["a+1.0.0+001.patch", "a+1.0.0+002.patch"])).is_ok());

        assert!(matches!(
            validate_series("a", &series(&["a+1.0.0.patch", "a+1.0.0+001.patch"])),
            Err(PatchError::InvalidSeries { .. })
        ));
        assert!(matches!(
            validate_series("a", &series(&["a+1.0.0+001+x.patch", "a+1.0.0+001+y.patch"])),
            Err(PatchError::InvalidSeries { .. })
        ));
    }
}
