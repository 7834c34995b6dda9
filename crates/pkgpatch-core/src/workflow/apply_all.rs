use crate::catalog::{scan, validate_series};
use crate::error::PatchError;
use crate::hash::hash_file;
use crate::package_details::PatchedPackageDetails;
use crate::resolver::PackageResolver;
use crate::state::SeriesState;
use crate::workflow::report::{write_rejection_report, RejectionRecord, REJECTS_FILE};
use crate::workflow::{apply_patch_file, print_sequence_error, PatchOutcome, Project};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::env;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplySettings {
    pub reverse: bool,
    pub best_effort: bool,
}

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rejections: Vec<RejectionRecord>,
}

impl ApplySummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

fn is_production() -> bool {
    env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
}

/// Applies (or with `reverse`, un-applies) every patch series found in the
/// project's patch directory. Failures are collected per package; one broken
/// package does not stop the others.
pub fn apply_patches_for_app(
    project: &Project,
    resolver: &dyn PackageResolver,
    settings: ApplySettings,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    let catalog = scan(&project.patch_dir_path())?;

    if catalog.is_empty() {
        println!("No patch files found");
        return Ok(summary);
    }
    for file in &catalog.unrecognized {
        println!("Unrecognized patch file in patches directory {}", file);
    }

    for (path_specifier, series) in &catalog.series {
        if let Err(e) = validate_series(path_specifier, series) {
            summary.errors.push(e.to_string());
            continue;
        }
        if let Err(e) = apply_patches_for_package(project, resolver, series, settings, &mut summary) {
            summary.errors.push(format!("{:#}", e));
        }
    }

    if !summary.rejections.is_empty() {
        let path = project.app_root.join(REJECTS_FILE);
        write_rejection_report(&path, &summary.rejections)?;
        println!("Saving errors to ./{}", REJECTS_FILE);
    }

    for warning in &summary.warnings {
        warn!("{}", warning);
    }
    Ok(summary)
}

/// Walks the recorded state against the catalog. Returns how many leading
/// patches are already applied.
fn applied_prefix(
    project: &Project,
    series: &[PatchedPackageDetails],
    state: &SeriesState,
) -> Result<usize> {
    let mut count = 0;
    for recorded in &state.patches {
        if !recorded.did_apply {
            break;
        }
        let expected = series.get(count).ok_or_else(|| {
            anyhow!(
                "The patches for {} have changed: {} was applied but no longer exists. \
                 Reinstall your node_modules to fix this.",
                series[0].package.path_specifier,
                recorded.patch_filename
            )
        })?;
        if expected.patch_filename != recorded.patch_filename {
            return Err(anyhow!(
                "The patches for {} have changed: expected {} but {} was applied. \
                 Reinstall your node_modules to fix this.",
                expected.package.path_specifier,
                expected.patch_filename,
                recorded.patch_filename
            ));
        }
        let actual = hash_file(&project.patch_path(&recorded.patch_filename))?;
        if actual != recorded.patch_content_hash {
            return Err(PatchError::IntegrityMismatch {
                patch_filename: recorded.patch_filename.clone(),
                expected: recorded.patch_content_hash.clone(),
                actual,
            }
            .into());
        }
        count += 1;
    }
    Ok(count)
}

pub fn apply_patches_for_package(
    project: &Project,
    resolver: &dyn PackageResolver,
    series: &[PatchedPackageDetails],
    settings: ApplySettings,
    summary: &mut ApplySummary,
) -> Result<()> {
    let first = match series.first() {
        Some(first) => first,
        None => return Ok(()),
    };
    let package = &first.package;
    let key = project.state_key(package);
    let _lock = project.store.lock(&key)?;

    let state = if series.len() > 1 {
        project.store.load(&key)?
    } else {
        None
    };

    let already = match &state {
        Some(state) => applied_prefix(project, series, state)?,
        None => 0,
    };

    let to_process: Vec<&PatchedPackageDetails> = if settings.reverse && state.is_some() {
        series[..already].iter().rev().collect()
    } else {
        for patch in &series[..already] {
            println!("{} {} (already applied)", package.path_specifier, patch.patch_filename);
        }
        series[already..].iter().collect()
    };

    let mut processed: Vec<&PatchedPackageDetails> = Vec::new();
    let mut failed: Option<&PatchedPackageDetails> = None;

    for patch in to_process {
        let installed = match resolver.resolve(&patch.package)? {
            Some(installed) => installed,
            None if patch.is_dev_only && is_production() => {
                println!("Skipping dev-only {}@{}", package.path_specifier, patch.version);
                continue;
            }
            None => {
                return Err(anyhow!(
                    "Patch file found for package {} which is not present at {}",
                    package.path_specifier,
                    patch.package.path.display()
                ));
            }
        };

        let patch_path = project.patch_path(&patch.patch_filename);
        let outcome = apply_patch_file(
            &patch_path,
            &project.app_root,
            settings.reverse,
            settings.best_effort,
        )
        .with_context(|| format!("Failed to read patch file {}", patch.patch_filename))?;

        match outcome {
            PatchOutcome::Applied(result) => {
                for (file, hunk) in result.fuzzed() {
                    summary.warnings.push(format!(
                        "{}: hunk #{} of {} applied at a different line than recorded",
                        patch.patch_filename,
                        hunk.index,
                        file.display()
                    ));
                }
                for rejection in result.rejections() {
                    summary.rejections.push(RejectionRecord {
                        patch_file: patch.patch_filename.clone(),
                        rejection: rejection.clone(),
                    });
                }
            }
            PatchOutcome::AlreadyApplied => {
                info!("{} was already applied", patch.patch_filename);
            }
            PatchOutcome::Failed(cause) => {
                if series.len() > 1 {
                    print_sequence_error(patch, &cause);
                    failed = Some(patch);
                    summary.errors.push(format!(
                        "Failed to apply {}: {}",
                        patch.patch_filename, cause
                    ));
                    break;
                }
                let hint = if installed.version == patch.version {
                    "The patch file may be broken, or the package files were changed after installation."
                } else {
                    "The patch was made for a different version of the package."
                };
                return Err(anyhow!(
                    "Failed to apply patch for package {} at path {}\n\n  {}\n\n  {}\n\n  \
                     Patch file: {}\n  Patch was made for version: {}\n  Installed version: {}",
                    package.path_specifier,
                    patch.package.path.display(),
                    cause,
                    hint,
                    project.display_patch_path(&patch.patch_filename),
                    patch.version,
                    installed.version
                ));
            }
        }

        if installed.version != patch.version {
            summary.warnings.push(format!(
                "Patch file {} was made for {}@{} but {} is installed",
                patch.patch_filename, package.path_specifier, patch.version, installed.version
            ));
        }
        println!(
            "{} {} {}",
            package.path_specifier,
            patch.patch_filename,
            if settings.reverse { "un-applied" } else { "applied" }
        );
        summary.applied.push(patch.patch_filename.clone());
        processed.push(patch);
    }

    if series.len() < 2 {
        return Ok(());
    }

    if settings.reverse {
        let state = match state {
            Some(state) => state,
            None => return Ok(()),
        };
        if processed.len() == already {
            project.store.clear(&key)?;
        } else if !processed.is_empty() {
            let remaining = already - processed.len();
            let patches = series[..remaining]
                .iter()
                .map(|p| project.record(p, true))
                .collect::<Result<Vec<_>, _>>()?;
            project
                .store
                .save(&key, &SeriesState::new(patches, state.is_rebasing))?;
        }
    } else {
        let mut patches = series[..already]
            .iter()
            .chain(processed.iter().copied())
            .map(|p| project.record(p, true))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(failed) = failed {
            patches.push(project.record(failed, false)?);
        }
        project
            .store
            .save(&key, &SeriesState::new(patches, failed.is_some()))?;
    }
    Ok(())
}
