use crate::catalog::scan;
use crate::error::PatchError;
use crate::filter::{remove_ignored_files, PathFilter};
use crate::operations::file_operations::{copy_dir_all, remove_dir_if_exists};
use crate::package_details::{
    create_manual_patch_file_name, create_patch_file_name, sanitize_sequence_name, PackageDetails,
    PatchedPackageDetails,
};
use crate::parser::parse;
use crate::resolver::PackageManifest;
use crate::state::{verify_applied_patches, PatchState, SeriesState};
use crate::workflow::report::{write_error_diagnostic, ERROR_DIAGNOSTIC_FILE};
use crate::workflow::{apply_patch_file, print_sequence_error, Collaborators, PatchOutcome, Project};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MANUAL_PATCH_DIR: &str = "manually-applied-patches";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateMode {
    /// Replace the last patch of the series (or create the first one).
    OverwriteLast,
    /// Add a new patch after the last applied one.
    Append { name: Option<String> },
}

impl CreateMode {
    fn is_append(&self) -> bool {
        matches!(self, CreateMode::Append { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MakePatchOptions {
    pub mode: CreateMode,
    pub filter: PathFilter,
    /// Diff a package copy outside `node_modules` into a `.manualpatch` file.
    pub manual_target_dir: Option<PathBuf>,
}

/// Which patches must be replayed onto the clean copy before diffing.
fn patches_before_diffing(
    existing: &[PatchedPackageDetails],
    state: Option<&SeriesState>,
    mode: &CreateMode,
) -> Vec<PatchedPackageDetails> {
    let end = match state.filter(|s| s.is_rebasing) {
        Some(state) => {
            let applied = state.applied_count();
            let last_applied = state.patches.last().map_or(false, |p| p.did_apply);
            if mode.is_append() || !last_applied {
                applied
            } else {
                applied.saturating_sub(1)
            }
        }
        None if mode.is_append() => existing.len(),
        None => existing.len().saturating_sub(1),
    };
    existing[..end.min(existing.len())].to_vec()
}

fn strip_package_extras(dir: &Path, filter: &PathFilter) -> Result<()> {
    remove_dir_if_exists(&dir.join("node_modules"))?;
    remove_dir_if_exists(&dir.join(".git"))?;
    remove_ignored_files(dir, filter)
}

fn symlink_advice(cause: &PatchError) -> anyhow::Error {
    anyhow!(
        "{}\n\n  Your changes involve creating symlinks, which are not supported.\n\n  \
         Please use --include and/or --exclude to narrow the scope of your patch if\n  \
         this was unintentional.",
        cause
    )
}

struct Target {
    package: PackageDetails,
    version: String,
    dir: PathBuf,
}

fn manual_target(project: &Project, target_dir: &Path) -> Result<Target> {
    let dir = project.app_root.join(target_dir);
    let manifest_path = dir.join("package.json");
    if !manifest_path.is_file() {
        bail!("No package.json found at {:?}", manifest_path);
    }
    let manifest = PackageManifest::read(&manifest_path)?;
    let name = manifest
        .name
        .filter(|n| !n.is_empty())
        .with_context(|| format!("No \"name\" field in {:?}", manifest_path))?;
    let version = manifest
        .version
        .with_context(|| format!("No \"version\" field in {:?}", manifest_path))?;
    let package = PackageDetails::from_cli_specifier(&name)
        .with_context(|| format!("Invalid package name {:?} in {:?}", name, manifest_path))?;
    Ok(Target {
        package,
        version,
        dir,
    })
}

/// Builds the diff between the published package (plus `replay`) and the
/// user's copy. The scratch directory is removed when this returns.
fn produce_diff(
    project: &Project,
    tools: &Collaborators,
    target: &Target,
    replay: &[PatchedPackageDetails],
    filter: &PathFilter,
) -> Result<String> {
    let scratch = TempDir::new().context("Failed to create temporary folder")?;
    info!("Created temporary folder {:?}", scratch.path());

    let clean_root = scratch.path().join("clean");
    let clean_dir = clean_root.join(&target.package.path);
    fs::create_dir_all(&clean_dir)
        .with_context(|| format!("Failed to create {:?}", clean_dir))?;

    println!("Fetching {}@{}", target.package.name, target.version);
    tools
        .fetcher
        .fetch(&target.package, &target.version, &clean_dir)?;
    strip_package_extras(&clean_dir, filter)?;

    for patch in replay {
        let outcome = apply_patch_file(
            &project.patch_path(&patch.patch_filename),
            &clean_root,
            false,
            false,
        )?;
        if let PatchOutcome::Failed(cause) = outcome {
            bail!(
                "Failed to apply patch {} to {}: {}",
                patch.patch_filename,
                target.package.path_specifier,
                cause
            );
        }
        debug!("Replayed {} onto the clean copy", patch.patch_filename);
    }

    let modified_dir = scratch.path().join("modified").join(&target.package.path);
    copy_dir_all(&target.dir, &modified_dir, |rel| {
        rel.starts_with("node_modules") || rel.starts_with(".git")
    })?;
    strip_package_extras(&modified_dir, filter)?;

    println!("Diffing your files with clean files");
    tools
        .differ
        .diff(&clean_dir, &modified_dir, &target.package.path)
}

fn check_diff(project: &Project, diff: &str) -> Result<()> {
    match parse(diff) {
        Ok(_) => Ok(()),
        Err(err @ PatchError::UnsupportedChangeKind { .. }) => Err(symlink_advice(&err)),
        Err(err) => {
            let out = project.app_root.join(ERROR_DIAGNOSTIC_FILE);
            write_error_diagnostic(&out, &err.to_string(), diff)?;
            Err(anyhow!(
                "{}\n\n  pkgpatch was unable to read the diff it produced. This should not happen.\n\n  \
                 A diagnostic file was written to\n\n    ./{}\n\n  \
                 Note that this diagnostic file will contain code from the package you were\n  \
                 attempting to patch.",
                err,
                ERROR_DIAGNOSTIC_FILE
            ))
        }
    }
}

fn rename_patch(project: &Project, old_filename: &str, new_file_name: &str) -> Result<String> {
    let new_filename = match old_filename.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, new_file_name),
        None => new_file_name.to_string(),
    };
    let from = project.patch_path(old_filename);
    let to = project.patch_path(&new_filename);
    fs::rename(&from, &to).with_context(|| format!("Failed to rename {:?} to {:?}", from, to))?;
    Ok(new_filename)
}

/// Creates or updates a patch file for one package and keeps the series and
/// its state consistent. Returns the path of the written patch file.
pub fn make_patch(
    project: &Project,
    tools: &Collaborators,
    specifier: &str,
    options: &MakePatchOptions,
) -> Result<PathBuf> {
    if let Some(target_dir) = &options.manual_target_dir {
        return make_manual_patch(project, tools, target_dir, &options.filter);
    }

    let package = PackageDetails::from_cli_specifier(specifier)
        .ok_or_else(|| anyhow!("No such package {}", specifier))?;
    let key = project.state_key(&package);
    let _lock = project.store.lock(&key)?;

    let state = project.store.load(&key)?;
    let is_rebasing = state.as_ref().map_or(false, |s| s.is_rebasing);
    let mut mode = options.mode.clone();

    if let Some(state) = state.as_ref().filter(|s| s.is_rebasing) {
        // Nothing is applied, so there is nothing to overwrite.
        if state.applied_count() == 0 && mode == CreateMode::OverwriteLast {
            mode = CreateMode::Append {
                name: Some("initial".to_string()),
            };
        }
        verify_applied_patches(&project.patch_dir_path(), state)?;
    }

    let catalog = scan(&project.patch_dir_path())?;
    let mut existing = catalog.series_for(&package.path_specifier).to_vec();
    let mut replay = patches_before_diffing(&existing, state.as_ref(), &mode);
    let patches_after_create = if mode.is_append() || existing.is_empty() {
        existing.len() + 1
    } else {
        existing.len()
    };

    let installed = tools.resolver.resolve(&package)?.ok_or_else(|| {
        anyhow!(
            "No such package {}\n\n  File not found: {}",
            specifier,
            package.path.join("package.json").display()
        )
    })?;
    let target = Target {
        package: package.clone(),
        version: installed.version.clone(),
        dir: installed.dir.clone(),
    };

    let diff = produce_diff(project, tools, &target, &replay, &options.filter)?;
    if diff.is_empty() {
        let mut message = format!(
            "Not creating patch file for package '{}'\nThere don't appear to be any changes.",
            specifier
        );
        if is_rebasing && mode == CreateMode::OverwriteLast {
            message.push_str(
                "\n\nTo remove a patch file, delete it and then reinstall node_modules from scratch.",
            );
        }
        bail!(message);
    }
    check_diff(project, &diff)?;

    let version = installed.version;

    // A lone unnumbered patch becomes the first of a numbered series.
    if mode.is_append() && !is_rebasing && existing.len() == 1 && existing[0].sequence_number.is_none() {
        let prev = &mut existing[0];
        let name = prev
            .sequence_name
            .clone()
            .unwrap_or_else(|| "initial".to_string());
        let file_name = create_patch_file_name(&package, &version, Some(1), Some(&name));
        let old_filename = prev.patch_filename.clone();
        prev.patch_filename = rename_patch(project, &old_filename, &file_name)?;
        prev.sequence_number = Some(1);
        prev.sequence_name = Some(name);
        for replayed in replay.iter_mut().filter(|p| p.patch_filename == old_filename) {
            *replayed = prev.clone();
        }
        println!("Renamed existing patch to {}", project.display_patch_path(&file_name));
    }

    let last_index = match &state {
        Some(state) => state.patches.len().checked_sub(1),
        None => existing.len().checked_sub(1),
    };
    let last_patch = last_index.and_then(|i| existing.get(i)).cloned();

    let (sequence_number, sequence_name) = match &mode {
        CreateMode::Append { name } => (
            Some(last_patch.as_ref().and_then(|p| p.sequence_number).unwrap_or(0) + 1),
            name.as_deref().and_then(sanitize_sequence_name),
        ),
        CreateMode::OverwriteLast => (
            last_patch.as_ref().and_then(|p| p.sequence_number),
            last_patch.as_ref().and_then(|p| p.sequence_name.clone()),
        ),
    };
    let patch_file_name =
        create_patch_file_name(&package, &version, sequence_number, sequence_name.as_deref());

    let patch_dir = project.patch_dir_path();
    fs::create_dir_all(&patch_dir).with_context(|| format!("Failed to create {:?}", patch_dir))?;

    if mode == CreateMode::OverwriteLast {
        if let Some(last) = last_patch.as_ref().filter(|p| p.patch_filename != patch_file_name) {
            let stale = project.patch_path(&last.patch_filename);
            fs::remove_file(&stale).with_context(|| format!("Failed to remove {:?}", stale))?;
            println!("Deleted {}", project.display_patch_path(&last.patch_filename));
        }
    }

    if is_rebasing && mode.is_append() {
        let applied = state.as_ref().map_or(0, |s| s.patches.len());
        let sequence_number = sequence_number
            .ok_or_else(|| anyhow!("sequence number is missing while rebasing"))?;
        let to_nudge = &existing[applied.min(existing.len())..];
        let collides = to_nudge
            .first()
            .and_then(|p| p.sequence_number)
            .map_or(false, |n| n <= sequence_number);
        if collides {
            // Last first, so no rename lands on a file that has not moved yet.
            for (offset, patch) in to_nudge.iter().enumerate().rev() {
                let new_name = create_patch_file_name(
                    &package,
                    &version,
                    Some(sequence_number + 1 + offset as u32),
                    patch.sequence_name.as_deref(),
                );
                println!("Renaming {} to {}", patch.patch_filename, new_name);
                rename_patch(project, &patch.patch_filename, &new_name)?;
            }
        }
    }

    let patch_path = project.patch_path(&patch_file_name);
    fs::write(&patch_path, &diff).with_context(|| format!("Failed to write {:?}", patch_path))?;
    println!("Created file {}", project.display_patch_path(&patch_file_name));

    let mut next_state = replay
        .iter()
        .map(|p| project.record(p, true))
        .collect::<Result<Vec<PatchState>, _>>()?;
    let created = PatchedPackageDetails::from_patch_filename(&patch_file_name)
        .ok_or_else(|| anyhow!("Created an unparseable patch file name {}", patch_file_name))?;
    next_state.push(project.record(&created, true)?);

    let mut failed_while_finishing = None;
    if is_rebasing {
        let current = scan(&patch_dir)?;
        let later = current
            .series_for(&package.path_specifier)
            .iter()
            .skip(next_state.len())
            .cloned()
            .collect::<Vec<_>>();
        if !later.is_empty() {
            println!("Fast forwarding...");
        }
        for patch in &later {
            let outcome = apply_patch_file(
                &project.patch_path(&patch.patch_filename),
                &project.app_root,
                false,
                false,
            )?;
            if let PatchOutcome::Failed(cause) = outcome {
                print_sequence_error(patch, &cause);
                next_state.push(project.record(patch, false)?);
                failed_while_finishing = Some(patch.patch_filename.clone());
                break;
            }
            println!("  {}", patch.patch_filename);
            next_state.push(project.record(patch, true)?);
        }
    }

    if is_rebasing || patches_after_create > 1 {
        project.store.save(
            &key,
            &SeriesState::new(next_state, failed_while_finishing.is_some()),
        )?;
    } else {
        project.store.clear(&key)?;
    }

    if let Some(patch_filename) = failed_while_finishing {
        return Err(PatchError::RebaseIncomplete { patch_filename }.into());
    }
    Ok(patch_path)
}

fn make_manual_patch(
    project: &Project,
    tools: &Collaborators,
    target_dir: &Path,
    filter: &PathFilter,
) -> Result<PathBuf> {
    let target = manual_target(project, target_dir)?;
    let diff = produce_diff(project, tools, &target, &[], filter)?;
    if diff.is_empty() {
        bail!(
            "Not creating patch file for {}\nThere don't appear to be any changes.",
            target_dir.display()
        );
    }
    check_diff(project, &diff)?;

    let file_name = create_manual_patch_file_name(&target.package.name, &target.version);
    let out_dir = project.patch_dir_path().join(MANUAL_PATCH_DIR);
    fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;
    let patch_path = out_dir.join(&file_name);
    fs::write(&patch_path, &diff).with_context(|| format!("Failed to write {:?}", patch_path))?;
    println!(
        "Created file {}",
        project.display_patch_path(&format!("{}/{}", MANUAL_PATCH_DIR, file_name))
    );
    Ok(patch_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PatchState;

    fn series(names: &[&str]) -> Vec<PatchedPackageDetails> {
        names
            .iter()
            .map(|n| PatchedPackageDetails::from_patch_filename(n).unwrap())
            .collect()
    }

    fn state(applied: &[bool], is_rebasing: bool) -> SeriesState {
        SeriesState::new(
            applied
                .iter()
                .enumerate()
                .map(|(i, did_apply)| PatchState {
                    patch_filename: format!("p{}", i),
                    did_apply: *did_apply,
                    patch_content_hash: String::new(),
                })
                .collect(),
            is_rebasing,
        )
    }

    fn names(patches: Vec<PatchedPackageDetails>) -> Vec<Option<u32>> {
        patches.into_iter().map(|p| p.sequence_number).collect()
    }

    #[test]
    fn test_replay_without_rebase() {
        let existing = series(&["a+1.0.0+001.patch", "a+1.0.0+002.patch", "a+1.0.0+003.patch"]);
        let append = CreateMode::Append { name: None };

        assert_eq!(
            names(patches_before_diffing(&existing, None, &append)),
            vec![Some(1), Some(2), Some(3)]
        );
        assert_eq!(
            names(patches_before_diffing(&existing, None, &CreateMode::OverwriteLast)),
            vec![Some(1), Some(2)]
        );
        assert!(patches_before_diffing(&[], None, &CreateMode::OverwriteLast).is_empty());
    }

    #[test]
    fn test_replay_while_rebasing() {
        let existing = series(&["a+1.0.0+001.patch", "a+1.0.0+002.patch", "a+1.0.0+003.patch"]);
        let append = CreateMode::Append { name: None };
        let rebasing = state(&[true, true], true);

        assert_eq!(
            names(patches_before_diffing(&existing, Some(&rebasing), &append)),
            vec![Some(1), Some(2)]
        );
        assert_eq!(
            names(patches_before_diffing(&existing, Some(&rebasing), &CreateMode::OverwriteLast)),
            vec![Some(1)]
        );

        let halted = state(&[true, false], true);
        assert_eq!(
            names(patches_before_diffing(&existing, Some(&halted), &CreateMode::OverwriteLast)),
            vec![Some(1)]
        );
    }

    #[test]
    fn test_tracked_state_is_not_rebasing() {
        let existing = series(&["a+1.0.0+001.patch", "a+1.0.0+002.patch"]);
        let tracked = state(&[true, true], false);
        assert_eq!(
            names(patches_before_diffing(&existing, Some(&tracked), &CreateMode::OverwriteLast)),
            vec![Some(1)]
        );
    }
}
