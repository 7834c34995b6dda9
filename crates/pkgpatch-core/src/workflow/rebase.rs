use crate::catalog::scan;
use crate::package_details::{PackageDetails, PatchedPackageDetails};
use crate::state::{verify_applied_patches, PatchState, SeriesState};
use crate::workflow::{apply_patch_file, PatchOutcome, Project};
use anyhow::{anyhow, bail, Result};
use log::info;
use std::path::Path;

/// Finds the patch a rebase target names: a file name, a path to the file, a
/// sequence name or a sequence number.
fn find_target(
    project: &Project,
    series: &[PatchedPackageDetails],
    target: &str,
) -> Option<usize> {
    let as_path = project.app_root.join(target);
    let by_path = as_path
        .strip_prefix(project.patch_dir_path())
        .ok()
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        });
    let number = target
        .trim_start_matches('0')
        .parse::<u32>()
        .ok()
        .filter(|_| target.chars().all(|c| c.is_ascii_digit()));

    series.iter().position(|p| {
        let file_name = Path::new(&p.patch_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        p.patch_filename == target
            || file_name.as_deref() == Some(target)
            || by_path.as_deref() == Some(p.patch_filename.as_str())
            || p.sequence_name.as_deref() == Some(target)
            || (number.is_some() && p.sequence_number == number)
    })
}

/// Un-applies `series[keep..]`, newest first. After each step the state is
/// narrowed to what is still applied, so a failure part way leaves a record
/// that matches the tree.
fn unapply(
    project: &Project,
    key: &str,
    recorded: &[PatchState],
    series: &[PatchedPackageDetails],
    keep: usize,
) -> Result<()> {
    for (index, patch) in series.iter().enumerate().skip(keep).rev() {
        let outcome = apply_patch_file(
            &project.patch_path(&patch.patch_filename),
            &project.app_root,
            true,
            false,
        )?;
        if let PatchOutcome::Failed(cause) = outcome {
            bail!(
                "Failed to un-apply patch file {}: {}",
                patch.patch_filename,
                cause
            );
        }
        project
            .store
            .save(key, &SeriesState::new(recorded[..index].to_vec(), true))?;
        println!("  Un-applied {}", patch.patch_filename);
    }
    Ok(())
}

/// Un-applies the patches after `target` so the package can be edited at that
/// point in its series, and marks the series as rebasing. `"0"` un-applies
/// everything.
pub fn rebase(project: &Project, specifier: &str, target: &str) -> Result<()> {
    let package = PackageDetails::from_cli_specifier(specifier)
        .ok_or_else(|| anyhow!("No such package {}", specifier))?;
    let key = project.state_key(&package);
    let _lock = project.store.lock(&key)?;

    let catalog = scan(&project.patch_dir_path())?;
    if catalog.is_empty() {
        bail!("No patch files found in {}", project.patch_dir);
    }
    let series = catalog.series_for(&package.path_specifier);
    if series.is_empty() {
        bail!("No patch files found for package {}", specifier);
    }

    let state = project.store.load(&key)?.ok_or_else(|| {
        anyhow!(
            "{} is not a patch series. Run pkgpatch without arguments first to apply its patches.",
            specifier
        )
    })?;
    if state.is_rebasing {
        bail!(
            "Already rebasing {}.\n\n  Make changes to the files in {} and then run `pkgpatch {} --append 'name'` \
             or `pkgpatch {}` to insert or update a patch file.",
            specifier,
            package.path.display(),
            specifier,
            specifier
        );
    }
    if state.patches.len() != series.len() || state.patches.iter().any(|p| !p.did_apply) {
        bail!(
            "Some patches for {} have not been applied.\n\n  Reinstall node_modules and run pkgpatch before rebasing.",
            specifier
        );
    }
    verify_applied_patches(&project.patch_dir_path(), &state)?;

    if target == "0" {
        println!("Un-applying all patches for {}", specifier);
        unapply(project, &key, &state.patches, series, 0)?;
        project.store.save(&key, &SeriesState::new(Vec::new(), true))?;
        println!(
            "\nMake any changes you need inside {}\n\n\
             When you are done, run\n\n    pkgpatch {} --append 'MyChangeDescription'\n\n\
             to insert a new patch file.",
            package.path.display(),
            specifier
        );
        return Ok(());
    }

    let index = find_target(project, series, target).ok_or_else(|| {
        let available = series
            .iter()
            .map(|p| format!("  {}", p.patch_filename))
            .collect::<Vec<_>>()
            .join("\n");
        anyhow!(
            "Could not find target patch file {}\n\nThe list of available patch files is:\n{}",
            target,
            available
        )
    })?;
    let chosen = &series[index];
    info!("Rebasing {} onto {}", specifier, chosen.patch_filename);

    println!("Un-applying patches after {}", chosen.patch_filename);
    unapply(project, &key, &state.patches, series, index + 1)?;

    let kept: Vec<PatchState> = state.patches[..=index].to_vec();
    project.store.save(&key, &SeriesState::new(kept, true))?;

    println!(
        "\nMake any changes you need inside {}\n\n\
         When you are done, do one of the following:\n\n  \
         To update {} run\n\n    pkgpatch {}\n\n  \
         To create a new patch file after {} run\n\n    pkgpatch {} --append 'MyChangeDescription'\n",
        package.path.display(),
        chosen.patch_filename,
        specifier,
        chosen.patch_filename,
        specifier
    );
    Ok(())
}
