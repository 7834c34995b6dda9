pub mod apply_all;
pub mod make_patch;
pub mod rebase;
pub mod report;

use crate::diff_producer::DiffProducer;
use crate::error::{PatchError, PatchResult};
use crate::fetcher::PackageFetcher;
use crate::hash::hash_file;
use crate::operations::file_operations::read_file_content;
use crate::operations::{apply_patch, ApplyOptions, ApplyResult};
use crate::package_details::{PackageDetails, PatchedPackageDetails};
use crate::parser::parse;
use crate::resolver::PackageResolver;
use crate::state::{state_key, PatchState, StateStore};
use log::debug;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATCH_DIR: &str = "patches";
pub const DEFAULT_STATE_DIR: &str = "node_modules/.pkgpatch-state";

/// Where a project keeps its patches and its series state.
#[derive(Debug, Clone)]
pub struct Project {
    pub app_root: PathBuf,
    /// Relative to `app_root`, `/`-separated.
    pub patch_dir: String,
    pub store: StateStore,
}

impl Project {
    pub fn new(app_root: impl Into<PathBuf>, patch_dir: &str, state_dir: &Path) -> Self {
        let app_root = app_root.into();
        let store = StateStore::new(app_root.join(state_dir));
        Project {
            app_root,
            patch_dir: patch_dir.trim_end_matches('/').to_string(),
            store,
        }
    }

    pub fn patch_dir_path(&self) -> PathBuf {
        self.app_root.join(&self.patch_dir)
    }

    pub fn patch_path(&self, patch_filename: &str) -> PathBuf {
        self.patch_dir_path().join(patch_filename)
    }

    /// The patch path as shown to the user, e.g. `patches/left-pad+1.3.0.patch`.
    pub fn display_patch_path(&self, patch_filename: &str) -> String {
        format!("{}/{}", self.patch_dir, patch_filename)
    }

    pub fn state_key(&self, package: &PackageDetails) -> String {
        state_key(&self.patch_dir, &package.path_specifier)
    }

    pub fn record(&self, patch: &PatchedPackageDetails, did_apply: bool) -> PatchResult<PatchState> {
        Ok(PatchState {
            patch_filename: patch.patch_filename.clone(),
            did_apply,
            patch_content_hash: hash_file(&self.patch_path(&patch.patch_filename))?,
        })
    }
}

/// The pluggable parts of patch creation.
pub struct Collaborators<'a> {
    pub resolver: &'a dyn PackageResolver,
    pub fetcher: &'a dyn PackageFetcher,
    pub differ: &'a dyn DiffProducer,
}

#[derive(Debug)]
pub enum PatchOutcome {
    Applied(ApplyResult),
    /// The patch did not apply but its reverse does, so the tree already
    /// carries it.
    AlreadyApplied,
    Failed(PatchError),
}

impl PatchOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, PatchOutcome::Failed(_))
    }
}

/// Reads, parses and applies one patch file to `target_root`. A patch that
/// only fails because it is already in place counts as success.
pub fn apply_patch_file(
    patch_path: &Path,
    target_root: &Path,
    reverse: bool,
    best_effort: bool,
) -> PatchResult<PatchOutcome> {
    let content = read_file_content(patch_path)?;
    let patch = parse(&content)?;

    let options = ApplyOptions {
        reverse,
        best_effort,
        dry_run: false,
    };
    match apply_patch(&patch, target_root, options) {
        Ok(result) => Ok(PatchOutcome::Applied(result)),
        Err(err @ PatchError::HunkApplicationFailure { .. })
        | Err(err @ PatchError::TargetConflict { .. }) => {
            let undo = ApplyOptions {
                reverse: !reverse,
                best_effort: false,
                dry_run: true,
            };
            if apply_patch(&patch, target_root, undo).is_ok() {
                debug!("{:?} is already applied", patch_path);
                Ok(PatchOutcome::AlreadyApplied)
            } else {
                Ok(PatchOutcome::Failed(err))
            }
        }
        Err(err) => Err(err),
    }
}

pub(crate) fn print_sequence_error(patch: &PatchedPackageDetails, cause: &PatchError) {
    println!(
        "\nERROR Failed to apply patch file {}.\n\n  {}\n\n\
         If this patch file is no longer useful, delete it and run\n\n    pkgpatch\n\n\
         To partially apply the patch (if possible) and output a log of errors to fix, run\n\n    pkgpatch --partial\n\n\
         After which you should make any required changes inside {}, and finally run\n\n    pkgpatch {}\n\n\
         to update the patch file.\n",
        patch.patch_filename,
        cause,
        patch.package.path.display(),
        patch.package.path_specifier
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PATCH: &str = "--- a/node_modules/p/index.js\n+++ b/node_modules/p/index.js\n@@ -1 +1 @@\n-a\n+b\n";

    #[test]
    fn test_apply_patch_file_detects_already_applied() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/p")).unwrap();
        fs::write(dir.path().join("node_modules/p/index.js"), "a\n").unwrap();
        fs::write(dir.path().join("p+1.0.0.patch"), PATCH).unwrap();
        let patch_path = dir.path().join("p+1.0.0.patch");

        let first = apply_patch_file(&patch_path, dir.path(), false, false).unwrap();
        assert!(matches!(first, PatchOutcome::Applied(_)));

        let second = apply_patch_file(&patch_path, dir.path(), false, false).unwrap();
        assert!(matches!(second, PatchOutcome::AlreadyApplied));

        fs::write(dir.path().join("node_modules/p/index.js"), "c\n").unwrap();
        let third = apply_patch_file(&patch_path, dir.path(), false, false).unwrap();
        assert!(!third.is_success());
    }

    #[test]
    fn test_project_paths() {
        let project = Project::new("/app", "patches/", Path::new(DEFAULT_STATE_DIR));
        assert_eq!(project.patch_dir, "patches");
        assert_eq!(
            project.patch_path("a+1.0.0.patch"),
            PathBuf::from("/app/patches/a+1.0.0.patch")
        );
        assert_eq!(project.store.dir(), Path::new("/app/node_modules/.pkgpatch-state"));
        let package = PackageDetails::from_cli_specifier("@s/p").unwrap();
        assert_eq!(project.state_key(&package), "patches--@s+p");
    }
}
