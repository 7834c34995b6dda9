use crate::error::PatchResult;
use crate::operations::preflight_checks::run_preflight_checks;
use crate::types::{ChangeKind, ParsedPatch};
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub reverse: bool,
    pub best_effort: bool,
    /// Plan every change but leave the disk alone.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkStatus {
    Exact,
    Fuzzed { offset: isize },
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HunkReport {
    pub index: usize,
    pub header: String,
    pub status: HunkStatus,
}

/// A hunk (or a whole file, when `hunk` is `None`) that best-effort mode
/// skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub file: PathBuf,
    pub hunk: Option<usize>,
    pub header: Option<String>,
    pub reason: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub hunks: Vec<HunkReport>,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    pub files: Vec<FileReport>,
}

impl ApplyResult {
    pub fn fuzzed(&self) -> impl Iterator<Item = (&Path, &HunkReport)> {
        self.files.iter().flat_map(|f| {
            f.hunks
                .iter()
                .filter(|h| matches!(h.status, HunkStatus::Fuzzed { .. }))
                .map(move |h| (f.path.as_path(), h))
        })
    }

    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.files.iter().flat_map(|f| f.rejections.iter())
    }

    /// Every hunk matched exactly and nothing was rejected.
    pub fn is_clean(&self) -> bool {
        self.fuzzed().next().is_none() && self.rejections().next().is_none()
    }
}

/// Applies `patch` to the tree under `target_root`. All changes are planned
/// in memory before anything is written, so outside best-effort mode a
/// failing hunk leaves every file untouched.
pub fn apply_patch(
    patch: &ParsedPatch,
    target_root: &Path,
    options: ApplyOptions,
) -> PatchResult<ApplyResult> {
    let reversed;
    let patch = if options.reverse {
        reversed = patch.reversed();
        &reversed
    } else {
        patch
    };

    let plan = run_preflight_checks(patch, target_root, options.best_effort)?;

    if options.dry_run {
        debug!("Dry run: {} file(s) would change", plan.tree.touched_paths().len());
    } else {
        plan.tree.commit()?;
        info!(
            "{} {} file(s) under {:?}",
            if options.reverse { "Reverted" } else { "Patched" },
            plan.result.files.len(),
            target_root
        );
    }

    Ok(plan.result)
}
