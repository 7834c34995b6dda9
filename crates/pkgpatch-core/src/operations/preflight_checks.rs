use crate::error::{PatchError, PatchResult};
use crate::matcher::find_hunk_position;
use crate::operations::file_operations::{
    disk_mode, file_exists, read_file_content, remove_file, set_file_mode, write_file_content,
    FileContent,
};
use crate::operations::patch_applicator::{
    ApplyResult, FileReport, HunkReport, HunkStatus, Rejection,
};
use crate::types::{ChangeKind, FileDiff, FileMode, Hunk, HunkLine, ParsedPatch};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct PlannedFile {
    content: String,
    mode: Option<FileMode>,
}

/// In-memory view of the target tree. Every change a patch makes lands here
/// first; nothing touches the disk until `commit`.
#[derive(Debug)]
pub struct PlannedTree {
    root: PathBuf,
    files: BTreeMap<PathBuf, Option<PlannedFile>>,
}

impl PlannedTree {
    pub fn new(root: &Path) -> Self {
        PlannedTree {
            root: root.to_path_buf(),
            files: BTreeMap::new(),
        }
    }

    fn exists(&self, rel: &Path) -> bool {
        match self.files.get(rel) {
            Some(entry) => entry.is_some(),
            None => file_exists(&self.root.join(rel)),
        }
    }

    fn read(&self, rel: &Path) -> PatchResult<Option<String>> {
        match self.files.get(rel) {
            Some(entry) => Ok(entry.as_ref().map(|f| f.content.clone())),
            None => {
                let path = self.root.join(rel);
                if path.is_file() {
                    read_file_content(&path).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn mode(&self, rel: &Path) -> Option<FileMode> {
        match self.files.get(rel) {
            Some(Some(file)) if file.mode.is_some() => file.mode,
            _ => disk_mode(&self.root.join(rel)),
        }
    }

    fn write(&mut self, rel: &Path, content: String, mode: Option<FileMode>) {
        self.files
            .insert(rel.to_path_buf(), Some(PlannedFile { content, mode }));
    }

    fn remove(&mut self, rel: &Path) {
        self.files.insert(rel.to_path_buf(), None);
    }

    pub fn touched_paths(&self) -> Vec<&Path> {
        self.files.keys().map(PathBuf::as_path).collect()
    }

    pub fn commit(self) -> PatchResult<()> {
        for (rel, entry) in &self.files {
            if entry.is_none() {
                let path = self.root.join(rel);
                if file_exists(&path) {
                    debug!("Removing {:?}", path);
                    remove_file(&path)?;
                }
            }
        }

        for (rel, entry) in &self.files {
            if let Some(file) = entry {
                let path = self.root.join(rel);
                debug!("Writing {:?}", path);
                write_file_content(&path, &file.content)?;
                if let Some(mode) = file.mode {
                    set_file_mode(&path, mode)?;
                }
            }
        }
        Ok(())
    }
}

pub struct Plan {
    pub tree: PlannedTree,
    pub result: ApplyResult,
}

/// Works out every file's new content without writing anything. In normal
/// mode the first problem is returned as an error; in best-effort mode
/// problems become rejections and the rest of the patch still goes through.
pub fn run_preflight_checks(
    patch: &ParsedPatch,
    target_root: &Path,
    best_effort: bool,
) -> PatchResult<Plan> {
    let mut tree = PlannedTree::new(target_root);
    let mut files = Vec::new();

    for diff in &patch.files {
        let report = match plan_file(&mut tree, diff, best_effort) {
            Ok(report) => report,
            Err(err @ PatchError::TargetConflict { .. }) if best_effort => {
                warn!("Skipping {:?}: {}", diff.display_path(), err);
                FileReport {
                    path: diff.display_path().to_path_buf(),
                    kind: diff.kind,
                    hunks: Vec::new(),
                    rejections: vec![Rejection {
                        file: diff.display_path().to_path_buf(),
                        hunk: None,
                        header: None,
                        reason: err.to_string(),
                        text: String::new(),
                    }],
                }
            }
            Err(err) => return Err(err),
        };
        files.push(report);
    }

    Ok(Plan {
        tree,
        result: ApplyResult { files },
    })
}

fn plan_file(tree: &mut PlannedTree, diff: &FileDiff, best_effort: bool) -> PatchResult<FileReport> {
    let mut report = FileReport {
        path: diff.display_path().to_path_buf(),
        kind: diff.kind,
        hunks: Vec::new(),
        rejections: Vec::new(),
    };

    match diff.kind {
        ChangeKind::Create => {
            let path = required_path(diff.new_path.as_deref(), diff)?;
            if tree.exists(path) {
                return Err(conflict(path, "trying to create a file that already exists"));
            }
            let lines: Vec<String> = diff
                .hunks
                .iter()
                .flat_map(|h| h.new_lines())
                .map(str::to_string)
                .collect();
            let content = FileContent {
                lines,
                trailing_newline: !diff.new_missing_newline,
            };
            tree.write(path, content.render(), diff.mode);
            report.hunks = diff
                .hunks
                .iter()
                .enumerate()
                .map(|(i, h)| HunkReport {
                    index: i + 1,
                    header: h.header(),
                    status: HunkStatus::Exact,
                })
                .collect();
        }
        ChangeKind::Delete => {
            let path = required_path(diff.old_path.as_deref(), diff)?;
            if !tree.exists(path) {
                return Err(conflict(path, "trying to delete a file that doesn't exist"));
            }
            tree.remove(path);
        }
        ChangeKind::Modify | ChangeKind::Rename => {
            let src = required_path(diff.old_path.as_deref(), diff)?;
            let dst = required_path(diff.new_path.as_deref(), diff)?;
            let original = match tree.read(src)? {
                Some(content) => content,
                None => return Err(conflict(src, "trying to modify a file that doesn't exist")),
            };
            if diff.kind == ChangeKind::Rename && tree.exists(dst) {
                return Err(conflict(dst, "rename target already exists"));
            }

            let content = if diff.hunks.is_empty() {
                original
            } else {
                let (content, hunks, rejections) = apply_hunks(&original, diff, src, best_effort)?;
                report.hunks = hunks;
                report.rejections = rejections;
                content
            };

            let mode = match diff.mode_change {
                Some(change) => Some(change.new),
                None if diff.kind == ChangeKind::Rename => tree.mode(src),
                None => None,
            };

            if diff.kind == ChangeKind::Rename {
                tree.remove(src);
            }
            tree.write(dst, content, mode);
        }
    }

    Ok(report)
}

fn uses_crlf(lines: &[String], pos: usize, len: usize) -> bool {
    let neighbour = match lines[pos..pos + len].first() {
        Some(line) => Some(line),
        None => lines.get(pos.saturating_sub(1)).or_else(|| lines.get(pos)),
    };
    neighbour.map_or(false, |line| line.ends_with('\r'))
}

/// The new side of `hunk` as it should land at `pos`. Context lines keep the
/// target's own text, since matching ignores trailing whitespace; added lines
/// take the target's line ending.
fn replacement(lines: &[String], pos: usize, len: usize, hunk: &Hunk) -> Vec<String> {
    let crlf = uses_crlf(lines, pos, len);
    let mut cursor = pos;
    let mut out = Vec::with_capacity(hunk.new_len);
    for line in &hunk.lines {
        match line {
            HunkLine::Context(_) => {
                out.push(lines[cursor].clone());
                cursor += 1;
            }
            HunkLine::Remove(_) => cursor += 1,
            HunkLine::Add(text) if crlf && !text.ends_with('\r') => {
                out.push(format!("{}\r", text));
            }
            HunkLine::Add(text) => out.push(text.clone()),
        }
    }
    out
}

/// Places every hunk against the original lines (exact first, then within
/// the fuzz window), then splices the new lines in. The offset a hunk landed
/// at carries over to the expected position of the next one.
pub fn apply_hunks(
    original: &str,
    diff: &FileDiff,
    path: &Path,
    best_effort: bool,
) -> PatchResult<(String, Vec<HunkReport>, Vec<Rejection>)> {
    let file = FileContent::parse(original);
    let mut placements: Vec<(usize, usize, Vec<String>)> = Vec::new();
    let mut reports = Vec::new();
    let mut rejections = Vec::new();
    let mut drift: isize = 0;
    let mut min_start = 0;
    let mut final_hunk_applied = false;
    let last = diff.hunks.len().saturating_sub(1);

    for (i, hunk) in diff.hunks.iter().enumerate() {
        let pattern = hunk.old_lines();
        let declared = hunk.expected_index() as isize;

        match find_hunk_position(&file.lines, &pattern, declared + drift, min_start) {
            Some(pos) => {
                let offset = pos as isize - declared;
                drift = offset;
                min_start = pos + pattern.len();
                let new_lines = replacement(&file.lines, pos, pattern.len(), hunk);
                placements.push((pos, pattern.len(), new_lines));

                let status = if offset == 0 {
                    HunkStatus::Exact
                } else {
                    warn!(
                        "Hunk #{} of {:?} applied with offset {}",
                        i + 1,
                        path,
                        offset
                    );
                    HunkStatus::Fuzzed { offset }
                };
                reports.push(HunkReport {
                    index: i + 1,
                    header: hunk.header(),
                    status,
                });
                if i == last {
                    final_hunk_applied = true;
                }
            }
            None => {
                if !best_effort {
                    return Err(PatchError::HunkApplicationFailure {
                        path: path.to_path_buf(),
                        hunk: i + 1,
                        hunk_text: hunk.to_string(),
                    });
                }
                warn!("Hunk #{} of {:?} failed to apply", i + 1, path);
                reports.push(HunkReport {
                    index: i + 1,
                    header: hunk.header(),
                    status: HunkStatus::Failed,
                });
                rejections.push(Rejection {
                    file: path.to_path_buf(),
                    hunk: Some(i + 1),
                    header: Some(hunk.header()),
                    reason: "context not found within the fuzz window".to_string(),
                    text: hunk.to_string(),
                });
            }
        }
    }

    let mut lines = file.lines;
    let mut delta: isize = 0;
    for (pos, old_len, new_lines) in placements {
        let at = (pos as isize + delta) as usize;
        let inserted = new_lines.len();
        lines.splice(at..at + old_len, new_lines);
        delta += inserted as isize - old_len as isize;
    }

    let mut trailing_newline = file.trailing_newline;
    if final_hunk_applied {
        if diff.new_missing_newline {
            trailing_newline = false;
        } else if diff.old_missing_newline {
            trailing_newline = true;
        }
    }

    let content = FileContent {
        lines,
        trailing_newline,
    };
    Ok((content.render(), reports, rejections))
}

fn required_path<'a>(path: Option<&'a Path>, diff: &FileDiff) -> PatchResult<&'a Path> {
    path.ok_or_else(|| {
        PatchError::malformed(
            format!("{:?} change without a path", diff.kind),
            diff.display_path().display().to_string(),
        )
    })
}

fn conflict(path: &Path, reason: &str) -> PatchError {
    PatchError::TargetConflict {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
