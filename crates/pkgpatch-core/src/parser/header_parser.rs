use crate::error::{PatchError, PatchResult};
use crate::types::{ChangeKind, FileDiff, FileMode, Hunk, HunkLine, ModeChange};
use std::path::{Component, Path, PathBuf};

pub const DIFF_GIT_PREFIX: &str = "diff --git ";
pub const OLD_FILE_PREFIX: &str = "--- ";
pub const NEW_FILE_PREFIX: &str = "+++ ";
pub const DEV_NULL: &str = "/dev/null";

const SYMLINK_MODE: &str = "120000";
const GITLINK_MODE: &str = "160000";

#[derive(Debug, Default)]
pub struct FileHeader {
    pub git_old: Option<PathBuf>,
    pub git_new: Option<PathBuf>,
    pub minus_path: Option<Option<PathBuf>>,
    pub plus_path: Option<Option<PathBuf>>,
    pub rename_from: Option<PathBuf>,
    pub rename_to: Option<PathBuf>,
    pub old_mode: Option<FileMode>,
    pub new_mode: Option<FileMode>,
    pub new_file_mode: Option<FileMode>,
    pub deleted_file_mode: Option<FileMode>,
    pub hunks: Vec<Hunk>,
    pub old_missing_newline: bool,
    pub new_missing_newline: bool,
    pub source: String,
}

impl FileHeader {
    pub fn from_diff_git_line(line: &str) -> PatchResult<Self> {
        let mut header = FileHeader::default();
        header.record(line);
        if let Some((old, new)) = split_diff_git_paths(&line[DIFF_GIT_PREFIX.len()..]) {
            header.git_old = Some(checked_path(&old, line)?);
            header.git_new = Some(checked_path(&new, line)?);
        }
        Ok(header)
    }

    pub fn record(&mut self, line: &str) {
        self.source.push_str(line);
        self.source.push('\n');
    }

    pub fn has_file_lines(&self) -> bool {
        self.minus_path.is_some() || !self.hunks.is_empty()
    }

    /// Returns `Ok(false)` for lines that are not a recognized extended header.
    pub fn parse_extended_line(&mut self, line: &str) -> PatchResult<bool> {
        let hint = self.path_hint();

        if let Some(mode) = line.strip_prefix("old mode ") {
            self.old_mode = Some(parse_file_mode(mode, &hint)?);
        } else if let Some(mode) = line.strip_prefix("new mode ") {
            self.new_mode = Some(parse_file_mode(mode, &hint)?);
        } else if let Some(mode) = line.strip_prefix("new file mode ") {
            self.new_file_mode = Some(parse_file_mode(mode, &hint)?);
        } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
            self.deleted_file_mode = Some(parse_file_mode(mode, &hint)?);
        } else if let Some(path) = line.strip_prefix("rename from ") {
            self.rename_from = Some(checked_path(unquote(path), line)?);
        } else if let Some(path) = line.strip_prefix("rename to ") {
            self.rename_to = Some(checked_path(unquote(path), line)?);
        } else if line.starts_with("copy from ") || line.starts_with("copy to ") {
            return Err(PatchError::UnsupportedChangeKind {
                path: hint,
                reason: "file copies are not supported".to_string(),
            });
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            return Err(PatchError::UnsupportedChangeKind {
                path: hint,
                reason: "binary diffs are not supported".to_string(),
            });
        } else if line.starts_with("index ")
            || line.starts_with("similarity index ")
            || line.starts_with("dissimilarity index ")
        {
        } else {
            return Ok(false);
        }

        self.record(line);
        Ok(true)
    }

    pub fn set_minus_path(&mut self, line: &str) -> PatchResult<()> {
        self.record(line);
        self.minus_path = Some(parse_marker_path(&line[OLD_FILE_PREFIX.len()..], line)?);
        Ok(())
    }

    pub fn set_plus_path(&mut self, line: &str) -> PatchResult<()> {
        if self.minus_path.is_none() || self.plus_path.is_some() {
            return Err(PatchError::malformed(
                "'+++' line without a preceding '---' line",
                format!("{}{}\n", self.source, line),
            ));
        }
        self.record(line);
        self.plus_path = Some(parse_marker_path(&line[NEW_FILE_PREFIX.len()..], line)?);
        Ok(())
    }

    fn path_hint(&self) -> String {
        self.git_new
            .as_ref()
            .or(self.git_old.as_ref())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn finish(self) -> PatchResult<FileDiff> {
        let is_create =
            self.new_file_mode.is_some() || matches!(self.minus_path, Some(None));
        let is_delete =
            self.deleted_file_mode.is_some() || matches!(self.plus_path, Some(None));

        if is_create && is_delete {
            return Err(PatchError::malformed(
                "file is both created and deleted",
                self.source,
            ));
        }

        let old_path = if is_create {
            None
        } else {
            self.rename_from
                .clone()
                .or_else(|| self.minus_path.clone().flatten())
                .or_else(|| self.git_old.clone())
        };
        let new_path = if is_delete {
            None
        } else {
            self.rename_to
                .clone()
                .or_else(|| self.plus_path.clone().flatten())
                .or_else(|| self.git_new.clone())
        };

        let kind = match (&old_path, &new_path) {
            (None, Some(_)) => ChangeKind::Create,
            (Some(_), None) => ChangeKind::Delete,
            (Some(old), Some(new)) if old != new => ChangeKind::Rename,
            (Some(_), Some(_)) => ChangeKind::Modify,
            (None, None) => {
                return Err(PatchError::malformed(
                    "file header does not name a file",
                    self.source,
                ))
            }
        };

        let mode_change = match (self.old_mode, self.new_mode) {
            (Some(old), Some(new)) if old != new => Some(ModeChange { old, new }),
            _ => None,
        };

        if kind == ChangeKind::Modify && self.hunks.is_empty() && mode_change.is_none() {
            return Err(PatchError::malformed(
                "file header lacks a matching hunk",
                self.source,
            ));
        }

        let stray_line = match kind {
            ChangeKind::Create => self
                .hunks
                .iter()
                .flat_map(|h| h.lines.iter())
                .any(|l| !matches!(l, HunkLine::Add(_))),
            ChangeKind::Delete => self
                .hunks
                .iter()
                .flat_map(|h| h.lines.iter())
                .any(|l| !matches!(l, HunkLine::Remove(_))),
            _ => false,
        };
        if stray_line {
            return Err(PatchError::malformed(
                "created or deleted file carries context lines",
                self.source,
            ));
        }

        Ok(FileDiff {
            old_path,
            new_path,
            kind,
            mode: self.new_file_mode.or(self.deleted_file_mode),
            mode_change,
            hunks: self.hunks,
            old_missing_newline: self.old_missing_newline,
            new_missing_newline: self.new_missing_newline,
        })
    }
}

pub fn parse_file_mode(raw: &str, path: &str) -> PatchResult<FileMode> {
    let raw = raw.trim();
    if raw == SYMLINK_MODE {
        return Err(PatchError::UnsupportedChangeKind {
            path: path.to_string(),
            reason: format!(
                "unexpected file mode string: {} (symbolic links are not supported)",
                raw
            ),
        });
    }
    if raw == GITLINK_MODE {
        return Err(PatchError::UnsupportedChangeKind {
            path: path.to_string(),
            reason: "submodule entries are not supported".to_string(),
        });
    }

    let bits = u32::from_str_radix(raw, 8).map_err(|_| {
        PatchError::malformed(format!("unexpected file mode string: {}", raw), raw)
    })?;
    let file_type = bits >> 9;
    if file_type != 0 && file_type != 0o100 {
        return Err(PatchError::malformed(
            format!("unexpected file mode string: {}", raw),
            raw,
        ));
    }

    if bits & 0o111 != 0 {
        Ok(FileMode::Executable)
    } else {
        Ok(FileMode::Regular)
    }
}

fn parse_marker_path(raw: &str, line: &str) -> PatchResult<Option<PathBuf>> {
    // Some producers append a tab and a timestamp after the path.
    let raw = raw.split('\t').next().unwrap_or("").trim_end();
    if raw == DEV_NULL {
        return Ok(None);
    }
    checked_path(strip_side_prefix(unquote(raw)), line).map(Some)
}

fn split_diff_git_paths(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim_end();
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        let old = &stripped[..end];
        let new = unquote(stripped[end + 1..].trim_start());
        return Some((
            strip_side_prefix(old).to_string(),
            strip_side_prefix(new).to_string(),
        ));
    }

    // "a/x b/x": with identical halves the split point is the middle space.
    let idx = rest.find(" b/")?;
    let old = &rest[..idx];
    let new = &rest[idx + 1..];
    Some((
        strip_side_prefix(old).to_string(),
        strip_side_prefix(unquote(new)).to_string(),
    ))
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

fn checked_path(raw: &str, line: &str) -> PatchResult<PathBuf> {
    let path = Path::new(raw);
    if raw.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(PatchError::malformed(
            format!("path {:?} escapes the target directory", raw),
            line,
        ));
    }
    Ok(path.to_path_buf())
}
