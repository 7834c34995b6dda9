use crate::error::{PatchError, PatchResult};
use crate::types::FileMode;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// A text file split into lines, remembering whether the last line was
/// terminated so it can be written back byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContent {
    pub lines: Vec<String>,
    pub trailing_newline: bool,
}

impl FileContent {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return FileContent {
                lines: Vec::new(),
                trailing_newline: true,
            };
        }

        let mut lines: Vec<String> = text.split('\n').map(|s| s.to_string()).collect();
        let trailing_newline = text.ends_with('\n');
        if trailing_newline {
            lines.pop();
        }
        FileContent {
            lines,
            trailing_newline,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

pub fn ensure_directory_exists(path: &Path) -> PatchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
    }
    Ok(())
}

pub fn read_file_content(path: &Path) -> PatchResult<String> {
    fs::read_to_string(path).map_err(|e| PatchError::io(path, e))
}

pub fn write_file_content(path: &Path, content: &str) -> PatchResult<()> {
    ensure_directory_exists(path)?;
    fs::write(path, content).map_err(|e| PatchError::io(path, e))
}

pub fn file_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

pub fn remove_file(path: &Path) -> PatchResult<()> {
    fs::remove_file(path).map_err(|e| PatchError::io(path, e))
}

pub fn move_file(src: &Path, dst: &Path) -> PatchResult<()> {
    ensure_directory_exists(dst)?;
    fs::rename(src, dst).map_err(|e| PatchError::io(src, e))
}

pub fn remove_dir_if_exists(path: &Path) -> PatchResult<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).map_err(|e| PatchError::io(path, e))?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn disk_mode(path: &Path) -> Option<FileMode> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).ok()?;
    if meta.permissions().mode() & 0o111 != 0 {
        Some(FileMode::Executable)
    } else {
        Some(FileMode::Regular)
    }
}

#[cfg(not(unix))]
pub fn disk_mode(_path: &Path) -> Option<FileMode> {
    None
}

#[cfg(unix)]
pub fn set_file_mode(path: &Path, mode: FileMode) -> PatchResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.permission_bits()))
        .map_err(|e| PatchError::io(path, e))
}

#[cfg(not(unix))]
pub fn set_file_mode(_path: &Path, _mode: FileMode) -> PatchResult<()> {
    Ok(())
}

/// Copies `src` into `dst`, following symlinks at the root (package managers
/// may install a package as a link) and skipping entries `skip` rejects.
pub fn copy_dir_all<F>(src: &Path, dst: &Path, skip: F) -> PatchResult<()>
where
    F: Fn(&Path) -> bool,
{
    let src = fs::canonicalize(src).map_err(|e| PatchError::io(src, e))?;
    fs::create_dir_all(dst).map_err(|e| PatchError::io(dst, e))?;

    let walker = WalkDir::new(&src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(&src) {
            Ok(rel) => !skip(rel),
            Err(_) => true,
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_default();
            PatchError::io(path, e.into())
        })?;
        let rel = match entry.path().strip_prefix(&src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| PatchError::io(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            ensure_directory_exists(&target)?;
            fs::copy(entry.path(), &target).map_err(|e| PatchError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> PatchResult<()> {
    let link = fs::read_link(src).map_err(|e| PatchError::io(src, e))?;
    ensure_directory_exists(dst)?;
    std::os::unix::fs::symlink(link, dst).map_err(|e| PatchError::io(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> PatchResult<()> {
    ensure_directory_exists(dst)?;
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| PatchError::io(src, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_content_roundtrip() {
        for text in ["", "\n", "a", "a\n", "a\nb", "a\nb\n", "a\r\nb\r\n", "\n\n"] {
            assert_eq!(FileContent::parse(text).render(), text, "text {:?}", text);
        }
    }

    #[test]
    fn test_file_content_tracks_trailing_newline() {
        let content = FileContent::parse("one\ntwo");
        assert_eq!(content.lines, vec!["one", "two"]);
        assert!(!content.trailing_newline);
    }

    #[test]
    fn test_copy_dir_all_skips_entries() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("node_modules/dep")).unwrap();
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("lib/index.js"), "x").unwrap();
        fs::write(src.join("node_modules/dep/index.js"), "y").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst, |rel| rel.starts_with("node_modules")).unwrap();

        assert_eq!(fs::read_to_string(dst.join("lib/index.js")).unwrap(), "x");
        assert!(!dst.join("node_modules").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_set_file_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bin.js");
        fs::write(&path, "#!/usr/bin/env node\n").unwrap();
        set_file_mode(&path, FileMode::Executable).unwrap();
        assert_eq!(disk_mode(&path), Some(FileMode::Executable));
    }
}
