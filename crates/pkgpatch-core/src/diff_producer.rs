use crate::operations::file_operations::disk_mode;
use crate::types::FileMode;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SYMLINK_MODE: &str = "120000";

/// Turns two snapshots of a package into unified diff text. Paths in the
/// output are `prefix` joined with the path inside the package, with `a/` and
/// `b/` side prefixes.
pub trait DiffProducer {
    fn diff(&self, clean: &Path, modified: &Path, prefix: &Path) -> Result<String>;
}

/// Walks both trees and renders git-style diffs with `diffy`. Needs no
/// external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeDiffProducer;

#[derive(Debug)]
enum Entry {
    File(PathBuf),
    Symlink(PathBuf),
}

fn collect_entries(root: &Path) -> Result<BTreeMap<String, Entry>> {
    let mut entries = BTreeMap::new();
    if !root.is_dir() {
        return Ok(entries);
    }

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", root))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };
        let path = entry.into_path();
        let value = if file_type.is_symlink() {
            Entry::Symlink(path)
        } else {
            Entry::File(path)
        };
        entries.insert(rel, value);
    }
    Ok(entries)
}

fn read_text(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    if bytes.contains(&0) {
        return Ok(None);
    }
    Ok(String::from_utf8(bytes).ok())
}

fn link_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_context(|| format!("Failed to read link {:?}", path))?;
    Ok(target.to_string_lossy().into_owned())
}

fn same_ignoring_eol_space(a: &str, b: &str) -> bool {
    a.ends_with('\n') == b.ends_with('\n')
        && a.lines().map(str::trim_end).eq(b.lines().map(str::trim_end))
}

/// The hunks of a diffy patch, without its `---`/`+++` lines.
fn render_hunks(old: &str, new: &str) -> String {
    diffy::create_patch(old, new)
        .to_string()
        .split_inclusive('\n')
        .skip_while(|line| !line.starts_with("@@"))
        .collect()
}

fn mode_of(path: &Path) -> FileMode {
    disk_mode(path).unwrap_or(FileMode::Regular)
}

struct FileDiffWriter<'a> {
    out: &'a mut String,
    display: String,
}

impl FileDiffWriter<'_> {
    fn git_header(&mut self) {
        self.out.push_str(&format!(
            "diff --git a/{} b/{}\n",
            self.display, self.display
        ));
    }

    fn line(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn created(&mut self, mode: &str, content: &str) {
        self.git_header();
        self.line(&format!("new file mode {}", mode));
        if !content.is_empty() {
            self.line("--- /dev/null");
            self.line(&format!("+++ b/{}", self.display));
            self.out.push_str(&render_hunks("", content));
        }
    }

    fn deleted(&mut self, mode: &str, content: &str) {
        self.git_header();
        self.line(&format!("deleted file mode {}", mode));
        if !content.is_empty() {
            self.line(&format!("--- a/{}", self.display));
            self.line("+++ /dev/null");
            self.out.push_str(&render_hunks(content, ""));
        }
    }
}

impl DiffProducer for TreeDiffProducer {
    fn diff(&self, clean: &Path, modified: &Path, prefix: &Path) -> Result<String> {
        let old_entries = collect_entries(clean)?;
        let new_entries = collect_entries(modified)?;
        let paths: BTreeSet<&String> = old_entries.keys().chain(new_entries.keys()).collect();

        let prefix = prefix
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut out = String::new();
        for rel in paths {
            let display = if prefix.is_empty() {
                rel.clone()
            } else {
                format!("{}/{}", prefix, rel)
            };
            let mut writer = FileDiffWriter {
                out: &mut out,
                display,
            };

            match (old_entries.get(rel), new_entries.get(rel)) {
                (old, Some(Entry::Symlink(new))) => {
                    let target = link_target(new)?;
                    let unchanged = match old {
                        Some(Entry::Symlink(old)) => link_target(old)? == target,
                        _ => false,
                    };
                    if !unchanged {
                        // Reported as-is so parsing refuses it with a clear message.
                        writer.created(SYMLINK_MODE, &target);
                    }
                }
                (Some(Entry::Symlink(old)), None) => {
                    let target = link_target(old)?;
                    writer.deleted(SYMLINK_MODE, &target);
                }
                (None, Some(Entry::File(new))) => match read_text(new)? {
                    Some(content) => writer.created(mode_of(new).as_git_str(), &content),
                    None => warn!("Skipping binary file {}", writer.display),
                },
                (Some(Entry::File(old)), None) => match read_text(old)? {
                    Some(content) => writer.deleted(mode_of(old).as_git_str(), &content),
                    None => warn!("Skipping binary file {}", writer.display),
                },
                (Some(old_entry), Some(Entry::File(new))) => {
                    let old = match old_entry {
                        Entry::File(old) => old,
                        Entry::Symlink(_) => {
                            warn!("Skipping {}: a symlink was replaced by a file", writer.display);
                            continue;
                        }
                    };
                    let (old_text, new_text) = match (read_text(old)?, read_text(new)?) {
                        (Some(a), Some(b)) => (a, b),
                        _ => {
                            if fs::read(old)? != fs::read(new)? {
                                warn!("Skipping binary file {}", writer.display);
                            }
                            continue;
                        }
                    };

                    let old_mode = mode_of(old);
                    let new_mode = mode_of(new);
                    let content_changed = !same_ignoring_eol_space(&old_text, &new_text);
                    if !content_changed && old_mode == new_mode {
                        continue;
                    }

                    writer.git_header();
                    if old_mode != new_mode {
                        writer.line(&format!("old mode {}", old_mode.as_git_str()));
                        writer.line(&format!("new mode {}", new_mode.as_git_str()));
                    }
                    if content_changed {
                        writer.line(&format!("--- a/{}", writer.display));
                        writer.line(&format!("+++ b/{}", writer.display));
                        writer.out.push_str(&render_hunks(&old_text, &new_text));
                    }
                }
                (None, None) => {}
            }
        }

        debug!("Produced {} bytes of diff for {}", out.len(), prefix);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{apply_patch, ApplyOptions};
    use crate::parser::parse;
    use crate::types::ChangeKind;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_identical_trees_have_no_diff() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a"), "index.js", "x\n");
        write(&dir.path().join("b"), "index.js", "x  \n");

        let text = TreeDiffProducer
            .diff(&dir.path().join("a"), &dir.path().join("b"), Path::new("node_modules/p"))
            .unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_diff_parses_and_replays() {
        let dir = tempdir().unwrap();
        let clean = dir.path().join("clean");
        let modified = dir.path().join("modified");
        write(&clean, "index.js", "one\ntwo\nthree\n");
        write(&clean, "lib/old.js", "bye\n");
        write(&clean, "lib/same.js", "same\n");
        write(&modified, "index.js", "one\n2\nthree\n");
        write(&modified, "lib/new.js", "hello");
        write(&modified, "lib/same.js", "same\n");
        write(&modified, "lib/empty.js", "");

        let prefix = Path::new("node_modules/pkg");
        let text = TreeDiffProducer.diff(&clean, &modified, prefix).unwrap();
        assert!(text.contains("diff --git a/node_modules/pkg/index.js b/node_modules/pkg/index.js\n"));

        let patch = parse(&text).unwrap();
        let kinds: Vec<_> = patch.files.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Modify,
                ChangeKind::Create,
                ChangeKind::Create,
                ChangeKind::Delete
            ]
        );

        let app = dir.path().join("app");
        write(&app.join(prefix), "index.js", "one\ntwo\nthree\n");
        write(&app.join(prefix), "lib/old.js", "bye\n");
        apply_patch(&patch, &app, ApplyOptions::default()).unwrap();

        let pkg = app.join(prefix);
        assert_eq!(fs::read_to_string(pkg.join("index.js")).unwrap(), "one\n2\nthree\n");
        assert_eq!(fs::read_to_string(pkg.join("lib/new.js")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(pkg.join("lib/empty.js")).unwrap(), "");
        assert!(!pkg.join("lib/old.js").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_reported_with_link_mode() {
        let dir = tempdir().unwrap();
        let clean = dir.path().join("clean");
        let modified = dir.path().join("modified");
        write(&clean, "index.js", "x\n");
        write(&modified, "index.js", "x\n");
        std::os::unix::fs::symlink("index.js", modified.join("link.js")).unwrap();

        let text = TreeDiffProducer.diff(&clean, &modified, Path::new("p")).unwrap();
        assert!(text.contains("new file mode 120000"));
        assert!(matches!(
            parse(&text),
            Err(crate::error::PatchError::UnsupportedChangeKind { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_change_only() {
        use crate::operations::file_operations::set_file_mode;

        let dir = tempdir().unwrap();
        let clean = dir.path().join("clean");
        let modified = dir.path().join("modified");
        write(&clean, "bin.js", "run\n");
        write(&modified, "bin.js", "run\n");
        set_file_mode(&clean.join("bin.js"), FileMode::Regular).unwrap();
        set_file_mode(&modified.join("bin.js"), FileMode::Executable).unwrap();

        let text = TreeDiffProducer.diff(&clean, &modified, Path::new("p")).unwrap();
        assert_eq!(
            text,
            "diff --git a/p/bin.js b/p/bin.js\nold mode 100644\nnew mode 100755\n"
        );
    }
}
