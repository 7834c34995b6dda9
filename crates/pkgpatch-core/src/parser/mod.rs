pub mod header_parser;
pub mod hunk_parser;

use crate::error::{PatchError, PatchResult};
use crate::types::ParsedPatch;
use header_parser::{FileHeader, DIFF_GIT_PREFIX, NEW_FILE_PREFIX, OLD_FILE_PREFIX};
use hunk_parser::{MissingNewline, PendingHunk, HUNK_HEADER_PREFIX};
use log::debug;

#[derive(Debug, PartialEq)]
pub enum ParserState {
    Idle,
    InHeader,
    InHunk,
}

/// Parses a whole (possibly multi-file) unified diff. Pure: nothing on disk is
/// consulted.
pub fn parse(content: &str) -> PatchResult<ParsedPatch> {
    let mut files = Vec::new();
    let mut state = ParserState::Idle;
    let mut current: Option<FileHeader> = None;
    let mut pending: Option<PendingHunk> = None;

    let mut lines: Vec<&str> = content.split('\n').collect();
    if content.ends_with('\n') {
        lines.pop();
    }

    for line in lines {
        if state == ParserState::InHunk {
            if let (Some(hunk), Some(header)) = (pending.as_mut(), current.as_mut()) {
                if hunk.push_line(line)? {
                    if line.starts_with(hunk_parser::NO_NEWLINE_MARKER) {
                        match hunk.missing_newline_side() {
                            Some(MissingNewline::Old) => header.old_missing_newline = true,
                            Some(MissingNewline::New) => header.new_missing_newline = true,
                            Some(MissingNewline::Both) => {
                                header.old_missing_newline = true;
                                header.new_missing_newline = true;
                            }
                            None => {}
                        }
                    }
                    continue;
                }
            }
            close_hunk(&mut pending, &mut current)?;
            state = ParserState::InHeader;
        }

        if line.starts_with(DIFF_GIT_PREFIX) {
            finish_file(&mut current, &mut files)?;
            current = Some(FileHeader::from_diff_git_line(line)?);
            state = ParserState::InHeader;
        } else if line.starts_with(OLD_FILE_PREFIX) {
            let starts_new_file = match &current {
                Some(header) => header.has_file_lines(),
                None => true,
            };
            if starts_new_file {
                finish_file(&mut current, &mut files)?;
                current = Some(FileHeader::default());
            }
            if let Some(header) = current.as_mut() {
                header.set_minus_path(line)?;
            }
            state = ParserState::InHeader;
        } else if line.starts_with(NEW_FILE_PREFIX) && current.is_some() {
            if let Some(header) = current.as_mut() {
                header.set_plus_path(line)?;
            }
        } else if line.starts_with(HUNK_HEADER_PREFIX) {
            let header = current.as_mut().ok_or_else(|| {
                PatchError::malformed("hunk without a file header", line)
            })?;
            if header.minus_path.is_none() || header.plus_path.is_none() {
                return Err(PatchError::malformed(
                    "hunk before the '---'/'+++' file lines",
                    format!("{}{}\n", header.source, line),
                ));
            }
            let hunk = hunk_parser::parse_hunk_header(line).ok_or_else(|| {
                PatchError::malformed(
                    format!("invalid hunk header {:?}", line),
                    format!("{}{}\n", header.source, line),
                )
            })?;
            pending = Some(PendingHunk::new(hunk, line));
            state = ParserState::InHunk;
        } else if let Some(header) = current.as_mut().filter(|h| h.hunks.is_empty()) {
            if !header.parse_extended_line(line)? {
                debug!("Ignoring line outside of a file diff: {:?}", line);
            }
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            return Err(PatchError::UnsupportedChangeKind {
                path: "<unknown>".to_string(),
                reason: "binary diffs are not supported".to_string(),
            });
        } else {
            debug!("Ignoring line outside of a file diff: {:?}", line);
        }
    }

    if state == ParserState::InHunk {
        close_hunk(&mut pending, &mut current)?;
    }
    finish_file(&mut current, &mut files)?;

    Ok(ParsedPatch { files })
}

fn close_hunk(pending: &mut Option<PendingHunk>, current: &mut Option<FileHeader>) -> PatchResult<()> {
    if let Some(hunk) = pending.take() {
        let source = hunk.source().to_string();
        let finished = hunk.finish()?;
        if let Some(header) = current.as_mut() {
            header.source.push_str(&source);
            header.hunks.push(finished);
        }
    }
    Ok(())
}

fn finish_file(
    current: &mut Option<FileHeader>,
    files: &mut Vec<crate::types::FileDiff>,
) -> PatchResult<()> {
    if let Some(header) = current.take() {
        files.push(header.finish()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, FileMode, HunkLine};
    use std::path::PathBuf;

    const MODIFY_DIFF: &str = "diff --git a/node_modules/left-pad/index.js b/node_modules/left-pad/index.js
index 26f73ff..60f3f56 100644
--- a/node_modules/left-pad/index.js
+++ b/node_modules/left-pad/index.js
@@ -1,3 +1,3 @@
 'use strict';
-module.exports = leftPad;
+module.exports = leftPad; // patched

";

    #[test]
    fn test_parse_single_modification() {
        let patch = parse(MODIFY_DIFF).unwrap();
        assert_eq!(patch.files.len(), 1);

        let file = &patch.files[0];
        assert_eq!(file.kind, ChangeKind::Modify);
        assert_eq!(
            file.old_path,
            Some(PathBuf::from("node_modules/left-pad/index.js"))
        );
        assert_eq!(file.old_path, file.new_path);
        assert_eq!(file.hunks.len(), 1);
        assert_eq!(
            file.hunks[0].lines,
            vec![
                HunkLine::Context("'use strict';".to_string()),
                HunkLine::Remove("module.exports = leftPad;".to_string()),
                HunkLine::Add("module.exports = leftPad; // patched".to_string()),
                HunkLine::Context(String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_multiple_files_creation_and_deletion() {
        let text = "diff --git a/pkg/new.js b/pkg/new.js
new file mode 100755
index 0000000..e69de29
--- /dev/null
+++ b/pkg/new.js
@@ -0,0 +1,2 @@
+#!/usr/bin/env node
+run()
diff --git a/pkg/old.js b/pkg/old.js
deleted file mode 100644
index e69de29..0000000
--- a/pkg/old.js
+++ /dev/null
@@ -1 +0,0 @@
-gone
\\ No newline at end of file
";
        let patch = parse(text).unwrap();
        assert_eq!(patch.files.len(), 2);

        let created = &patch.files[0];
        assert_eq!(created.kind, ChangeKind::Create);
        assert_eq!(created.old_path, None);
        assert_eq!(created.new_path, Some(PathBuf::from("pkg/new.js")));
        assert_eq!(created.mode, Some(FileMode::Executable));

        let deleted = &patch.files[1];
        assert_eq!(deleted.kind, ChangeKind::Delete);
        assert_eq!(deleted.new_path, None);
        assert!(deleted.old_missing_newline);
        assert!(!deleted.new_missing_newline);
    }

    #[test]
    fn test_parse_rename_and_mode_only_change() {
        let text = "diff --git a/pkg/a.js b/pkg/b.js
similarity index 100%
rename from pkg/a.js
rename to pkg/b.js
diff --git a/pkg/bin.js b/pkg/bin.js
old mode 100644
new mode 100755
";
        let patch = parse(text).unwrap();
        assert_eq!(patch.files.len(), 2);
        assert_eq!(patch.files[0].kind, ChangeKind::Rename);
        assert_eq!(patch.files[0].old_path, Some(PathBuf::from("pkg/a.js")));
        assert_eq!(patch.files[0].new_path, Some(PathBuf::from("pkg/b.js")));
        assert!(patch.files[0].hunks.is_empty());

        let mode = patch.files[1].mode_change.unwrap();
        assert_eq!(mode.old, FileMode::Regular);
        assert_eq!(mode.new, FileMode::Executable);
    }

    #[test]
    fn test_parse_empty_file_creation() {
        let text = "diff --git a/pkg/empty.txt b/pkg/empty.txt
new file mode 100644
index 0000000..e69de29
";
        let patch = parse(text).unwrap();
        assert_eq!(patch.files[0].kind, ChangeKind::Create);
        assert!(patch.files[0].hunks.is_empty());
    }

    #[test]
    fn test_parse_plain_unified_diff_without_git_headers() {
        let text = "--- a/one.txt
+++ b/one.txt
@@ -1 +1 @@
-a
+b
--- a/two.txt
+++ b/two.txt
@@ -1 +1 @@
-c
+d
";
        let patch = parse(text).unwrap();
        assert_eq!(patch.files.len(), 2);
        assert_eq!(patch.files[1].new_path, Some(PathBuf::from("two.txt")));
    }

    #[test]
    fn test_file_header_without_hunk_is_malformed() {
        let text = "diff --git a/x.js b/x.js
--- a/x.js
+++ b/x.js
diff --git a/y.js b/y.js
--- a/y.js
+++ b/y.js
@@ -1 +1 @@
-a
+b
";
        match parse(text).unwrap_err() {
            PatchError::MalformedPatch { message, fragment } => {
                assert!(message.contains("lacks a matching hunk"));
                assert!(fragment.contains("diff --git a/x.js b/x.js"));
            }
            other => panic!("Expected MalformedPatch, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_hunk_length_is_malformed() {
        let text = "--- a/x.js
+++ b/x.js
@@ -1,3 +1,3 @@
 a
-b
+c
diff --git a/y.js b/y.js
";
        assert!(matches!(
            parse(text),
            Err(PatchError::MalformedPatch { .. })
        ));
    }

    #[test]
    fn test_symlink_is_rejected() {
        let text = "diff --git a/pkg/link b/pkg/link
new file mode 120000
index 0000000..2e65efe
--- /dev/null
+++ b/pkg/link
@@ -0,0 +1 @@
+target
\\ No newline at end of file
";
        assert!(matches!(
            parse(text),
            Err(PatchError::UnsupportedChangeKind { .. })
        ));
    }

    #[test]
    fn test_preamble_is_ignored() {
        let text = format!("Some commit message\n\n{}", MODIFY_DIFF);
        let patch = parse(&text).unwrap();
        assert_eq!(patch.files.len(), 1);
    }

    #[test]
    fn test_empty_input_has_no_files() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_crlf_content_is_kept_verbatim() {
        let text = "--- a/x.txt\n+++ b/x.txt\n@@ -1 +1 @@\n-old\r\n+new\r\n";
        let patch = parse(text).unwrap();
        assert_eq!(
            patch.files[0].hunks[0].lines[0],
            HunkLine::Remove("old\r".to_string())
        );
    }
}
