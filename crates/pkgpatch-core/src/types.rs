use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modify,
    Create,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
}

impl FileMode {
    pub fn as_git_str(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
        }
    }

    pub fn permission_bits(&self) -> u32 {
        match self {
            FileMode::Regular => 0o644,
            FileMode::Executable => 0o755,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub old: FileMode,
    pub new: FileMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            HunkLine::Context(s) | HunkLine::Add(s) | HunkLine::Remove(s) => s,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            HunkLine::Context(_) => ' ',
            HunkLine::Add(_) => '+',
            HunkLine::Remove(_) => '-',
        }
    }

    fn reversed(&self) -> HunkLine {
        match self {
            HunkLine::Context(s) => HunkLine::Context(s.clone()),
            HunkLine::Add(s) => HunkLine::Remove(s.clone()),
            HunkLine::Remove(s) => HunkLine::Add(s.clone()),
        }
    }
}

/// Line text is stored without the diff prefix and without the line terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .map(HunkLine::text)
            .collect()
    }

    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Remove(_)))
            .map(HunkLine::text)
            .collect()
    }

    /// Zero-based index in the old file where the old side of this hunk begins.
    /// An empty old side names the line it follows, so no adjustment is needed.
    pub fn expected_index(&self) -> usize {
        if self.old_len == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }

    pub fn reversed(&self) -> Hunk {
        Hunk {
            old_start: self.new_start,
            old_len: self.new_len,
            new_start: self.old_start,
            new_len: self.old_len,
            lines: self.lines.iter().map(HunkLine::reversed).collect(),
        }
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.prefix(), line.text())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDiff {
    pub old_path: Option<PathBuf>,
    pub new_path: Option<PathBuf>,
    pub kind: ChangeKind,
    /// Mode of the created or deleted file.
    pub mode: Option<FileMode>,
    pub mode_change: Option<ModeChange>,
    pub hunks: Vec<Hunk>,
    pub old_missing_newline: bool,
    pub new_missing_newline: bool,
}

impl FileDiff {
    pub fn display_path(&self) -> &Path {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn reversed(&self) -> FileDiff {
        let kind = match self.kind {
            ChangeKind::Create => ChangeKind::Delete,
            ChangeKind::Delete => ChangeKind::Create,
            other => other,
        };

        FileDiff {
            old_path: self.new_path.clone(),
            new_path: self.old_path.clone(),
            kind,
            mode: self.mode,
            mode_change: self.mode_change.map(|c| ModeChange {
                old: c.new,
                new: c.old,
            }),
            hunks: self.hunks.iter().map(Hunk::reversed).collect(),
            old_missing_newline: self.new_missing_newline,
            new_missing_newline: self.old_missing_newline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPatch {
    pub files: Vec<FileDiff>,
}

impl ParsedPatch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Later changes are undone first, so a file renamed and then edited is
    /// restored in the opposite order.
    pub fn reversed(&self) -> ParsedPatch {
        ParsedPatch {
            files: self.files.iter().rev().map(FileDiff::reversed).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hunk() -> Hunk {
        Hunk {
            old_start: 3,
            old_len: 2,
            new_start: 3,
            new_len: 2,
            lines: vec![
                HunkLine::Context("a".to_string()),
                HunkLine::Remove("b".to_string()),
                HunkLine::Add("c".to_string()),
            ],
        }
    }

    #[test]
    fn test_hunk_sides() {
        let hunk = sample_hunk();
        assert_eq!(hunk.old_lines(), vec!["a", "b"]);
        assert_eq!(hunk.new_lines(), vec!["a", "c"]);
        assert_eq!(hunk.expected_index(), 2);
    }

    #[test]
    fn test_hunk_reversed_swaps_sides() {
        let reversed = sample_hunk().reversed();
        assert_eq!(reversed.old_lines(), vec!["a", "c"]);
        assert_eq!(reversed.new_lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_old_side_expected_index() {
        let hunk = Hunk {
            old_start: 0,
            old_len: 0,
            new_start: 1,
            new_len: 1,
            lines: vec![HunkLine::Add("x".to_string())],
        };
        assert_eq!(hunk.expected_index(), 0);
    }

    #[test]
    fn test_hunk_display() {
        let text = sample_hunk().to_string();
        assert_eq!(text, "@@ -3,2 +3,2 @@\n a\n-b\n+c\n");
    }

    #[test]
    fn test_file_diff_reversed_inverts_creation() {
        let diff = FileDiff {
            old_path: None,
            new_path: Some(PathBuf::from("node_modules/pkg/new.js")),
            kind: ChangeKind::Create,
            mode: Some(FileMode::Regular),
            mode_change: None,
            hunks: vec![],
            old_missing_newline: false,
            new_missing_newline: true,
        };
        let reversed = diff.reversed();
        assert_eq!(reversed.kind, ChangeKind::Delete);
        assert_eq!(reversed.old_path, Some(PathBuf::from("node_modules/pkg/new.js")));
        assert_eq!(reversed.new_path, None);
        assert!(reversed.old_missing_newline);
        assert!(!reversed.new_missing_newline);
    }
}
