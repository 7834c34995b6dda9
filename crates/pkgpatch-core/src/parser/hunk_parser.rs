use crate::error::{PatchError, PatchResult};
use crate::types::{Hunk, HunkLine};
use once_cell::sync::Lazy;
use regex::Regex;

pub const HUNK_HEADER_PREFIX: &str = "@@";
pub const NO_NEWLINE_MARKER: &str = "\\";

static HUNK_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissingNewline {
    Old,
    New,
    Both,
}

pub fn parse_hunk_header(header: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER_RE.captures(header)?;
    let number = |i: usize, default: usize| -> Option<usize> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    Some(Hunk {
        old_start: number(1, 0)?,
        old_len: number(2, 1)?,
        new_start: number(3, 0)?,
        new_len: number(4, 1)?,
        lines: Vec::new(),
    })
}

/// A hunk whose body is still being read. The header's lengths are counted
/// down as lines arrive so inconsistent headers are caught at the line that
/// breaks them.
#[derive(Debug)]
pub struct PendingHunk {
    pub hunk: Hunk,
    old_remaining: usize,
    new_remaining: usize,
    source: String,
}

impl PendingHunk {
    pub fn new(hunk: Hunk, header_line: &str) -> Self {
        PendingHunk {
            old_remaining: hunk.old_len,
            new_remaining: hunk.new_len,
            hunk,
            source: format!("{}\n", header_line),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns `Ok(false)` when `line` is not part of this hunk's body.
    pub fn push_line(&mut self, line: &str) -> PatchResult<bool> {
        if line.starts_with(NO_NEWLINE_MARKER) {
            if self.hunk.lines.is_empty() {
                return Err(self.integrity_error(line));
            }
            self.source.push_str(line);
            self.source.push('\n');
            return Ok(true);
        }

        if self.is_complete() {
            return Ok(false);
        }

        let (kind, text) = match line.chars().next() {
            Some(' ') => (' ', &line[1..]),
            Some('-') => ('-', &line[1..]),
            Some('+') => ('+', &line[1..]),
            None => (' ', ""),
            Some(_) => return Err(self.integrity_error(line)),
        };

        let parsed = match kind {
            ' ' => {
                if self.old_remaining == 0 || self.new_remaining == 0 {
                    return Err(self.integrity_error(line));
                }
                self.old_remaining -= 1;
                self.new_remaining -= 1;
                HunkLine::Context(text.to_string())
            }
            '-' => {
                if self.old_remaining == 0 {
                    return Err(self.integrity_error(line));
                }
                self.old_remaining -= 1;
                HunkLine::Remove(text.to_string())
            }
            _ => {
                if self.new_remaining == 0 {
                    return Err(self.integrity_error(line));
                }
                self.new_remaining -= 1;
                HunkLine::Add(text.to_string())
            }
        };

        self.source.push_str(line);
        self.source.push('\n');
        self.hunk.lines.push(parsed);
        Ok(true)
    }

    /// Which side a `\ No newline at end of file` marker refers to: the line
    /// pushed just before it.
    pub fn missing_newline_side(&self) -> Option<MissingNewline> {
        match self.hunk.lines.last()? {
            HunkLine::Remove(_) => Some(MissingNewline::Old),
            HunkLine::Add(_) => Some(MissingNewline::New),
            HunkLine::Context(_) => Some(MissingNewline::Both),
        }
    }

    pub fn finish(self) -> PatchResult<Hunk> {
        if !self.is_complete() {
            return Err(PatchError::malformed(
                format!(
                    "hunk header integrity check failed: {} old and {} new line(s) missing",
                    self.old_remaining, self.new_remaining
                ),
                self.source,
            ));
        }
        Ok(self.hunk)
    }

    fn integrity_error(&self, line: &str) -> PatchError {
        PatchError::malformed(
            format!(
                "hunk header integrity check failed at line {:?} ({} old and {} new line(s) expected)",
                line, self.old_remaining, self.new_remaining
            ),
            format!("{}{}\n", self.source, line),
        )
    }
}
