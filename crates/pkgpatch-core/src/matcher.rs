/// Largest distance, in lines, a hunk may be moved from its expected position.
pub const MAX_FUZZ: usize = 20;

pub fn lines_equal(a: &str, b: &str) -> bool {
    a == b || a.trim_end() == b.trim_end()
}

pub fn matches_at<S: AsRef<str>>(source: &[S], pattern: &[&str], at: usize) -> bool {
    if at + pattern.len() > source.len() {
        return false;
    }
    source[at..at + pattern.len()]
        .iter()
        .zip(pattern)
        .all(|(a, b)| lines_equal(a.as_ref(), b))
}

/// Candidate offsets nearest first: 0, -1, +1, -2, +2, ... up to `MAX_FUZZ`.
pub fn fuzz_offsets() -> impl Iterator<Item = isize> {
    std::iter::once(0).chain((1..=MAX_FUZZ as isize).flat_map(|d| [-d, d]))
}

/// Finds where `pattern` sits in `source`, starting the search at `expected`
/// and never placing it before `min_start`. Returns the index of the first
/// candidate that matches.
pub fn find_hunk_position<S: AsRef<str>>(
    source: &[S],
    pattern: &[&str],
    expected: isize,
    min_start: usize,
) -> Option<usize> {
    for offset in fuzz_offsets() {
        let candidate = expected + offset;
        if candidate < min_start as isize {
            continue;
        }
        let candidate = candidate as usize;
        if candidate + pattern.len() > source.len() {
            continue;
        }
        if matches_at(source, pattern, candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.split('\n').map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fuzz_offsets_order() {
        let offsets: Vec<isize> = fuzz_offsets().take(5).collect();
        assert_eq!(offsets, vec![0, -1, 1, -2, 2]);
        assert_eq!(fuzz_offsets().count(), 2 * MAX_FUZZ + 1);
    }

    #[test]
    fn test_exact_position() {
        let src = lines("a\nb\nc\nd");
        assert_eq!(find_hunk_position(&src, &["b", "c"], 1, 0), Some(1));
    }

    #[test]
    fn test_shifted_position() {
        let src = lines("x\nx\nx\na\nb\nc");
        assert_eq!(find_hunk_position(&src, &["a", "b"], 0, 0), Some(3));
    }

    #[test]
    fn test_nearest_match_wins() {
        let src = lines("foo\nbar\nfoo\nbar\nfoo");
        assert_eq!(find_hunk_position(&src, &["foo"], 1, 0), Some(0));
        assert_eq!(find_hunk_position(&src, &["foo"], 3, 0), Some(2));
        assert_eq!(find_hunk_position(&src, &["foo"], 4, 0), Some(4));
    }

    #[test]
    fn test_min_start_prevents_overlap() {
        let src = lines("foo\nbar\nfoo");
        assert_eq!(find_hunk_position(&src, &["foo"], 0, 1), Some(2));
    }

    #[test]
    fn test_outside_window_fails() {
        let mut src: Vec<String> = (0..MAX_FUZZ + 5).map(|i| format!("filler {}", i)).collect();
        src.push("target".to_string());
        assert_eq!(find_hunk_position(&src, &["target"], 0, 0), None);
        assert_eq!(
            find_hunk_position(&src, &["target"], 5, 0),
            Some(MAX_FUZZ + 5)
        );
    }

    #[test]
    fn test_trailing_whitespace_is_ignored() {
        let src = vec!["let a = 1;  ".to_string(), "let b = 2;\r".to_string()];
        assert!(matches_at(&src, &["let a = 1;", "let b = 2;"], 0));
        assert!(!matches_at(&src, &["  let a = 1;"], 0));
    }

    #[test]
    fn test_empty_pattern_matches_in_bounds() {
        let src = lines("a\nb");
        assert_eq!(find_hunk_position(&src, &[], 2, 0), Some(2));
    }
}
