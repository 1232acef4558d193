//! Line-oriented view of file content.

/// A file's content split into lines.
///
/// Lines are the `\n`-separated segments of the content, ignoring a single
/// trailing newline, which is remembered and restored by [`Lines::render`].
/// Empty content has zero lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Lines {
    pub fn parse(content: &str) -> Self {
        if content.is_empty() {
            return Self {
                lines: Vec::new(),
                trailing_newline: false,
            };
        }
        let trailing_newline = content.ends_with('\n');
        let body = content.strip_suffix('\n').unwrap_or(content);
        Self {
            lines: body.split('\n').map(str::to_string).collect(),
            trailing_newline,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Insert `content` before 1-indexed `line`; past the end appends.
    pub fn insert_before(&mut self, line: usize, content: &str) {
        let at = line.saturating_sub(1).min(self.lines.len());
        let incoming = content.strip_suffix('\n').unwrap_or(content);
        self.lines
            .splice(at..at, incoming.split('\n').map(str::to_string));
    }

    /// Remove the inclusive 1-indexed range, clamping `end` to the last line.
    ///
    /// Returns the number of lines removed; a `start` past the end removes
    /// nothing.
    pub fn delete_range(&mut self, start: usize, end: usize) -> usize {
        let len = self.lines.len();
        if start == 0 || start > len || end < start {
            return 0;
        }
        let end = end.min(len);
        self.lines.drain(start - 1..end).count()
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Number of lines in `content` under the [`Lines`] model.
pub fn line_count(content: &str) -> usize {
    Lines::parse(content).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_counts() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("x=1"), 1);
        assert_eq!(line_count("a\nb\n"), 2);
        assert_eq!(line_count("a\n\nb"), 3);
    }

    #[test]
    fn test_insert_before_first_line() {
        let mut lines = Lines::parse("x=1");
        lines.insert_before(1, "# header");
        assert_eq!(lines.render(), "# header\nx=1");
    }

    #[test]
    fn test_insert_past_end_appends() {
        let mut lines = Lines::parse("a\nb\n");
        lines.insert_before(99, "c\nd\n");
        assert_eq!(lines.render(), "a\nb\nc\nd\n");
    }

    #[test]
    fn test_insert_into_empty_content() {
        let mut lines = Lines::parse("");
        lines.insert_before(1, "first");
        assert_eq!(lines.render(), "first");
    }

    #[test]
    fn test_delete_range_clamps_end() {
        let mut lines = Lines::parse("1\n2\n3\n4");
        assert_eq!(lines.delete_range(3, 10), 2);
        assert_eq!(lines.render(), "1\n2");
    }

    #[test]
    fn test_delete_range_past_end_is_noop() {
        let mut lines = Lines::parse("1\n2");
        assert_eq!(lines.delete_range(5, 6), 0);
        assert_eq!(lines.render(), "1\n2");
    }
}
