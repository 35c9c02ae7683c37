//! Byte-offset to line/column conversion.
//!
//! Call-site keys and shared-memory location keys are derived from 1-based
//! line/column positions, so every parsed source carries one of these tables.

/// Precomputed table of line start offsets for a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTable {
    /// Byte offset at which each line begins. `starts[0]` is always 0.
    starts: Vec<usize>,
}

impl LineTable {
    /// Build the table by scanning `source` for newlines.
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    /// Convert a byte offset to a 1-based (line, column) pair.
    ///
    /// Columns count bytes from the line start; offsets past the end of the
    /// source land on the final line.
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line_idx = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line = u32::try_from(line_idx + 1).unwrap_or(u32::MAX);
        let col = u32::try_from(offset - self.starts[line_idx] + 1).unwrap_or(u32::MAX);
        (line, col)
    }

    /// Convert a 1-based (line, column) pair back to a byte offset.
    ///
    /// Returns `None` if the line does not exist.
    #[must_use]
    pub fn offset(&self, line: u32, col: u32) -> Option<usize> {
        let line_idx = (line as usize).checked_sub(1)?;
        let start = *self.starts.get(line_idx)?;
        Some(start + (col as usize).saturating_sub(1))
    }

    /// Number of lines in the source.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let t = LineTable::new("abc");
        assert_eq!(t.line_col(0), (1, 1));
        assert_eq!(t.line_col(2), (1, 3));
        assert_eq!(t.line_count(), 1);
    }

    #[test]
    fn multi_line() {
        let t = LineTable::new("ab\ncd\nef");
        assert_eq!(t.line_col(0), (1, 1));
        assert_eq!(t.line_col(3), (2, 1));
        assert_eq!(t.line_col(4), (2, 2));
        assert_eq!(t.line_col(6), (3, 1));
        assert_eq!(t.line_count(), 3);
    }

    #[test]
    fn offset_at_newline_belongs_to_its_line() {
        let t = LineTable::new("ab\ncd");
        // The '\n' at offset 2 is still on line 1.
        assert_eq!(t.line_col(2), (1, 3));
    }

    #[test]
    fn round_trip() {
        let src = "let a = 1;\nlet b = 2;\n";
        let t = LineTable::new(src);
        for off in 0..src.len() {
            let (line, col) = t.line_col(off);
            assert_eq!(t.offset(line, col), Some(off));
        }
    }

    #[test]
    fn missing_line_is_none() {
        let t = LineTable::new("one line");
        assert_eq!(t.offset(5, 1), None);
    }
}
