use serde::{Deserialize, Serialize};
use std::fmt;

/// A region of source text, tracked on every AST, HIR and diagnostic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// 1-indexed source line
    pub line: u32,
    /// 1-indexed source column
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Span {
            start,
            end,
            line,
            column,
        }
    }

    /// A zero-width span for synthesized nodes
    pub fn synthetic() -> Self {
        Span::default()
    }

    /// Combine two spans into one covering both
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
            column: if self.line <= other.line {
                self.column
            } else {
                other.column
            },
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_spans() {
        let a = Span::new(0, 5, 1, 1);
        let b = Span::new(10, 15, 2, 3);

        let merged = a.merge(b);
        assert_eq!(merged.start, 0);
        assert_eq!(merged.end, 15);
        assert_eq!(merged.line, 1);
        assert_eq!(merged.column, 1);
    }

    #[test]
    fn test_display() {
        let span = Span::new(0, 5, 3, 7);
        assert_eq!(span.to_string(), "3:7");
    }
}
