//! Byte-range source positions.
//!
//! Every tree node carries a `Span` into the script source. Spans are the
//! basis for error fragments: a surfaced error reports the exact source
//! slice and offsets of the offending node.

use std::fmt;

/// A half-open byte range `[start, end)` into a script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span start {start} > end {end}");
        Self { start, end }
    }

    /// A span covering both `self` and `other`.
    pub fn merge(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// The source slice this span covers.
    ///
    /// Returns an empty string when the span is out of bounds or splits a
    /// UTF-8 code point, which only happens for spans that did not originate
    /// from the given source.
    pub fn slice(self, source: &str) -> &str {
        source.get(self.start as usize..self.end as usize).unwrap_or("")
    }

    /// 1-based line and column of the span start.
    pub fn line_col(self, source: &str) -> (u32, u32) {
        let upto = &source[..(self.start as usize).min(source.len())];
        let line = upto.matches('\n').count() as u32 + 1;
        let col = upto.rsplit('\n').next().map_or(0, |l| l.chars().count()) as u32 + 1;
        (line, col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_and_slice() {
        let src = "var x = 3;";
        let a = Span::new(4, 5);
        assert_eq!(a.slice(src), "x");
        let merged = a.merge(Span::new(8, 9));
        assert_eq!(merged.slice(src), "x = 3");
    }

    #[test]
    fn line_col_counts_newlines() {
        let src = "a\nbb\nccc";
        assert_eq!(Span::new(5, 6).line_col(src), (3, 1));
        assert_eq!(Span::new(7, 8).line_col(src), (3, 3));
    }
}
