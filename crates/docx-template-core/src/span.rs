use std::ops::Range;

use serde::Serialize;

/// Half-open byte range `[start, end)` into the raw bytes of a part.
///
/// Offsets always refer to undecoded bytes, so a span stays valid for
/// slicing the buffer it was taken from until that buffer is spliced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {} after end {}", start, end);
        Self { start, end }
    }

    /// Zero-length span at `at`.
    pub fn empty(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Shift a span that is relative to `base` into absolute coordinates.
    pub fn offset(&self, base: usize) -> Self {
        Self::new(self.start + base, self.end + base)
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Borrow the bytes this span covers, or `None` if it runs past `bytes`.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        bytes.get(self.range())
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// Open and close tag spans of one element, e.g. `<w:t>` and `</w:t>`.
///
/// The element content lies between `open.end` and `close.start`. A
/// self-closing element has an empty `close` span at `open.end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TagPair {
    pub open: Span,
    pub close: Span,
}

impl TagPair {
    pub fn new(open: Span, close: Span) -> Self {
        debug_assert!(open.end <= close.start);
        Self { open, close }
    }

    pub fn self_closing(open: Span) -> Self {
        Self {
            open,
            close: Span::empty(open.end),
        }
    }

    /// Span of the content between the two tags.
    pub fn inner(&self) -> Span {
        Span::new(self.open.end, self.close.start)
    }

    /// Span from the first byte of the open tag to the last of the close tag.
    pub fn outer(&self) -> Span {
        Span::new(self.open.start, self.close.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_len_and_slice() {
        let bytes = b"<w:t>Hello</w:t>";
        let span = Span::new(5, 10);
        assert_eq!(span.len(), 5);
        assert!(!span.is_empty());
        assert_eq!(span.slice(bytes), Some(&b"Hello"[..]));
        assert_eq!(Span::new(10, 40).slice(bytes), None);
    }

    #[test]
    fn test_span_offset_and_contains() {
        let rel = Span::new(2, 4);
        let abs = rel.offset(10);
        assert_eq!(abs, Span::new(12, 14));
        assert!(Span::new(10, 20).contains(&abs));
        assert!(!Span::new(13, 20).contains(&abs));
        assert!(Span::empty(7).is_empty());
    }

    #[test]
    fn test_tag_pair_inner_outer() {
        let pair = TagPair::new(Span::new(0, 5), Span::new(10, 16));
        assert_eq!(pair.inner(), Span::new(5, 10));
        assert_eq!(pair.outer(), Span::new(0, 16));

        let empty = TagPair::self_closing(Span::new(3, 9));
        assert!(empty.inner().is_empty());
        assert_eq!(empty.inner().start, 9);
    }
}
