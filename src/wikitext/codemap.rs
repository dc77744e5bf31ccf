//! Source positions for tokens, heavily adapted from
//! [codemap](https://crates.io/crates/codemap).

/// A range of text within a string.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Span {
    /// The position of the first byte of the span.
    pub start: usize,

    /// The position after the last byte of the span.
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Returns true if this span is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.start >= self.end
    }

    /// The length of the span, in bytes.
    #[inline]
    pub fn len(self) -> usize {
        self.end - self.start
    }

    /// Creates a span that encloses both `self` and `other`.
    #[inline]
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[inline]
    /// Converts the span into a range that can be used for string indexing.
    // This is not just using `From<core::ops::Range<usize>` because type
    // resolution fails in common use with `.into()` which eliminates any
    // benefit of using a standard conversion trait
    pub fn into_range(self) -> core::ops::Range<usize> {
        self.start..self.end
    }
}

/// Associate a Span with a value of arbitrary type (e.g. a token).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Spanned<T> {
    /// The value.
    pub node: T,
    /// The span.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Creates a new [`Spanned`].
    #[inline]
    pub fn new(node: T, start: usize, end: usize) -> Self {
        Self {
            node,
            span: Span { start, end },
        }
    }
}

impl<T> core::ops::Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge() {
        let merged = Span::new(4, 6).merge(Span::new(1, 5));
        assert_eq!(merged, Span::new(1, 6), "merge should enclose both spans");
        assert_eq!(merged.len(), 5);
        assert!(Span::new(3, 3).is_empty(), "zero-length span should be empty");
        assert_eq!(&"abcdef"[Span::new(1, 3).into_range()], "bc");
    }
}
