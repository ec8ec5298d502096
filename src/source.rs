use std::{
    fmt::Display,
    ops::{Range, RangeInclusive},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceOffset(usize);

impl SourceOffset {
    pub fn byte_offset(&self) -> usize {
        self.0
    }
}

impl From<usize> for SourceOffset {
    fn from(offset: usize) -> Self {
        Self(offset)
    }
}

impl From<&SourceOffset> for miette::SourceOffset {
    fn from(offset: &SourceOffset) -> Self {
        offset.0.into()
    }
}
impl From<SourceOffset> for miette::SourceOffset {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}
impl From<&SourceOffset> for miette::SourceSpan {
    fn from(offset: &SourceOffset) -> Self {
        Self::from(&SourceSpan::from(offset))
    }
}
impl From<SourceOffset> for miette::SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    offset: SourceOffset,
    length: SourceOffset,
}

impl SourceSpan {
    pub fn new(offset: SourceOffset, length: SourceOffset) -> Self {
        Self { offset, length }
    }
    pub fn len(&self) -> SourceOffset {
        self.length
    }
    pub fn is_empty(&self) -> bool {
        self.length.0 == 0
    }
    pub fn range(start: SourceOffset, end: SourceOffset) -> Self {
        Self {
            offset: start,
            length: (end.0.saturating_sub(start.0)).into(),
        }
    }
    pub fn range_inclusive(start: SourceOffset, end: SourceOffset) -> Self {
        Self {
            offset: start,
            length: (end.0 - start.0 + 1).into(),
        }
    }
    pub fn start(&self) -> SourceOffset {
        self.offset
    }
    pub fn end(&self) -> SourceOffset {
        (self.offset.0 + self.length.0).into()
    }
    /// Smallest span covering both `self` and `other`.
    pub fn cover(&self, other: SourceSpan) -> Self {
        Self::range(
            self.start().min(other.start()),
            self.end().max(other.end()),
        )
    }
}

impl From<&SourceOffset> for SourceSpan {
    fn from(offset: &SourceOffset) -> Self {
        Self::new(*offset, 1.into())
    }
}
impl From<SourceOffset> for SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}

impl From<&SourceSpan> for miette::SourceSpan {
    fn from(span: &SourceSpan) -> Self {
        Self::new((&span.offset).into(), (&span.length).into())
    }
}
impl From<SourceSpan> for miette::SourceSpan {
    fn from(span: SourceSpan) -> Self {
        Self::from(&span)
    }
}

impl From<Range<usize>> for SourceSpan {
    fn from(range: Range<usize>) -> Self {
        Self::range(range.start.into(), range.end.into())
    }
}
impl From<RangeInclusive<usize>> for SourceSpan {
    fn from(range: RangeInclusive<usize>) -> Self {
        Self::range_inclusive((*range.start()).into(), (*range.end()).into())
    }
}

impl From<usize> for SourceSpan {
    fn from(offset: usize) -> Self {
        Self::new(offset.into(), 1.into())
    }
}

/// 1-based line and column. Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "l{}c{}", self.line, self.column)
    }
}

#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(
                source
                    .char_indices()
                    .filter(|(_, ch)| *ch == '\n')
                    .map(|(offset, _)| offset + 1),
            )
            .collect();
        Self { line_starts }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn line_of(&self, offset: SourceOffset) -> usize {
        match self.line_starts.binary_search(&offset.byte_offset()) {
            Ok(line) => line + 1,
            Err(next_line) => next_line,
        }
    }

    pub fn position(&self, source: &str, offset: SourceOffset) -> Position {
        let line = self.line_of(offset);
        let line_start = self.line_starts[line - 1];
        let offset = offset.byte_offset().min(source.len());
        let column = source
            .get(line_start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(offset - line_start)
            + 1;
        Position { line, column }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn positions_are_one_based() {
        let source = "a = 1;\nbé = 2;\n\nc";
        let lines = LineIndex::new(source);
        assert_eq!(lines.line_count(), 4);
        assert_eq!(
            lines.position(source, 0.into()),
            Position { line: 1, column: 1 }
        );
        assert_eq!(
            lines.position(source, 7.into()),
            Position { line: 2, column: 1 }
        );
        // 'é' is two bytes wide but one column
        assert_eq!(
            lines.position(source, 10.into()),
            Position { line: 2, column: 3 }
        );
        assert_eq!(lines.line_of(source.len().into()), 4);
    }

    #[test]
    fn cover_joins_spans() {
        let a = SourceSpan::from(2..5);
        let b = SourceSpan::from(8..9);
        assert_eq!(a.cover(b), SourceSpan::from(2..9));
        assert_eq!(b.cover(a), SourceSpan::from(2..9));
    }
}
