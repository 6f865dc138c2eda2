//! Context groups: a slice of text plus the match spans inside it.

use std::fmt;
use std::ops::Range;

use serde::Serialize;

/// Half-open byte range `[start, end)` of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

impl MatchSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
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
}

impl From<(usize, usize)> for MatchSpan {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

/// A paragraph (or run of paragraphs) of context with every occurrence that
/// fell inside it.
///
/// Spans are sorted, non-overlapping, relative to [`MatchGroup::text`] and
/// lie on `char` boundaries. Groups are immutable; [`MatchGroup::escape`]
/// returns a new group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchGroup {
    text: String,
    spans: Vec<MatchSpan>,
}

/// One piece of a group's text, either between matches or a match itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Plain(&'a str),
    Matched(&'a str),
}

impl<'a> Segment<'a> {
    pub fn as_str(&self) -> &'a str {
        match *self {
            Segment::Plain(s) | Segment::Matched(s) => s,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Segment::Matched(_))
    }
}

impl MatchGroup {
    /// Build a group, checking that the spans are ordered, disjoint and on
    /// `char` boundaries of `text`.
    pub fn new(text: impl Into<String>, spans: Vec<MatchSpan>) -> Option<Self> {
        let text = text.into();
        let mut previous_end = 0;

        for span in &spans {
            if span.start < previous_end
                || span.end < span.start
                || span.end > text.len()
                || !text.is_char_boundary(span.start)
                || !text.is_char_boundary(span.end)
            {
                return None;
            }
            previous_end = span.end;
        }

        Some(Self { text, spans })
    }

    /// Spans must already satisfy the group invariants.
    pub(crate) fn from_parts(text: String, spans: Vec<MatchSpan>) -> Self {
        debug_assert!(Self::new(text.clone(), spans.clone()).is_some());
        Self { text, spans }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn spans(&self) -> &[MatchSpan] {
        &self.spans
    }

    /// Number of occurrences in this group.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The matched substrings, in order.
    pub fn matched(&self) -> impl Iterator<Item = &str> + '_ {
        self.spans.iter().map(|span| &self.text[span.range()])
    }

    /// Alternating plain and matched segments covering the whole text.
    ///
    /// Always starts and ends with a (possibly empty) plain segment.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            group: self,
            index: 0,
            position: 0,
            in_match: false,
            finished: false,
        }
    }

    /// Apply `transform` to every segment independently and recompute the
    /// spans against the transformed lengths.
    ///
    /// Use this for escaping that changes lengths (e.g. `&` -> `&amp;`) so the
    /// spans still select exactly the transformed matches.
    pub fn escape<F, S>(&self, mut transform: F) -> MatchGroup
    where
        F: FnMut(&str) -> S,
        S: AsRef<str>,
    {
        let mut text = String::with_capacity(self.text.len());
        let mut spans = Vec::with_capacity(self.spans.len());

        for segment in self.segments() {
            let start = text.len();
            text.push_str(transform(segment.as_str()).as_ref());

            if segment.is_match() {
                spans.push(MatchSpan::new(start, text.len()));
            }
        }

        MatchGroup { text, spans }
    }

    /// Render the text with every match wrapped in `open` / `close`.
    pub fn format(&self, open: &str, close: &str) -> String {
        let extra = (open.len() + close.len()) * self.spans.len();
        let mut out = String::with_capacity(self.text.len() + extra);

        for segment in self.segments() {
            match segment {
                Segment::Plain(s) => out.push_str(s),
                Segment::Matched(s) => {
                    out.push_str(open);
                    out.push_str(s);
                    out.push_str(close);
                }
            }
        }

        out
    }
}

impl fmt::Display for MatchGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Iterator returned by [`MatchGroup::segments`].
pub struct Segments<'a> {
    group: &'a MatchGroup,
    index: usize,
    position: usize,
    in_match: bool,
    finished: bool,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.finished {
            return None;
        }

        let text = self.group.text.as_str();

        match self.group.spans.get(self.index) {
            Some(span) if self.in_match => {
                self.in_match = false;
                self.index += 1;
                self.position = span.end;
                Some(Segment::Matched(&text[span.range()]))
            }
            Some(span) => {
                self.in_match = true;
                Some(Segment::Plain(&text[self.position..span.start]))
            }
            None => {
                self.finished = true;
                Some(Segment::Plain(&text[self.position..]))
            }
        }
    }
}
