//! Pattern matching over extracted text.
//!
//! A [`Matcher`] finds non-overlapping occurrences of a literal string or a
//! regular expression and groups them into paragraph-sized context windows.
//! Paragraphs are delimited by `\n`, which the text extractor only emits at
//! block boundaries.

mod group;

use std::borrow::Cow;

use memchr::memmem::Finder;
use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

pub use group::{MatchGroup, MatchSpan, Segment, Segments};

/// Characters that make a pattern a regular expression when pattern syntax
/// is allowed.
const REGEX_METACHARACTERS: &[char] = &[
    '.', '^', '$', '*', '+', '?', '{', '}', '\\', '[', ']', '|', '(', ')',
];

#[derive(Debug, Clone)]
enum Engine {
    /// Needle is case-folded when matching ignores case.
    Literal(Finder<'static>),
    Regex(Regex),
}

/// Compiled search pattern.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    ignore_case: bool,
    engine: Engine,
}

impl Matcher {
    /// Compile `pattern`.
    ///
    /// The pattern is only treated as a regular expression when
    /// `allow_pattern_syntax` is set *and* it contains a metacharacter;
    /// anything else is a plain substring search. Regular expressions use
    /// multi-line anchors so `^`/`$` match at paragraph boundaries.
    ///
    /// Literal `ignore_case` matching only folds characters whose lower-case
    /// form has the same UTF-8 length: `ẞ` does not match `ß` and the Kelvin
    /// sign does not match `k`. Regular expressions use full Unicode case
    /// folding.
    pub fn new(pattern: &str, ignore_case: bool, allow_pattern_syntax: bool) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::EmptyPattern);
        }

        let engine = if allow_pattern_syntax && pattern.contains(REGEX_METACHARACTERS) {
            let regex = RegexBuilder::new(pattern)
                .multi_line(true)
                .case_insensitive(ignore_case)
                .build()?;
            Engine::Regex(regex)
        } else if ignore_case {
            Engine::Literal(Finder::new(fold_case(pattern).as_bytes()).into_owned())
        } else {
            Engine::Literal(Finder::new(pattern.as_bytes()).into_owned())
        };

        Ok(Self {
            pattern: pattern.to_string(),
            ignore_case,
            engine,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.engine, Engine::Regex(_))
    }

    /// Number of non-overlapping occurrences in `text`.
    pub fn count(&self, text: &str) -> usize {
        match &self.engine {
            Engine::Literal(finder) => {
                let haystack = self.literal_haystack(text);
                finder.find_iter(haystack.as_bytes()).count()
            }
            Engine::Regex(regex) => regex.find_iter(text).count(),
        }
    }

    /// Occurrence spans in document order, relative to `text`.
    pub fn find_iter<'m, 'h>(&'m self, text: &'h str) -> Occurrences<'m, 'h> {
        match &self.engine {
            Engine::Literal(finder) => Occurrences::Literal {
                finder,
                haystack: self.literal_haystack(text),
                position: 0,
            },
            Engine::Regex(regex) => Occurrences::Regex(regex.find_iter(text)),
        }
    }

    /// Lazily group the occurrences in `text` into context windows.
    ///
    /// Each occurrence's window runs from just after the previous `\n` to
    /// just before the next one, trimmed of surrounding whitespace. An
    /// occurrence ending inside the currently open window joins that group;
    /// otherwise the open group is emitted and a new one starts.
    pub fn groups<'m, 'h>(&'m self, text: &'h str) -> Groups<'m, 'h> {
        Groups {
            text,
            occurrences: self.find_iter(text),
            open: None,
        }
    }

    fn literal_haystack<'h>(&self, text: &'h str) -> Cow<'h, str> {
        if self.ignore_case {
            fold_case(text)
        } else {
            Cow::Borrowed(text)
        }
    }
}

/// Lower-case `text` without moving any byte offsets.
///
/// Characters whose lower-case form has a different UTF-8 length (or expands
/// to several characters) are left alone, so offsets found in the folded text
/// index the original directly.
fn fold_case(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| c.is_uppercase()) {
        return Cow::Borrowed(text);
    }

    let mut folded = String::with_capacity(text.len());
    for c in text.chars() {
        let mut lower = c.to_lowercase();
        match (lower.next(), lower.next()) {
            (Some(l), None) if l.len_utf8() == c.len_utf8() => folded.push(l),
            _ => folded.push(c),
        }
    }
    Cow::Owned(folded)
}

/// Iterator over occurrence spans, returned by [`Matcher::find_iter`].
pub enum Occurrences<'m, 'h> {
    Literal {
        finder: &'m Finder<'static>,
        haystack: Cow<'h, str>,
        position: usize,
    },
    Regex(regex::Matches<'m, 'h>),
}

impl Iterator for Occurrences<'_, '_> {
    type Item = MatchSpan;

    fn next(&mut self) -> Option<MatchSpan> {
        match self {
            Occurrences::Literal {
                finder,
                haystack,
                position,
            } => {
                let rest = haystack.as_bytes().get(*position..)?;
                let start = *position + finder.find(rest)?;
                let end = start + finder.needle().len();
                *position = end;
                Some(MatchSpan::new(start, end))
            }
            Occurrences::Regex(matches) => matches.next().map(|m| MatchSpan::new(m.start(), m.end())),
        }
    }
}

struct OpenGroup {
    start: usize,
    end: usize,
    spans: Vec<MatchSpan>,
}

/// Lazy sequence of [`MatchGroup`]s, returned by [`Matcher::groups`].
pub struct Groups<'m, 'h> {
    text: &'h str,
    occurrences: Occurrences<'m, 'h>,
    open: Option<OpenGroup>,
}

impl Iterator for Groups<'_, '_> {
    type Item = MatchGroup;

    fn next(&mut self) -> Option<MatchGroup> {
        loop {
            let Some(span) = self.occurrences.next() else {
                return self.open.take().map(|group| self.close(group));
            };

            if let Some(open) = &mut self.open
                && span.end <= open.end
            {
                open.spans
                    .push(MatchSpan::new(span.start - open.start, span.end - open.start));
                continue;
            }

            let (start, end) = paragraph_window(self.text, span);
            let next = OpenGroup {
                start,
                end,
                spans: vec![MatchSpan::new(span.start - start, span.end - start)],
            };

            if let Some(previous) = self.open.replace(next) {
                return Some(self.close(previous));
            }
        }
    }
}

impl Groups<'_, '_> {
    fn close(&self, group: OpenGroup) -> MatchGroup {
        MatchGroup::from_parts(self.text[group.start..group.end].to_string(), group.spans)
    }
}

/// The `\n`-delimited window around `span`, with whitespace trimmed from both
/// ends but never past the span itself.
fn paragraph_window(text: &str, span: MatchSpan) -> (usize, usize) {
    let start = text[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let end = text[span.end..]
        .find('\n')
        .map_or(text.len(), |i| span.end + i);

    let start = span.start - text[start..span.start].trim_start().len();
    let end = span.end + text[span.end..end].trim_end().len();

    (start, end)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn spans(group: &MatchGroup) -> Vec<(usize, usize)> {
        group.spans().iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn test_literal_count_is_non_overlapping() {
        let m = Matcher::new("ab", false, false).unwrap();
        assert_eq!(m.count("ababab"), 3);

        let m = Matcher::new("aa", false, false).unwrap();
        assert_eq!(m.count("aaaa"), 2);
        assert_eq!(m.count("aaa"), 1);
        assert_eq!(m.count(""), 0);
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        assert!(matches!(Matcher::new("", false, true), Err(Error::EmptyPattern)));
    }

    #[test]
    fn test_mode_selection() {
        assert!(!Matcher::new("a.b", false, false).unwrap().is_regex());
        assert!(!Matcher::new("plain words", false, true).unwrap().is_regex());
        assert!(Matcher::new("a.b", false, true).unwrap().is_regex());
        assert!(Matcher::new("(x)", false, true).unwrap().is_regex());

        // Without pattern syntax the dot is literal
        let m = Matcher::new("a.b", false, false).unwrap();
        assert_eq!(m.count("a.b axb"), 1);
        let m = Matcher::new("a.b", false, true).unwrap();
        assert_eq!(m.count("a.b axb"), 2);
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(Matcher::new("(unclosed", false, true), Err(Error::Pattern(_))));
    }

    #[test]
    fn test_ignore_case_literal() {
        let m = Matcher::new("Whale", true, false).unwrap();
        assert_eq!(m.count("whale WHALE wHaLe"), 3);

        let m = Matcher::new("Whale", false, false).unwrap();
        assert_eq!(m.count("whale WHALE wHaLe Whale"), 1);
    }

    #[test]
    fn test_ignore_case_keeps_original_text() {
        let m = Matcher::new("captain", true, false).unwrap();
        let groups: Vec<_> = m.groups("The CAPTAIN said hi.").collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text(), "The CAPTAIN said hi.");
        assert_eq!(groups[0].matched().collect::<Vec<_>>(), vec!["CAPTAIN"]);
    }

    #[test]
    fn test_ignore_case_non_ascii() {
        let m = Matcher::new("\u{c9}T\u{c9}", true, false).unwrap();
        let text = "un \u{e9}t\u{e9} chaud";
        assert_eq!(m.count(text), 1);

        let groups: Vec<_> = m.groups(text).collect();
        assert_eq!(groups[0].matched().collect::<Vec<_>>(), vec!["\u{e9}t\u{e9}"]);
    }

    #[test]
    fn test_ignore_case_skips_length_changing_folds() {
        let kelvin = Matcher::new("\u{212a}elvin", true, false).unwrap();
        assert_eq!(kelvin.count("kelvin"), 0);
        assert_eq!(kelvin.count("\u{212a}ELVIN"), 1);

        let sharp_s = Matcher::new("stra\u{1e9e}e", true, false).unwrap();
        assert_eq!(sharp_s.count("stra\u{df}e"), 0);

        // Same length either way
        let e_acute = Matcher::new("\u{c9}T\u{c9}", true, false).unwrap();
        assert_eq!(e_acute.count("un \u{e9}t\u{e9}"), 1);
    }

    #[test]
    fn test_fold_case_preserves_offsets() {
        // U+0130 lower-cases to two chars; it must be left alone
        let text = "\u{130}stanbul ABC";
        let folded = fold_case(text);
        assert_eq!(folded.len(), text.len());
        assert_eq!(folded, "\u{130}stanbul abc");
    }

    #[test]
    fn test_regex_ignore_case_is_conditional() {
        let m = Matcher::new("wh.le", false, true).unwrap();
        assert_eq!(m.count("whale WHALE"), 1);

        let m = Matcher::new("wh.le", true, true).unwrap();
        assert_eq!(m.count("whale WHALE"), 2);
    }

    #[test]
    fn test_regex_anchors_are_multiline() {
        let m = Matcher::new("^Call", false, true).unwrap();
        assert_eq!(m.count("Call me Ishmael.\nCall me later.\nDon't Call"), 2);

        let m = Matcher::new(r"\.$", false, true).unwrap();
        assert_eq!(m.count("one.\ntwo.\nthree"), 2);
    }

    #[test]
    fn test_groups_one_per_paragraph() {
        let m = Matcher::new("match", false, false).unwrap();
        let text = "one two match here.\n\nsecond paragraph match too.";
        let groups: Vec<_> = m.groups(text).collect();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text(), "one two match here.");
        assert_eq!(spans(&groups[0]), vec![(8, 13)]);
        assert_eq!(groups[1].text(), "second paragraph match too.");
        assert_eq!(spans(&groups[1]), vec![(17, 22)]);
    }

    #[test]
    fn test_groups_merge_within_paragraph() {
        let m = Matcher::new("cat", false, false).unwrap();
        let text = "intro\n  the cat saw a cat.  \nend";
        let groups: Vec<_> = m.groups(text).collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text(), "the cat saw a cat.");
        assert_eq!(spans(&groups[0]), vec![(4, 7), (14, 17)]);
        assert_eq!(groups[0].format("<", ">"), "the <cat> saw a <cat>.");
    }

    #[test]
    fn test_groups_trim_whitespace_only_lines() {
        let m = Matcher::new("x", false, false).unwrap();
        let groups: Vec<_> = m.groups(" \t x \n").collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text(), "x");
        assert_eq!(spans(&groups[0]), vec![(0, 1)]);
    }

    #[test]
    fn test_groups_never_trim_into_match() {
        let m = Matcher::new(r"\s+", false, true).unwrap();
        let groups: Vec<_> = m.groups("a   b").collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text(), "a   b");
        assert_eq!(spans(&groups[0]), vec![(1, 4)]);
    }

    #[test]
    fn test_regex_match_across_paragraphs_is_one_group() {
        let m = Matcher::new(r"end\nstart", false, true).unwrap();
        let groups: Vec<_> = m.groups("the end\nstart again\nlast").collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text(), "the end\nstart again");
        assert_eq!(spans(&groups[0]), vec![(4, 13)]);
    }

    #[test]
    fn test_groups_empty_when_no_match() {
        let m = Matcher::new("absent", false, false).unwrap();
        assert_eq!(m.groups("nothing here\nat all").count(), 0);
    }

    #[test]
    fn test_group_span_total_equals_count() {
        let m = Matcher::new("the", true, false).unwrap();
        let text = "The end.\nthe start, the middle\n\n  THE finish  ";
        let total: usize = m.groups(text).map(|g| g.len()).sum();
        assert_eq!(total, m.count(text));
        assert_eq!(total, 4);
    }

    fn naive_count(haystack: &str, needle: &str) -> usize {
        let mut count = 0;
        let mut i = 0;
        while i < haystack.len() {
            if haystack[i..].starts_with(needle) {
                count += 1;
                i += needle.len();
            } else {
                i += 1;
            }
        }
        count
    }

    proptest! {
        #[test]
        fn prop_literal_count_matches_naive_scan(
            text in "[ab \n]{0,40}",
            needle in "[ab]{1,3}",
        ) {
            let m = Matcher::new(&needle, false, false).unwrap();
            prop_assert_eq!(m.count(&text), naive_count(&text, &needle));
        }

        #[test]
        fn prop_groups_keep_every_occurrence(
            text in "[abAB \n]{0,40}",
            needle in "[ab]{1,2}",
            ignore_case in any::<bool>(),
        ) {
            let m = Matcher::new(&needle, ignore_case, false).unwrap();
            let groups: Vec<_> = m.groups(&text).collect();
            let total: usize = groups.iter().map(MatchGroup::len).sum();
            prop_assert_eq!(total, m.count(&text));

            for g in &groups {
                prop_assert!(!g.is_empty());
                prop_assert_eq!(g.text().trim(), g.text());
            }
        }

        #[test]
        fn prop_format_round_trips(
            text in "[ab \n]{0,40}",
            needle in "[ab]{1,2}",
        ) {
            let m = Matcher::new(&needle, false, false).unwrap();
            for g in m.groups(&text) {
                let formatted = g.format("<<", ">>");
                prop_assert_eq!(formatted.replace("<<", "").replace(">>", ""), g.text());
            }
        }

        #[test]
        fn prop_escape_keeps_spans_aligned(
            text in "[ab \n]{0,40}",
            needle in "[ab]{1,2}",
        ) {
            let m = Matcher::new(&needle, false, false).unwrap();
            for g in m.groups(&text) {
                prop_assert_eq!(&g.escape(|s| s.to_string()), &g);

                let escaped = g.escape(|s| s.replace('a', "<a>"));
                let expected: Vec<String> = g.matched().map(|s| s.replace('a', "<a>")).collect();
                prop_assert_eq!(escaped.matched().collect::<Vec<_>>(), expected);
            }
        }
    }
}
