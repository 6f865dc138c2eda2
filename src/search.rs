//! Searching books: one [`SearchResult`] per EPUB.
//!
//! [`search`] fans paths out over a [`WorkerPool`]; every worker opens its
//! book, extracts text with its own [`TextExtractor`] and counts (or groups)
//! matches. Expected failures never leave the worker as errors: a book that
//! cannot be opened becomes [`SearchResult::error`], a document that cannot be
//! extracted becomes a warning.

use std::io::{Read, Seek};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::epub::Epub;
use crate::error::Result;
use crate::extract::TextExtractor;
use crate::matching::{MatchGroup, Matcher};
use crate::pool::{ResultStream, WorkerPool, panic_message};

/// What to search for and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub pattern: String,
    pub ignore_case: bool,
    /// Treat the pattern as a regular expression when it contains
    /// metacharacters.
    pub use_regex: bool,
    /// Collect [`LabelMatches`] context groups instead of only counting.
    pub context: bool,
}

impl SearchOptions {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn use_regex(mut self, use_regex: bool) -> Self {
        self.use_regex = use_regex;
        self
    }

    pub fn context(mut self, context: bool) -> Self {
        self.context = context;
        self
    }

    pub fn matcher(&self) -> Result<Matcher> {
        Matcher::new(&self.pattern, self.ignore_case, self.use_regex)
    }
}

/// Context groups found in one content document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMatches {
    /// Archive path of the document.
    pub path: String,
    /// Table-of-contents label, when the book has one for this document.
    pub label: Option<String>,
    pub groups: Vec<MatchGroup>,
}

impl LabelMatches {
    /// Occurrences across all groups.
    pub fn match_count(&self) -> usize {
        self.groups.iter().map(MatchGroup::len).sum()
    }
}

/// Outcome of searching one book.
///
/// Either [`error`](Self::error) is set and everything but the path is
/// empty, or the book was searched and the other fields describe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<Vec<LabelMatches>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
}

impl SearchResult {
    /// A book that could not be searched.
    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: None,
            author: None,
            match_count: 0,
            matches: None,
            error: Some(error.into()),
            warnings: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Total occurrences. With context this equals the spans across all
    /// groups.
    pub fn match_count(&self) -> usize {
        self.match_count
    }

    /// Per-document context groups; `None` unless context was requested.
    pub fn matches(&self) -> Option<&[LabelMatches]> {
        self.matches.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warnings(&self) -> Option<&[String]> {
        self.warnings.as_deref()
    }

    pub fn is_match(&self) -> bool {
        self.match_count > 0
    }
}

/// Search every path on `pool`, yielding results as books finish.
///
/// Fails up front only if the pattern is invalid or the workers cannot be
/// started; problems with individual books are reported in their results.
pub fn search<I>(
    paths: I,
    options: &SearchOptions,
    pool: &WorkerPool,
) -> Result<ResultStream<SearchResult>>
where
    I: IntoIterator<Item = String>,
{
    let matcher = Arc::new(options.matcher()?);
    let context = options.context;

    debug!(
        "searching for {:?} ({})",
        matcher.pattern(),
        if matcher.is_regex() { "regex" } else { "literal" }
    );

    let stream = pool.submit(
        move |path: String| search_guarded(&path, &matcher, context),
        paths,
    )?;
    Ok(stream)
}

/// Search one book on disk.
pub fn search_epub(path: &str, options: &SearchOptions) -> SearchResult {
    match options.matcher() {
        Ok(matcher) => search_guarded(path, &matcher, options.context),
        Err(e) => SearchResult::failed(path, e.to_string()),
    }
}

/// A panic while searching one book only fails that book.
fn search_guarded(path: &str, matcher: &Matcher, context: bool) -> SearchResult {
    panic::catch_unwind(AssertUnwindSafe(|| match Epub::open(path) {
        Ok(book) => search_book(book, matcher, context),
        Err(e) => SearchResult::failed(path, e.to_string()),
    }))
    .unwrap_or_else(|payload| {
        SearchResult::failed(
            path,
            format!(
                "internal error while searching: {}",
                panic_message(payload.as_ref())
            ),
        )
    })
}

/// Search an already opened book.
pub fn search_book<R: Read + Seek>(
    mut book: Epub<R>,
    matcher: &Matcher,
    context: bool,
) -> SearchResult {
    let mut extractor = TextExtractor::new();
    let mut match_count = 0;
    let mut matches = Vec::new();

    let mut contents = book.contents();
    while let Some(unit) = contents.next() {
        let text = match extractor.extract(&unit.markup) {
            Ok(text) => text,
            Err(e) => {
                contents.add_warning(format!("Failed to strip tags from '{}': {e}", unit.path));
                continue;
            }
        };

        if context {
            let groups: Vec<MatchGroup> = matcher.groups(&text).collect();
            if groups.is_empty() {
                continue;
            }
            let found = LabelMatches {
                path: unit.path.clone(),
                label: unit.label.clone(),
                groups,
            };
            match_count += found.match_count();
            matches.push(found);
        } else {
            match_count += matcher.count(&text);
        }
    }

    trace!("{}: {match_count} matches", book.path());

    let warnings = book.warnings();
    SearchResult {
        path: book.path().to_string(),
        title: Some(book.title().to_string()),
        author: book.author().map(str::to_string),
        match_count,
        matches: context.then_some(matches),
        error: None,
        warnings: (!warnings.is_empty()).then(|| warnings.to_vec()),
    }
}
