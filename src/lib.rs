//! # epub-search
//!
//! Parallel full-text search over collections of EPUB books.
//!
//! ## Features
//!
//! - Plain-text extraction from XHTML content documents that tolerates
//!   broken markup (strict XML, then recovering XML, then an HTML tokenizer)
//! - Literal or regular-expression matching, optionally case-insensitive
//! - Paragraph context groups with highlighted match spans
//! - A worker pool that returns per-book results as soon as they finish
//!
//! ## Quick Start
//!
//! ```no_run
//! use epub_search::{PoolConfig, SearchOptions, WorkerPool, search};
//!
//! let options = SearchOptions::new("white whale").ignore_case(true);
//! let pool = WorkerPool::new(PoolConfig::default());
//! let paths = vec!["moby-dick.epub".to_string(), "typee.epub".to_string()];
//!
//! for result in search(paths, &options, &pool)? {
//!     match result.error() {
//!         Some(error) => eprintln!("{error}"),
//!         None => println!("{}: {}", result.path(), result.match_count()),
//!     }
//! }
//! # Ok::<(), epub_search::Error>(())
//! ```
//!
//! ## Matching Without Books
//!
//! ```
//! use epub_search::{Matcher, TextExtractor};
//!
//! let mut extractor = TextExtractor::new();
//! let text = extractor
//!     .extract(b"<html><body><p>Call me Ishmael.</p><p>Some years ago</p></body></html>")
//!     .unwrap();
//!
//! let matcher = Matcher::new("ishmael", true, false).unwrap();
//! let group = matcher.groups(&text).next().unwrap();
//! assert_eq!(group.format("[", "]"), "Call me [Ishmael].");
//! ```

pub mod epub;
pub mod error;
pub mod extract;
pub mod matching;
pub mod paths;
pub mod pool;
pub mod search;
pub(crate) mod util;

pub use epub::{ContentUnit, Epub};
pub use error::{Error, Result};
pub use extract::{Strategy, TextExtractor};
pub use matching::{MatchGroup, MatchSpan, Matcher};
pub use pool::{PoolConfig, RecvTimeout, ResultStream, WorkerPool};
pub use search::{LabelMatches, SearchOptions, SearchResult, search, search_epub};
