//! Markup-to-text extraction with a sticky fallback chain.
//!
//! A [`TextExtractor`] owns an ordered list of [`Strategy`] implementations,
//! strictest first. When the current strategy fails on a document the
//! extractor advances to the next one and never goes back, so a collection of
//! sloppy documents only pays for the failing strict parse once.
//!
//! Every strategy feeds the same [`TextCollector`]: nothing is captured until
//! the `<body>` start tag, and the end of each block element (`p`, `div`,
//! `br`, `h1`..`h6`) emits exactly one `\n`. Line breaks already present in
//! the markup are flattened to spaces first, so every `\n` in the output marks
//! a block boundary.

mod html;
mod xml;

use log::debug;

use crate::error::{Error, Result};
use crate::util::decode_xml;

pub use html::Html;
pub use xml::{LenientXml, StrictXml};

/// One parsing strategy in the fallback chain.
pub trait Strategy: Send {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Convert flattened markup into text, or fail with
    /// [`Error::Extraction`] if this strategy cannot parse it.
    fn extract(&mut self, markup: &str) -> Result<String>;
}

/// Converts content documents to plain text.
///
/// Each worker must own its own instance; the fallback position is private
/// state and only ever moves forward.
pub struct TextExtractor {
    strategies: Vec<Box<dyn Strategy>>,
    current: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor {
    /// Strict XML first, then recovering XML, then the HTML tokenizer.
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(StrictXml),
            Box::new(LenientXml),
            Box::new(Html),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            strategies,
            current: 0,
        }
    }

    /// Name of the strategy the next call will start with.
    pub fn current_strategy(&self) -> Option<&'static str> {
        self.strategies.get(self.current).map(|s| s.name())
    }

    /// Extract text from raw (undecoded) markup bytes.
    pub fn extract(&mut self, markup: &[u8]) -> Result<String> {
        let decoded = decode_xml(markup);
        self.extract_str(&decoded)
    }

    /// Extract text from already decoded markup.
    pub fn extract_str(&mut self, markup: &str) -> Result<String> {
        let flattened = flatten_line_breaks(markup);

        loop {
            let Some(strategy) = self.strategies.get_mut(self.current) else {
                return Err(Error::Extraction {
                    strategy: "none",
                    reason: "no extraction strategy available".into(),
                });
            };

            let result = strategy.extract(&flattened);
            let failed = strategy.name();

            match result {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let Some(next) = self.strategies.get(self.current + 1) else {
                        return Err(err);
                    };
                    debug!("{failed} failed ({err}), switching to {}", next.name());
                    self.current += 1;
                }
            }
        }
    }
}

fn flatten_line_breaks(markup: &str) -> String {
    markup.replace(['\n', '\r'], " ")
}

const BLOCK_ELEMENTS: &[&[u8]] = &[b"p", b"div", b"br", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6"];

/// Accumulates body text from a stream of start/end/character events.
#[derive(Debug, Default)]
pub(crate) struct TextCollector {
    in_body: bool,
    text: String,
}

impl TextCollector {
    pub fn start(&mut self, name: &[u8]) {
        if !self.in_body && name.eq_ignore_ascii_case(b"body") {
            self.in_body = true;
        }
    }

    pub fn end(&mut self, name: &[u8]) {
        if self.in_body && is_block(name) {
            self.text.push('\n');
        }
    }

    pub fn text(&mut self, data: &str) {
        if !self.in_body {
            return;
        }
        // Only block ends may produce line breaks
        if data.contains(['\n', '\r']) {
            self.text.push_str(&flatten_line_breaks(data));
        } else {
            self.text.push_str(data);
        }
    }

    pub fn push_char(&mut self, c: char) {
        if self.in_body {
            self.text.push(if c == '\n' || c == '\r' { ' ' } else { c });
        }
    }

    pub fn finish(self) -> String {
        self.text
    }
}

fn is_block(name: &[u8]) -> bool {
    BLOCK_ELEMENTS.iter().any(|b| name.eq_ignore_ascii_case(b))
}
