//! Last-resort extraction through the html5ever tokenizer.
//!
//! The tokenizer recovers from anything, so this strategy only fails if the
//! tokenizer pauses before the end of the input.

use std::cell::RefCell;

use html5ever::tendril::StrTendril;
use html5ever::TokenizerResult;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

use super::{Strategy, TextCollector};
use crate::error::{Error, Result};

/// HTML5 tokenizer: handles unquoted attributes, HTML named entities, void
/// elements and arbitrary tag soup.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html;

impl Strategy for Html {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extract(&mut self, markup: &str) -> Result<String> {
        let tokenizer = Tokenizer::new(CollectorSink::default(), TokenizerOpts::default());

        let input = BufferQueue::default();
        input.push_back(StrTendril::from_slice(markup));
        match tokenizer.feed(&input) {
            TokenizerResult::Done => {}
            // Only sinks that ask for script or encoding pauses get these
            TokenizerResult::Script(()) | TokenizerResult::EncodingIndicator(_) => {
                return Err(Error::Extraction {
                    strategy: self.name(),
                    reason: "tokenizer stopped before the end of the input".into(),
                });
            }
        }
        tokenizer.end();

        Ok(tokenizer.sink.collector.take().finish())
    }
}

/// Uses interior mutability because html5ever's TokenSink trait takes
/// `&self`.
#[derive(Default)]
struct CollectorSink {
    collector: RefCell<TextCollector>,
}

impl TokenSink for CollectorSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        let mut collector = self.collector.borrow_mut();

        match token {
            Token::TagToken(tag) => {
                let name = tag.name.as_bytes();
                match tag.kind {
                    // <br> is void in HTML: its start tag is the whole element
                    TagKind::StartTag if name.eq_ignore_ascii_case(b"br") => {
                        collector.end(name);
                    }
                    TagKind::StartTag => {
                        collector.start(name);
                        if tag.self_closing {
                            collector.end(name);
                        }
                    }
                    TagKind::EndTag if name.eq_ignore_ascii_case(b"br") => {}
                    TagKind::EndTag => collector.end(name),
                }
            }
            Token::CharacterTokens(text) => collector.text(&text),
            _ => {}
        }

        TokenSinkResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_soup() {
        let text = Html
            .extract("<html><body><p>one<p>two</div><b>bold</i></body>")
            .unwrap();
        // No implied end tags without a tree builder
        assert_eq!(text, "onetwo\nbold");
    }

    #[test]
    fn test_void_br() {
        let text = Html
            .extract("<body>a<br>b<br/>c<br></br>d</body>")
            .unwrap();
        assert_eq!(text, "a\nb\nc\nd");
    }

    #[test]
    fn test_named_entities() {
        let text = Html
            .extract("<body><p>caf&eacute;&nbsp;au&amp;lait</p></body>")
            .unwrap();
        assert_eq!(text, "caf\u{e9}\u{a0}au&lait\n");
    }

    #[test]
    fn test_unquoted_attributes() {
        let text = Html
            .extract("<body class=main><div id=x>text</div></body>")
            .unwrap();
        assert_eq!(text, "text\n");
    }

    #[test]
    fn test_script_runs_to_end_of_input() {
        let text = Html
            .extract("<body><p>a</p><script>var x = 1;</script><p>b</p></body>")
            .unwrap();
        assert_eq!(text, "a\nvar x = 1;b\n");
    }

    #[test]
    fn test_uppercase_tags() {
        let text = Html.extract("<HTML><BODY><P>loud</P></BODY></HTML>").unwrap();
        assert_eq!(text, "loud\n");
    }
}
