//! Push-style extraction over quick-xml events.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Strategy, TextCollector};
use crate::error::{Error, Result};
use crate::util::{local_name, resolve_entity, resolve_html_entity};

/// Well-formed XHTML only: mismatched or unclosed tags, a missing root
/// element and entities other than the XML predefined ones are all errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictXml;

/// Recovering XML: end tag names are not checked and stray end tags are
/// accepted. HTML named entities are resolved; names that are not entities
/// at all are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LenientXml;

impl Strategy for StrictXml {
    fn name(&self) -> &'static str {
        "strict-xml"
    }

    fn extract(&mut self, markup: &str) -> Result<String> {
        scan(markup, true, self.name())
    }
}

impl Strategy for LenientXml {
    fn name(&self) -> &'static str {
        "lenient-xml"
    }

    fn extract(&mut self, markup: &str) -> Result<String> {
        scan(markup, false, self.name())
    }
}

fn scan(markup: &str, strict: bool, strategy: &'static str) -> Result<String> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.expand_empty_elements = true;
    config.check_end_names = strict;
    config.allow_unmatched_ends = !strict;

    let fail = |reason: String| Error::Extraction { strategy, reason };

    let mut collector = TextCollector::default();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                seen_root = true;
                collector.start(local_name(e.name().as_ref()));
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                collector.end(local_name(e.name().as_ref()));
            }
            Ok(Event::Text(e)) => {
                collector.text(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::CData(e)) => {
                collector.text(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(e.as_ref());
                match resolve_entity(&entity) {
                    Some(c) => collector.push_char(c),
                    None if strict => {
                        return Err(fail(format!(
                            "undefined entity '&{entity};' at position {}",
                            reader.buffer_position()
                        )));
                    }
                    None => {
                        if let Some((first, second)) = resolve_html_entity(&entity) {
                            collector.push_char(first);
                            if let Some(c) = second {
                                collector.push_char(c);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(fail(format!(
                    "{e} at position {}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if strict {
        if !seen_root {
            return Err(fail("no element found".into()));
        }
        if depth > 0 {
            return Err(fail(format!("{depth} unclosed element(s) at end of document")));
        }
    }

    Ok(collector.finish())
}
