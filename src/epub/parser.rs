//! EPUB package parsing (container.xml, OPF, NCX)

use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::error::Result;
use crate::util::{local_name, resolve_entity};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";

pub const MEDIA_TYPE_NCX: &str = "application/x-dtbncx+xml";
pub const MEDIA_TYPE_OPF: &str = "application/oebps-package+xml";
pub const MEDIA_TYPE_XHTML: &str = "application/xhtml+xml";

/// A `<rootfile>` entry of container.xml.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rootfile {
    pub full_path: Option<String>,
    pub media_type: Option<String>,
}

/// `<dc:creator>` with its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub name: String,
    pub is_author: bool,
}

/// The parts of `<metadata>` used for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub creators: Vec<Creator>,
}

impl Metadata {
    /// The first creator, unless a later one is explicitly marked as the
    /// author.
    pub fn author(&self) -> Option<&str> {
        let (first, rest) = self.creators.split_first()?;
        let author = rest.iter().find(|c| c.is_author).unwrap_or(first);
        Some(&author.name)
    }
}

/// Manifest entry; `href` is percent-decoded and relative to the OPF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub href: String,
    pub media_type: String,
}

/// Parsed OPF package document.
#[derive(Debug, Default)]
pub struct Package {
    /// `None` when the package has no `<metadata>` element.
    pub metadata: Option<Metadata>,
    /// Maps manifest id -> item. Items missing id, href or media-type are
    /// left out.
    pub manifest: HashMap<String, ManifestItem>,
    /// `toc` attribute of the first `<spine>`.
    pub toc_id: Option<String>,
    /// `idref` of every `<itemref>`, in reading order.
    pub spine: Vec<String>,
}

/// Parse META-INF/container.xml into its rootfile entries, in order.
pub fn parse_container(content: &str) -> Result<Vec<Rootfile>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().expand_empty_elements = true;

    let mut rootfiles = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                rootfiles.push(Rootfile {
                    full_path: attribute(&e, b"full-path")?,
                    media_type: attribute(&e, b"media-type")?,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rootfiles)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Creator,
}

/// Parse an OPF package document.
pub fn parse_opf(content: &str) -> Result<Package> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().expand_empty_elements = true;

    let mut package = Package::default();
    let mut metadata: Option<Metadata> = None;
    let mut in_metadata = false;
    let mut seen_spine = false;

    let mut field: Option<Field> = None;
    let mut is_author = false;
    let mut buf = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    // Only the first <metadata> counts
                    b"metadata" if package.metadata.is_none() && metadata.is_none() => {
                        in_metadata = true;
                        metadata = Some(Metadata::default());
                    }
                    b"title" if in_metadata => {
                        field = Some(Field::Title);
                        buf.clear();
                    }
                    b"creator" if in_metadata => {
                        field = Some(Field::Creator);
                        is_author = attribute(&e, b"role")?.as_deref() == Some("aut");
                        buf.clear();
                    }
                    b"item" => {
                        let id = attribute(&e, b"id")?;
                        let href = attribute(&e, b"href")?;
                        let media_type = attribute(&e, b"media-type")?;

                        if let (Some(id), Some(href), Some(media_type)) = (id, href, media_type) {
                            let href = percent_decode_str(&href).decode_utf8_lossy().into_owned();
                            package
                                .manifest
                                .insert(id, ManifestItem { href, media_type });
                        }
                    }
                    b"spine" => {
                        if !seen_spine {
                            package.toc_id = attribute(&e, b"toc")?;
                            seen_spine = true;
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attribute(&e, b"idref")? {
                            package.spine.push(idref);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) if field.is_some() => {
                buf.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::CData(e) if field.is_some() => {
                buf.push_str(&String::from_utf8_lossy(&e));
            }
            Event::GeneralRef(e) if field.is_some() => {
                if let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    buf.push(c);
                }
            }
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"metadata" if in_metadata => {
                        in_metadata = false;
                        package.metadata = metadata.take();
                    }
                    b"title" if field == Some(Field::Title) => {
                        field = None;
                        if let Some(meta) = metadata.as_mut()
                            && meta.title.is_none()
                            && !buf.is_empty()
                        {
                            meta.title = Some(buf.trim().to_string());
                        }
                    }
                    b"creator" if field == Some(Field::Creator) => {
                        field = None;
                        let name = buf.trim();
                        if let Some(meta) = metadata.as_mut()
                            && !name.is_empty()
                        {
                            meta.creators.push(Creator {
                                name: name.to_string(),
                                is_author,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Unterminated <metadata>
    if package.metadata.is_none() {
        package.metadata = metadata;
    }

    Ok(package)
}

/// Parse an NCX document into `(src, label)` pairs in document order.
///
/// `src` is percent-decoded with any fragment removed; labels are trimmed.
/// Nav points without a label or a `<content src>` are skipped.
pub fn parse_ncx(content: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().expand_empty_elements = true;

    struct NavPoint {
        slot: usize,
        label: Option<String>,
        src: Option<String>,
    }

    let mut slots: Vec<Option<(String, String)>> = Vec::new();
    let mut stack: Vec<NavPoint> = Vec::new();
    let mut in_label = false;
    let mut capturing = false;
    let mut buf = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"navPoint" => {
                        stack.push(NavPoint {
                            slot: slots.len(),
                            label: None,
                            src: None,
                        });
                        slots.push(None);
                    }
                    b"navLabel" => in_label = true,
                    b"text" if in_label => {
                        if stack.last().is_some_and(|p| p.label.is_none()) {
                            capturing = true;
                            buf.clear();
                        }
                    }
                    b"content" => {
                        if let Some(point) = stack.last_mut()
                            && point.src.is_none()
                        {
                            point.src = attribute(&e, b"src")?;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) if capturing => {
                buf.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::CData(e) if capturing => {
                buf.push_str(&String::from_utf8_lossy(&e));
            }
            Event::GeneralRef(e) if capturing => {
                if let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    buf.push(c);
                }
            }
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"navLabel" => in_label = false,
                    b"text" if capturing => {
                        capturing = false;
                        if let Some(point) = stack.last_mut() {
                            point.label = Some(buf.trim().to_string());
                        }
                    }
                    b"navPoint" => {
                        if let Some(point) = stack.pop()
                            && let (Some(label), Some(src)) = (point.label, point.src)
                        {
                            slots[point.slot] = Some((content_key(&src), label));
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Percent-decode an NCX `src` and drop its fragment.
fn content_key(src: &str) -> String {
    let path = src.split_once('#').map_or(src, |(path, _)| path);
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Unescaped value of the attribute whose local name is `key`.
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes().flatten() {
        if local_name(attr.key.as_ref()) == key {
            let raw = String::from_utf8(attr.value.to_vec())?;
            let value = match unescape(&raw) {
                Ok(Cow::Owned(s)) => s,
                // Leave undecodable entities as written
                Ok(Cow::Borrowed(_)) | Err(_) => raw,
            };
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Join `href` onto the archive directory `base`, resolving `.` and `..`.
pub fn resolve_path(base: &str, href: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(segment),
        }
    }

    parts.join("/")
}

/// Directory part of an archive path (`""` at the root).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>  Moby Dick  </dc:title>
    <dc:title>Ignored Subtitle</dc:title>
    <dc:creator opf:role="edt">Some Editor</dc:creator>
    <dc:creator opf:role="aut">Herman Melville</dc:creator>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="text/chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/chapter2.xhtml" media-type="application/xhtml+xml"/>
    <item id="broken" href="missing-type.xhtml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    #[test]
    fn test_parse_container_keeps_order() {
        let xml = r#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles>
    <rootfile full-path="alt/view.pdf" media-type="application/pdf"/>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        let rootfiles = parse_container(xml).unwrap();
        assert_eq!(rootfiles.len(), 2);
        assert_eq!(rootfiles[1].full_path.as_deref(), Some("OEBPS/content.opf"));
        assert_eq!(rootfiles[1].media_type.as_deref(), Some(MEDIA_TYPE_OPF));
    }

    #[test]
    fn test_parse_opf_metadata() {
        let package = parse_opf(OPF).unwrap();
        let metadata = package.metadata.unwrap();

        assert_eq!(metadata.title.as_deref(), Some("Moby Dick"));
        assert_eq!(metadata.creators.len(), 2);
        assert_eq!(metadata.author(), Some("Herman Melville"));
    }

    #[test]
    fn test_parse_opf_manifest_and_spine() {
        let package = parse_opf(OPF).unwrap();

        assert_eq!(package.manifest.len(), 3);
        assert_eq!(package.manifest["c1"].href, "text/chapter 1.xhtml");
        assert!(!package.manifest.contains_key("broken"));
        assert_eq!(package.toc_id.as_deref(), Some("ncx"));
        assert_eq!(package.spine, vec!["c1", "c2"]);
    }

    #[test]
    fn test_author_defaults_to_first_creator() {
        let metadata = Metadata {
            title: None,
            creators: vec![
                Creator {
                    name: "First".into(),
                    is_author: false,
                },
                Creator {
                    name: "Second".into(),
                    is_author: false,
                },
            ],
        };
        assert_eq!(metadata.author(), Some("First"));
        assert_eq!(Metadata::default().author(), None);
    }

    #[test]
    fn test_parse_opf_without_metadata() {
        let package = parse_opf(r#"<package><manifest/></package>"#).unwrap();
        assert!(package.metadata.is_none());
    }

    #[test]
    fn test_parse_opf_title_entities() {
        let package = parse_opf(
            r#"<package><metadata><dc:title>Pride &amp; Prejudice</dc:title></metadata></package>"#,
        )
        .unwrap();
        assert_eq!(
            package.metadata.unwrap().title.as_deref(),
            Some("Pride & Prejudice")
        );
    }

    #[test]
    fn test_parse_ncx_labels() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/">
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text> Chapter One </text></navLabel>
      <content src="text/chapter%201.xhtml#start"/>
      <navPoint id="p1a" playOrder="2">
        <navLabel><text>Section</text></navLabel>
        <content src="text/section.xhtml"/>
      </navPoint>
    </navPoint>
    <navPoint id="p2" playOrder="3">
      <content src="text/unlabelled.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;
        let labels = parse_ncx(ncx).unwrap();
        assert_eq!(
            labels,
            vec![
                ("text/chapter 1.xhtml".to_string(), "Chapter One".to_string()),
                ("text/section.xhtml".to_string(), "Section".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_opf("<package><metadata></package>").is_err());
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("", "chapter.xhtml"), "chapter.xhtml");
        assert_eq!(resolve_path("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_path("OEBPS/text", "../images/a.png"), "OEBPS/images/a.png");
        assert_eq!(resolve_path("OEBPS", "./ch1.xhtml"), "OEBPS/ch1.xhtml");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("OEBPS/content.opf"), "OEBPS");
        assert_eq!(parent_dir("content.opf"), "");
        assert_eq!(parent_dir("a/b/c.opf"), "a/b");
    }
}
