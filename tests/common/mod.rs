//! In-memory EPUB fixtures.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub struct Chapter {
    pub href: String,
    pub label: Option<String>,
    pub body: String,
    /// Listed in the manifest and spine but left out of the archive.
    pub missing: bool,
}

/// Builds a minimal EPUB 2 archive.
pub struct EpubBuilder {
    title: String,
    creators: Vec<(String, Option<String>)>,
    chapters: Vec<Chapter>,
    extra: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            creators: Vec::new(),
            chapters: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn creator(mut self, name: &str, role: Option<&str>) -> Self {
        self.creators
            .push((name.to_string(), role.map(str::to_string)));
        self
    }

    /// Add a chapter whose markup is used verbatim.
    pub fn raw_chapter(mut self, href: &str, label: Option<&str>, markup: &str) -> Self {
        self.chapters.push(Chapter {
            href: href.to_string(),
            label: label.map(str::to_string),
            body: markup.to_string(),
            missing: false,
        });
        self
    }

    /// Add a well-formed XHTML chapter with one `<p>` per paragraph.
    pub fn chapter(self, href: &str, label: Option<&str>, paragraphs: &[&str]) -> Self {
        let body: String = paragraphs.iter().map(|p| format!("<p>{p}</p>\n")).collect();
        let markup = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{href}</title></head>
<body>
{body}</body>
</html>"#
        );
        self.raw_chapter(href, label, &markup)
    }

    pub fn missing_chapter(mut self, href: &str) -> Self {
        self.chapters.push(Chapter {
            href: href.to_string(),
            label: None,
            body: String::new(),
            missing: true,
        });
        self
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.extra.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
        zip.write_all(self.ncx().as_bytes()).unwrap();

        for chapter in self.chapters.iter().filter(|c| !c.missing) {
            zip.start_file(format!("OEBPS/{}", chapter.href).as_str(), deflated)
                .unwrap();
            zip.write_all(chapter.body.as_bytes()).unwrap();
        }

        for (name, data) in &self.extra {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    /// Write the archive into `dir` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }

    fn opf(&self) -> String {
        let creators: String = self
            .creators
            .iter()
            .map(|(name, role)| match role {
                Some(role) => format!(r#"<dc:creator opf:role="{role}">{name}</dc:creator>"#),
                None => format!("<dc:creator>{name}</dc:creator>"),
            })
            .collect();

        let mut manifest =
            String::from(r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#);
        let mut spine = String::new();
        for (i, chapter) in self.chapters.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="ch{i}" href="{}" media-type="application/xhtml+xml"/>"#,
                chapter.href
            ));
            spine.push_str(&format!(r#"<itemref idref="ch{i}"/>"#));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:opf="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>
    {creators}
  </metadata>
  <manifest>{manifest}</manifest>
  <spine toc="ncx">{spine}</spine>
</package>"#,
            self.title
        )
    }

    fn ncx(&self) -> String {
        let points: String = self
            .chapters
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.label.as_ref().map(|label| {
                    format!(
                        r#"<navPoint id="n{i}"><navLabel><text>{label}</text></navLabel><content src="{}"/></navPoint>"#,
                        c.href
                    )
                })
            })
            .collect();

        format!(
            r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>{points}</navMap>
</ncx>"#
        )
    }
}
