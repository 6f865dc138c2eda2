use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use log::{trace, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::parser::{
    CONTAINER_PATH, MEDIA_TYPE_NCX, MEDIA_TYPE_OPF, MEDIA_TYPE_XHTML, Package, parent_dir,
    parse_container, parse_ncx, parse_opf, resolve_path,
};
use crate::error::{Error, Result};
use crate::util::decode_xml;

/// One content document of a book, in spine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUnit {
    /// Full path inside the archive.
    pub path: String,
    /// Table-of-contents label, if the NCX names this document.
    pub label: Option<String>,
    /// Raw document bytes.
    pub markup: Vec<u8>,
}

/// An open EPUB: title, author and a lazily read sequence of content
/// documents.
///
/// Structural problems found while opening (not a ZIP, no OPF, no title, no
/// manifest) are fatal and reported as [`Error::InvalidEpub`]. Problems with
/// individual content documents are collected as [`Epub::warnings`] instead.
///
/// # Example
///
/// ```no_run
/// use epub_search::epub::Epub;
///
/// let mut book = Epub::open("path/to/book.epub")?;
/// println!("{} by {:?}", book.title(), book.author());
/// for unit in book.contents() {
///     println!("{} ({} bytes)", unit.path, unit.markup.len());
/// }
/// # Ok::<(), epub_search::Error>(())
/// ```
pub struct Epub<R = File> {
    path: String,
    archive: ZipArchive<R>,
    opf_dir: String,
    title: String,
    author: Option<String>,
    package: Package,
    warnings: Vec<String>,
    /// `(archive path, label)` of units not read yet; `None` until the
    /// first call to [`Epub::contents`].
    pending: Option<VecDeque<(String, Option<String>)>>,
    produced: Vec<Arc<ContentUnit>>,
}

impl Epub<File> {
    /// Open an EPUB file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().to_string_lossy().into_owned();
        let file = File::open(path.as_ref()).map_err(|e| invalid(&display, e.to_string()))?;
        Self::from_reader(display, file)
    }
}

impl<R: Read + Seek> Epub<R> {
    /// Open an EPUB from any [`Read`] + [`Seek`] source. `path` is only used
    /// for reporting.
    pub fn from_reader(path: impl Into<String>, reader: R) -> Result<Self> {
        let path = path.into();
        let mut archive =
            ZipArchive::new(reader).map_err(|_| invalid(&path, "File is not an ePub file"))?;

        let opf_path = find_opf_path(&path, &mut archive)?;
        let opf = read_entry(&mut archive, &opf_path)
            .map_err(|e| invalid(&path, format!("Failed to open '{opf_path}': {e}")))?;
        let package = parse_opf(&decode_xml(&opf))
            .map_err(|e| invalid(&path, format!("Failed to parse '{opf_path}': {e}")))?;

        let Some(metadata) = &package.metadata else {
            return Err(invalid(&path, "Failed to find metadata"));
        };
        let Some(title) = metadata.title.clone() else {
            return Err(invalid(&path, "Failed to find title"));
        };
        let author = metadata.author().map(str::to_string);

        if package.manifest.is_empty() {
            return Err(invalid(
                &path,
                format!("Failed to find items in '{opf_path}'"),
            ));
        }

        Ok(Self {
            path,
            archive,
            opf_dir: parent_dir(&opf_path).to_string(),
            title,
            author,
            package,
            warnings: Vec::new(),
            pending: None,
            produced: Vec::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Non-fatal problems found so far. Contents are read lazily, so this
    /// is only complete once [`Epub::contents`] has been exhausted.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Record a non-fatal problem.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        warn!("{}: {warning}", self.path);
        self.warnings.push(warning);
    }

    /// Read an entry of the archive by its full path.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        read_entry(&mut self.archive, path)
    }

    /// Content documents in spine order.
    ///
    /// Documents are read on demand and cached, so iterating again replays
    /// the cached units before reading any further ones. Documents that
    /// cannot be read are skipped with a warning.
    pub fn contents(&mut self) -> Contents<'_, R> {
        if self.pending.is_none() {
            let units = self.spine_units();
            self.pending = Some(units);
        }
        Contents {
            epub: self,
            index: 0,
        }
    }

    fn spine_units(&mut self) -> VecDeque<(String, Option<String>)> {
        let labels = self.labels();

        if self.package.spine.is_empty() {
            self.add_warning("Failed to find contents");
            return VecDeque::new();
        }

        let manifest = &self.package.manifest;
        self.package
            .spine
            .iter()
            .filter_map(|idref| manifest.get(idref))
            .filter(|item| item.media_type == MEDIA_TYPE_XHTML)
            .map(|item| {
                let label = labels.get(&resolve_path("", &item.href)).cloned();
                (resolve_path(&self.opf_dir, &item.href), label)
            })
            .collect()
    }

    /// NCX labels keyed by path relative to the OPF directory.
    fn labels(&mut self) -> HashMap<String, String> {
        let toc = self
            .package
            .toc_id
            .as_ref()
            .and_then(|id| self.package.manifest.get(id))
            .filter(|item| item.media_type == MEDIA_TYPE_NCX)
            .map(|item| item.href.clone());
        let Some(toc_href) = toc else {
            return HashMap::new();
        };

        let ncx_path = resolve_path(&self.opf_dir, &toc_href);
        let ncx = match self.read(&ncx_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.add_warning(format!("Failed to open '{ncx_path}': {e}"));
                return HashMap::new();
            }
        };
        let entries = match parse_ncx(&decode_xml(&ncx)) {
            Ok(entries) => entries,
            Err(e) => {
                self.add_warning(format!("Failed to parse '{ncx_path}': {e}"));
                return HashMap::new();
            }
        };

        let ncx_dir = parent_dir(&toc_href);
        let mut labels = HashMap::with_capacity(entries.len());
        for (src, label) in entries {
            labels.entry(resolve_path(ncx_dir, &src)).or_insert(label);
        }
        labels
    }

    fn next_unit(&mut self) -> Option<Arc<ContentUnit>> {
        loop {
            let (path, label) = self.pending.as_mut()?.pop_front()?;

            match self.read(&path) {
                Ok(markup) => {
                    trace!("{}: read {path} ({} bytes)", self.path, markup.len());
                    let unit = Arc::new(ContentUnit {
                        path,
                        label,
                        markup,
                    });
                    self.produced.push(Arc::clone(&unit));
                    return Some(unit);
                }
                Err(e) => self.add_warning(format!("Failed to open '{path}': {e}")),
            }
        }
    }
}

/// Iterator returned by [`Epub::contents`].
pub struct Contents<'a, R> {
    epub: &'a mut Epub<R>,
    index: usize,
}

impl<R: Read + Seek> Contents<'_, R> {
    /// Record a warning against the book while iterating.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.epub.add_warning(warning);
    }
}

impl<R: Read + Seek> Iterator for Contents<'_, R> {
    type Item = Arc<ContentUnit>;

    fn next(&mut self) -> Option<Arc<ContentUnit>> {
        let unit = match self.epub.produced.get(self.index) {
            Some(unit) => Arc::clone(unit),
            None => self.epub.next_unit()?,
        };
        self.index += 1;
        Some(unit)
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> Error {
    Error::InvalidEpub {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// First rootfile with the OPF media type; any others are alternate
/// renditions.
fn find_opf_path<R: Read + Seek>(path: &str, archive: &mut ZipArchive<R>) -> Result<String> {
    let container = read_entry(archive, CONTAINER_PATH)
        .map_err(|e| invalid(path, format!("Failed to open '{CONTAINER_PATH}': {e}")))?;
    let rootfiles = parse_container(&decode_xml(&container))
        .map_err(|e| invalid(path, format!("Failed to parse '{CONTAINER_PATH}': {e}")))?;

    if rootfiles.is_empty() {
        return Err(invalid(
            path,
            format!("Failed to find rootfile in '{CONTAINER_PATH}'"),
        ));
    }

    rootfiles
        .into_iter()
        .find(|r| r.media_type.as_deref() == Some(MEDIA_TYPE_OPF))
        .and_then(|r| r.full_path)
        .ok_or_else(|| {
            invalid(
                path,
                format!("Failed to find full-path for rootfile in '{CONTAINER_PATH}'"),
            )
        })
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<Vec<u8>> {
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Some archives store names still percent-encoded
    let encoded: String =
        percent_encoding::utf8_percent_encode(path, ENTRY_NAME).collect();
    if encoded == path {
        return Err(ZipError::FileNotFound.into());
    }

    let mut file = archive.by_name(&encoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Characters a packager may have left encoded in entry names.
const ENTRY_NAME: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');
