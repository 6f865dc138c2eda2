//! EPUB reading: package metadata and content documents.

mod parser;
mod reader;

pub use parser::{Creator, ManifestItem, Metadata, Package, Rootfile};
pub use reader::{ContentUnit, Contents, Epub};
