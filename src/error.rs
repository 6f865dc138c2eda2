//! Error types for epub-search operations.

use thiserror::Error;

/// Errors that can occur while reading, extracting or matching.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid ePub file: '{path}': {reason}")]
    InvalidEpub { path: String, reason: String },

    /// Every strategy in an extractor's fallback chain failed.
    #[error("{strategy}: {reason}")]
    Extraction {
        strategy: &'static str,
        reason: String,
    },

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Empty search pattern")]
    EmptyPattern,

    #[error("'{0}' does not exist")]
    MissingPath(String),

    #[error("'{0}' is not an ePub")]
    NotAnEpub(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
