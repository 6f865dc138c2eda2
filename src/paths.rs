//! Finding EPUB files on disk.

use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{Error, Result};

/// The EPUBs named by `path`.
///
/// A file is returned as-is if it is a ZIP archive. A directory is walked
/// recursively (following symlinks) for `*.epub` files, sorted by
/// case-insensitive path. A leading `~` expands to the home directory.
pub fn epubs_in_path(path: &str) -> Result<Vec<PathBuf>> {
    let path = expand_home(path);

    if !path.exists() {
        return Err(Error::MissingPath(path.display().to_string()));
    }

    if !path.is_dir() {
        if !is_zip(&path) {
            return Err(Error::NotAnEpub(path.display().to_string()));
        }
        return Ok(vec![path]);
    }

    // Files named *.epub that turn out not to be EPUBs are reported per book
    // while searching
    let mut found: Vec<PathBuf> = WalkDir::new(&path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".epub"))
        .map(|e| e.into_path())
        .collect();

    found.sort_by_cached_key(|p| p.to_string_lossy().to_lowercase());
    Ok(found)
}

/// Keep the first occurrence of every item, preserving order.
pub fn unique<T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return PathBuf::from(path),
    };

    match env::var_os("HOME") {
        Some(home) => {
            let mut expanded = PathBuf::from(home);
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                expanded.push(rest);
            }
            expanded
        }
        None => PathBuf::from(path),
    }
}

fn is_zip(path: &Path) -> bool {
    File::open(path)
        .ok()
        .is_some_and(|file| ZipArchive::new(file).is_ok())
}
