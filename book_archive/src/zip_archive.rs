use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use zip::read::ZipArchive;
use zip::result::ZipError;

use crate::prelude::*;
use crate::{blocking, read_entry, read_prefix};

/// An archive backend for CBZ/ZIP books.
///
/// The archive is reopened for every read, so concurrent extractions never share a
/// file cursor and the adapter supports random access.
pub struct ZipImageArchive {
    /// Path to the ZIP archive file.
    path: PathBuf,
}

impl ZipImageArchive {
    /// Create a new `ZipImageArchive` from a given path.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the CBZ/ZIP file.
    ///
    /// # Returns
    ///
    /// Returns a `ZipImageArchive` on success, or an `OpenError` if the central
    /// directory cannot be read.
    pub fn new(path: &Path) -> Result<Self, OpenError> {
        open_zip(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>, OpenError> {
    let file = File::open(path).map_err(|e| OpenError::unreadable(path, e))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
        ZipError::Io(e) => OpenError::unreadable(path, e),
        other => OpenError::corrupt(path, other),
    })
}

fn list_zip(path: &Path) -> Result<Vec<RawEntry>, OpenError> {
    let mut zip = open_zip(path)?;
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let file = match zip.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Skipping zip entry #{} in {:?}: {}", i, path, e);
                continue;
            }
        };
        let name = file.name().to_string();
        if file.is_dir() {
            entries.push(RawEntry::dir(name.trim_end_matches('/')));
            continue;
        }
        let size = file.size();
        let prefix = read_prefix(file);
        entries.push(RawEntry::file(name, size).with_prefix(prefix));
    }
    Ok(entries)
}

fn extract_zip(path: &Path, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ExtractionError::corrupt(id.as_str(), e))?;
    let file = zip.by_name(id.as_str()).map_err(|e| match e {
        ZipError::FileNotFound => ExtractionError::NotFound(id.to_string()),
        ZipError::Io(e) => ExtractionError::from(e),
        other => ExtractionError::corrupt(id.as_str(), other),
    })?;
    let declared = file.size();
    // Checksum mismatches surface as read errors.
    read_entry(file, declared, id)
}

#[async_trait::async_trait]
impl FormatAdapter for ZipImageArchive {
    fn kind(&self) -> FormatKind {
        FormatKind::Zip
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    /// List all entries of the ZIP archive in central-directory order.
    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        let path = self.path.clone();
        blocking(move || list_zip(&path)).await
    }

    /// Extract and return the raw bytes of an entry by name.
    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let path = self.path.clone();
        let id = id.clone();
        blocking(move || extract_zip(&path, &id)).await
    }
}
