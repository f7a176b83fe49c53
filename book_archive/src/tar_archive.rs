use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::prelude::*;
use crate::{blocking, read_entry, read_prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
}

/// Tarballs, optionally gzip or bzip2 compressed.
///
/// A tar stream has no index, so every extraction is one sequential pass from the
/// start of the file; the adapter therefore reports no random access.
pub struct TarImageArchive {
    path: PathBuf,
    compression: TarCompression,
}

impl TarImageArchive {
    pub fn new(path: &Path, compression: TarCompression) -> Result<Self, OpenError> {
        File::open(path).map_err(|e| OpenError::unreadable(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            compression,
        })
    }

    pub fn compression(&self) -> TarCompression {
        self.compression
    }
}

fn open_stream(path: &Path, compression: TarCompression) -> std::io::Result<Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        TarCompression::None => Box::new(file),
        TarCompression::Gzip => Box::new(GzDecoder::new(file)),
        TarCompression::Bzip2 => Box::new(BzDecoder::new(file)),
    };
    Ok(Archive::new(reader))
}

/// Tar paths may carry a leading `./`; ids never do.
fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> std::io::Result<String> {
    let path = entry.path()?;
    let name = path.to_string_lossy().replace('\\', "/");
    Ok(name
        .trim_start_matches("./")
        .trim_end_matches('/')
        .to_string())
}

fn list_tar(path: &Path, compression: TarCompression) -> Result<Vec<RawEntry>, OpenError> {
    let mut archive = open_stream(path, compression).map_err(|e| OpenError::unreadable(path, e))?;
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(|e| OpenError::corrupt(path, e))? {
        let entry = entry.map_err(|e| OpenError::corrupt(path, e))?;
        let name = entry_name(&entry).map_err(|e| OpenError::corrupt(path, e))?;
        if name.is_empty() {
            continue;
        }
        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => entries.push(RawEntry::dir(name)),
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.size();
                let prefix = read_prefix(entry);
                entries.push(RawEntry::file(name, size).with_prefix(prefix));
            }
            other => log::debug!("Skipping tar member {:?} of type {:?}", name, other),
        }
    }
    Ok(entries)
}

fn extract_tar(
    path: &Path,
    compression: TarCompression,
    id: &EntryId,
) -> Result<Vec<u8>, ExtractionError> {
    let mut archive = open_stream(path, compression)?;
    let entries = archive
        .entries()
        .map_err(|e| ExtractionError::corrupt(id.as_str(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ExtractionError::corrupt(id.as_str(), e))?;
        let name = entry_name(&entry).map_err(|e| ExtractionError::corrupt(id.as_str(), e))?;
        if name != id.as_str() || !entry.header().entry_type().is_file() {
            continue;
        }
        let declared = entry.size();
        return read_entry(entry, declared, id);
    }
    Err(ExtractionError::NotFound(id.to_string()))
}

#[async_trait::async_trait]
impl FormatAdapter for TarImageArchive {
    fn kind(&self) -> FormatKind {
        match self.compression {
            TarCompression::None => FormatKind::Tar,
            TarCompression::Gzip => FormatKind::TarGz,
            TarCompression::Bzip2 => FormatKind::TarBz2,
        }
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        let path = self.path.clone();
        let compression = self.compression;
        blocking(move || list_tar(&path, compression)).await
    }

    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let path = self.path.clone();
        let compression = self.compression;
        let id = id.clone();
        blocking(move || extract_tar(&path, compression, &id)).await
    }
}
