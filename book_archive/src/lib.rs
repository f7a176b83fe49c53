//! Read-only image book interface over folders, ZIP, TAR, RAR, 7z and PDF containers.

pub mod classify;
pub mod error;
pub mod model;
pub mod prelude;
pub mod tool;

mod book;
pub use book::{Book, detect_format};

mod folder_archive;
pub use folder_archive::FolderImageArchive;

mod zip_archive;
pub use zip_archive::ZipImageArchive;

mod tar_archive;
pub use tar_archive::{TarCompression, TarImageArchive};

mod rar_archive;
pub use rar_archive::RarImageArchive;

mod seven_zip_archive;
pub use seven_zip_archive::SevenZipImageArchive;

mod pdf_archive;
pub use pdf_archive::{PDF_RENDER_DPI, PdfImageArchive};

use crate::prelude::*;

/// Uniform read-only view over one container format.
///
/// One adapter instance owns the handle of one open book. Adapters that cannot
/// seek to an entry report `supports_random_access() == false`, and callers must
/// not issue overlapping extractions against them.
#[async_trait::async_trait]
pub trait FormatAdapter: Send + Sync {
    fn kind(&self) -> FormatKind;

    fn supports_random_access(&self) -> bool;

    /// List every member in container order. Calling this twice yields the same list.
    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError>;

    /// Raw bytes of one member.
    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError>;
}

/// Run blocking archive I/O off the async workers.
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<tokio::task::JoinError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Largest member pulled into memory. Anything bigger is treated as corrupt.
pub const MAX_ENTRY_BYTES: u64 = 1 << 30;

/// Initial buffer size ceiling. Header sizes are only a hint.
const PREALLOC_LIMIT: u64 = 16 << 20;

/// Read one whole member whose header claims `declared` bytes.
///
/// Neither the claim nor the stream may exceed `MAX_ENTRY_BYTES`.
pub(crate) fn read_entry<R: std::io::Read>(
    reader: R,
    declared: u64,
    id: &EntryId,
) -> Result<Vec<u8>, ExtractionError> {
    use std::io::Read;

    if declared > MAX_ENTRY_BYTES {
        return Err(ExtractionError::corrupt(
            id.as_str(),
            format!("declared size {} exceeds {} bytes", declared, MAX_ENTRY_BYTES),
        ));
    }
    let mut buf = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
    reader
        .take(MAX_ENTRY_BYTES + 1)
        .read_to_end(&mut buf)
        .map_err(|e| ExtractionError::corrupt(id.as_str(), e))?;
    if buf.len() as u64 > MAX_ENTRY_BYTES {
        return Err(ExtractionError::corrupt(
            id.as_str(),
            format!("more than {} bytes", MAX_ENTRY_BYTES),
        ));
    }
    Ok(buf)
}

/// Read at most `classify::PREFIX_LEN` bytes for sniffing. Errors yield an empty prefix.
pub(crate) fn read_prefix<R: std::io::Read>(reader: R) -> Vec<u8> {
    use std::io::Read;

    let mut prefix = Vec::with_capacity(classify::PREFIX_LEN);
    match reader
        .take(classify::PREFIX_LEN as u64)
        .read_to_end(&mut prefix)
    {
        Ok(_) => prefix,
        Err(e) => {
            log::debug!("Could not sniff entry: {}", e);
            Vec::new()
        }
    }
}
