use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::blocking;
use crate::classify::{archive_from_extension, classify_raw, sort_key, sniff_archive};
use crate::prelude::*;
use crate::{
    FolderImageArchive, PdfImageArchive, RarImageArchive, SevenZipImageArchive, TarCompression,
    TarImageArchive, ZipImageArchive,
};

/// Enough of the header to reach the tar `ustar` magic at offset 257.
const DETECT_LEN: u64 = 512;

/// One opened container viewed as an ordered list of pages.
///
/// The entry list is fixed at open time. Pages are the image entries in natural
/// order; page `n` is `entries[pages[n]]`.
pub struct Book {
    id: BookId,
    path: PathBuf,
    format: FormatKind,
    modified: Option<SystemTime>,
    adapter: Box<dyn FormatAdapter>,
    entries: Vec<Entry>,
    pages: Vec<usize>,
}

/// Work out the container format of `path`: directories first, then magic bytes,
/// then the file extension.
pub fn detect_format(path: &Path) -> Result<FormatKind, OpenError> {
    if path.is_dir() {
        return Ok(FormatKind::Directory);
    }
    let file = File::open(path).map_err(|e| OpenError::unreadable(path, e))?;
    let mut header = Vec::with_capacity(DETECT_LEN as usize);
    file.take(DETECT_LEN)
        .read_to_end(&mut header)
        .map_err(|e| OpenError::unreadable(path, e))?;

    if let Some(kind) = sniff_archive(&header) {
        return Ok(kind);
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(archive_from_extension)
        .ok_or_else(|| OpenError::UnsupportedFormat(path.to_path_buf()))
}

fn adapter_for(
    path: &Path,
    format: FormatKind,
    tools: &ToolSettings,
) -> Result<Box<dyn FormatAdapter>, OpenError> {
    Ok(match format {
        FormatKind::Directory => Box::new(FolderImageArchive::new(path)?),
        FormatKind::Zip => Box::new(ZipImageArchive::new(path)?),
        FormatKind::Tar => Box::new(TarImageArchive::new(path, TarCompression::None)?),
        FormatKind::TarGz => Box::new(TarImageArchive::new(path, TarCompression::Gzip)?),
        FormatKind::TarBz2 => Box::new(TarImageArchive::new(path, TarCompression::Bzip2)?),
        FormatKind::Rar => Box::new(RarImageArchive::new(path, &tools.rar)?),
        FormatKind::SevenZip => Box::new(SevenZipImageArchive::new(path, &tools.seven_zip)?),
        FormatKind::Pdf => Box::new(PdfImageArchive::new(path, tools)?),
    })
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl Book {
    /// Detect the format of `path`, pick its adapter and list the book.
    pub async fn open(path: &Path, tools: &ToolSettings) -> Result<Self, OpenError> {
        let owned = path.to_path_buf();
        let tools = tools.clone();
        let adapter = blocking(move || {
            let format = detect_format(&owned)?;
            log::info!("Opening {:?} as {}", owned, format);
            adapter_for(&owned, format, &tools)
        })
        .await?;
        Self::from_adapter(path, adapter).await
    }

    /// Build a book over an already constructed adapter.
    ///
    /// Fails with `EmptyBook` when the listing holds no images.
    pub async fn from_adapter(
        path: impl Into<PathBuf>,
        adapter: Box<dyn FormatAdapter>,
    ) -> Result<Self, OpenError> {
        let path = path.into();
        let raw = adapter.list_entries().await?;

        let mut entries: Vec<Entry> = raw
            .into_iter()
            .enumerate()
            .map(|(position, raw)| {
                let kind = classify_raw(&raw);
                if kind == EntryKind::Archive {
                    log::warn!("Nested archive '{}' in {:?} will not be opened", raw.id, path);
                }
                Entry {
                    sort_key: sort_key(raw.id.as_str()),
                    id: raw.id,
                    size: raw.size,
                    kind,
                    position,
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            a.sort_key
                .cmp(&b.sort_key)
                .then_with(|| a.position.cmp(&b.position))
        });

        let pages: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_image())
            .map(|(i, _)| i)
            .collect();
        if pages.is_empty() {
            log::info!("No images in {:?} ({} entries)", path, entries.len());
            return Err(OpenError::EmptyBook(path));
        }

        let book = Self {
            id: BookId::next(),
            modified: modified_at(&path),
            format: adapter.kind(),
            path,
            adapter,
            entries,
            pages,
        };
        log::info!(
            "Opened {} {:?}: {} pages of {} entries",
            book.id,
            book.path,
            book.pages.len(),
            book.entries.len()
        );
        Ok(book)
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FormatKind {
        self.format
    }

    /// Modification stamp captured at open.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Every classified entry in natural order, non-images included.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_entry(&self, page: usize) -> Option<&Entry> {
        self.pages.get(page).map(|&i| &self.entries[i])
    }

    pub fn adapter(&self) -> &dyn FormatAdapter {
        self.adapter.as_ref()
    }

    pub fn supports_random_access(&self) -> bool {
        self.adapter.supports_random_access()
    }

    /// True when the file on disk no longer carries the stamp seen at open.
    ///
    /// This is a blocking `stat` on the calling thread.
    pub fn is_stale(&self) -> bool {
        match self.modified {
            Some(seen) => modified_at(&self.path) != Some(seen),
            None => false,
        }
    }

    /// Raw bytes of page `page`.
    pub async fn extract_page(&self, page: usize) -> Result<Vec<u8>, ExtractionError> {
        let entry = self
            .page_entry(page)
            .ok_or_else(|| ExtractionError::NotFound(format!("page {}", page)))?;
        self.adapter.extract(&entry.id).await
    }
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("format", &self.format)
            .field("pages", &self.pages.len())
            .finish()
    }
}
