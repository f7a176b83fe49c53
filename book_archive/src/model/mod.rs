use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::classify::SortKey;

static NEXT_BOOK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one opened book.
///
/// A fresh id is handed out on every open, so re-opening the same path never
/// collides with work still in flight for the previous instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookId(u64);

impl BookId {
    pub fn next() -> Self {
        Self(NEXT_BOOK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "book#{}", self.0)
    }
}

/// The container formats a book can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Directory,
    Zip,
    Tar,
    TarGz,
    TarBz2,
    Rar,
    SevenZip,
    Pdf,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Directory => "directory",
            FormatKind::Zip => "zip",
            FormatKind::Tar => "tar",
            FormatKind::TarGz => "tar.gz",
            FormatKind::TarBz2 => "tar.bz2",
            FormatKind::Rar => "rar",
            FormatKind::SevenZip => "7z",
            FormatKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format-specific handle of an entry: its `/`-separated path inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased extension of the entry name, if any.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.0.rsplit('/').next().unwrap_or(&self.0);
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An entry as reported by a format adapter, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub id: EntryId,
    pub size: u64,
    pub is_dir: bool,
    /// Leading bytes of the entry, when the adapter can read them cheaply.
    pub prefix: Vec<u8>,
}

impl RawEntry {
    pub fn file(id: impl Into<EntryId>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
            is_dir: false,
            prefix: Vec::new(),
        }
    }

    pub fn dir(id: impl Into<EntryId>) -> Self {
        Self {
            id: id.into(),
            size: 0,
            is_dir: true,
            prefix: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: Vec<u8>) -> Self {
        self.prefix = prefix;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Image,
    /// A nested container. Flagged, never opened.
    Archive,
    Other,
    Directory,
}

/// One classified member of a book. Immutable once the book is open.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub size: u64,
    pub kind: EntryKind,
    pub sort_key: SortKey,
    /// Position in the adapter's listing, used to break sort-key ties.
    pub position: usize,
}

impl Entry {
    pub fn is_image(&self) -> bool {
        self.kind == EntryKind::Image
    }
}
