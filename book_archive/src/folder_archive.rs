use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::prelude::*;
use crate::{blocking, read_prefix};

/// A plain directory of images. Subdirectories are walked, so chapter folders work.
pub struct FolderImageArchive {
    pub path: PathBuf,
}

impl FolderImageArchive {
    pub fn new(path: &Path) -> Result<Self, OpenError> {
        if !path.is_dir() {
            return Err(OpenError::UnsupportedFormat(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Resolve an entry id below the root, refusing anything that climbs out of it.
    fn resolve(&self, id: &EntryId) -> Option<PathBuf> {
        let rel = Path::new(id.as_str());
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }
        Some(self.path.join(rel))
    }
}

fn list_folder(root: &Path) -> Result<Vec<RawEntry>, OpenError> {
    // Surface an unreadable root up front; walkdir would only report it per entry.
    fs::read_dir(root).map_err(|e| OpenError::unreadable(root, e))?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            entries.push(RawEntry::dir(name));
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let prefix = fs::File::open(entry.path())
            .map(read_prefix)
            .unwrap_or_default();
        entries.push(RawEntry::file(name, size).with_prefix(prefix));
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl FormatAdapter for FolderImageArchive {
    fn kind(&self) -> FormatKind {
        FormatKind::Directory
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        let root = self.path.clone();
        blocking(move || list_folder(&root)).await
    }

    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| ExtractionError::NotFound(id.to_string()))?;
        match tokio::fs::read(&path).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExtractionError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
