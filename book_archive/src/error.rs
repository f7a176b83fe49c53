use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that abort opening a book.
///
/// All variants are `Clone` so they can be broadcast to every subscriber of a session.
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    #[error("Unsupported archive format: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("Corrupt archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },
    #[error("Unable to read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("No images found in {0:?}")]
    EmptyBook(PathBuf),
    #[error("{0:?} changed on disk since it was opened")]
    Changed(PathBuf),
    #[error("Listing failed: {0}")]
    Tool(#[from] ExtractionError),
}

impl OpenError {
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while pulling the bytes of a single entry. These are page-local.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("'{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("External tool '{0}' not found")]
    ToolMissing(String),
    #[error("Corrupt entry '{entry}': {reason}")]
    CorruptEntry { entry: String, reason: String },
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl ExtractionError {
    pub fn corrupt(entry: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptEntry {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<tokio::task::JoinError> for ExtractionError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Io(Arc::new(std::io::Error::other(e)))
    }
}

impl From<tokio::task::JoinError> for OpenError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Tool(ExtractionError::from(e))
    }
}
