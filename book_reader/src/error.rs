//! Error types of the reader.

use std::path::PathBuf;
use std::sync::Arc;

use book_archive::error::{ExtractionError, OpenError};
use image::ImageError;
use image::error::LimitErrorKind;
use thiserror::Error;

/// Why a page's bytes could not be turned into pixels.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("Corrupt image data: {0}")]
    Corrupt(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedCodec(String),
    #[error("Image exceeds decode limits: {0}")]
    TooLarge(String),
}

impl From<ImageError> for DecodeError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Unsupported(e) => DecodeError::UnsupportedCodec(e.to_string()),
            ImageError::Limits(ref limit) => match limit.kind() {
                LimitErrorKind::DimensionError | LimitErrorKind::InsufficientMemory => {
                    DecodeError::TooLarge(e.to_string())
                }
                _ => DecodeError::UnsupportedCodec(e.to_string()),
            },
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// Outcome of one page job that did not produce an image.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Page request was superseded")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("Page {index} out of range (book has {page_count} pages)")]
    PageIndexOutOfRange { index: usize, page_count: usize },
    #[error("No book is open")]
    NoBook,
    #[error("{0:?} changed on disk; book closed")]
    BookChanged(PathBuf),
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Unable to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Invalid TOML: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// All errors the reader surfaces.
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
