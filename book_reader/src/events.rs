//! Notifications a `BookSession` publishes to its display layer.

use book_archive::error::OpenError;

use crate::error::PageError;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The page is decoded and cached.
    PageReady(usize),
    PageFailed(usize, PageError),
    /// A book opened with this many pages.
    BookOpened(usize),
    BookFailed(OpenError),
}

impl SessionEvent {
    pub fn page(&self) -> Option<usize> {
        match self {
            SessionEvent::PageReady(page) | SessionEvent::PageFailed(page, _) => Some(*page),
            _ => None,
        }
    }
}
