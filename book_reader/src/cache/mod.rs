//! Bounded store of decoded pages.

mod page_cache;

pub use page_cache::{PageCache, PageKey};
