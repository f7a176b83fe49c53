//! Page delivery for archive-backed books: scheduling, decoding and caching.

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod prelude;
pub mod scheduler;
pub mod session;

pub use session::{BookSession, PageState};
