// std
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

// external crates
pub use book_archive::prelude::*;
pub use log::{debug, error, info, warn};

// crate modules
pub use crate::{
    cache::{PageCache, PageKey},
    config::*,
    decode::{DecodedPage, decode},
    error::{ConfigError, DecodeError, NavigationError, PageError, ReaderError},
    events::SessionEvent,
    scheduler::{
        Completion, Generation, JobRequest, JobState, JobTicket, PageResult, Priority, Scheduler,
        SchedulerStats,
    },
    session::{BookSession, PageState},
};
