//! Job vocabulary shared by the scheduler, its workers and its callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use book_archive::Book;
use book_archive::model::{BookId, EntryId};
use tokio::sync::{mpsc, oneshot};

use crate::decode::DecodedPage;
use crate::error::PageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Prefetch,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Navigation generation of one open book.
///
/// Every `goto` advances it. A job remembers the value current when it was last
/// requested and is dropped at the next checkpoint once that value is behind.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move to a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_stale(&self, token: u64) -> bool {
        token < self.current()
    }
}

/// Identity of one extraction: at most one job per key is queued or running.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub book: BookId,
    pub entry: EntryId,
}

pub type PageResult = Result<Arc<DecodedPage>, PageError>;

/// Sent on a job's notify channel when it resolves, whatever the outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    pub book: BookId,
    pub page: usize,
    /// Generation token the job carried when it finished.
    pub generation: u64,
    pub priority: Priority,
    pub result: PageResult,
}

impl Completion {
    pub fn state(&self) -> JobState {
        match &self.result {
            Ok(_) => JobState::Completed,
            Err(PageError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        }
    }
}

/// A request for one page of one book.
pub struct JobRequest {
    pub book: Arc<Book>,
    pub page: usize,
    pub priority: Priority,
    pub generation: Generation,
    pub notify: Option<mpsc::UnboundedSender<Completion>>,
}

impl JobRequest {
    pub fn new(book: Arc<Book>, page: usize, priority: Priority, generation: Generation) -> Self {
        Self {
            book,
            page,
            priority,
            generation,
            notify: None,
        }
    }

    pub fn notify(mut self, tx: mpsc::UnboundedSender<Completion>) -> Self {
        self.notify = Some(tx);
        self
    }
}

/// Handle on the outcome of a submitted job.
///
/// Dropping a ticket does not cancel the job; other waiters and the notify
/// channel still receive the result.
#[derive(Debug)]
pub struct JobTicket {
    rx: oneshot::Receiver<PageResult>,
}

impl JobTicket {
    pub(crate) fn new(rx: oneshot::Receiver<PageResult>) -> Self {
        Self { rx }
    }

    /// A ticket that is already resolved.
    pub(crate) fn ready(result: PageResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> PageResult {
        self.rx.await.unwrap_or(Err(PageError::Cancelled))
    }

    /// The result if the job has resolved, without waiting.
    pub fn try_take(&mut self) -> Option<PageResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PageError::Cancelled)),
        }
    }
}
