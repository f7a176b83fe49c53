//! The coordinating owner of one open book.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use book_archive::Book;
use book_archive::error::OpenError;
use tokio::sync::{broadcast, mpsc};

use crate::cache::{PageCache, PageKey};
use crate::config::Config;
use crate::decode::DecodedPage;
use crate::error::{NavigationError, PageError, ReaderError};
use crate::events::SessionEvent;
use crate::scheduler::{Completion, Generation, JobRequest, JobTicket, Priority, Scheduler};

/// What the display layer can show for the current page right now.
#[derive(Debug, Clone)]
pub enum PageState {
    Ready(Arc<DecodedPage>),
    Pending,
    Failed(PageError),
}

struct OpenBook {
    book: Arc<Book>,
    cache: PageCache,
    current: usize,
    /// Pinned pages around `current`.
    window: Vec<usize>,
    generation: Generation,
    current_ticket: Option<JobTicket>,
    /// Failures seen since the last navigation.
    failed: HashMap<usize, PageError>,
    completions: mpsc::UnboundedReceiver<Completion>,
    notify: mpsc::UnboundedSender<Completion>,
}

impl OpenBook {
    fn key(&self, page: usize) -> PageKey {
        PageKey::new(self.book.id(), page)
    }

    fn request(&self, page: usize, priority: Priority) -> JobRequest {
        JobRequest::new(self.book.clone(), page, priority, self.generation.clone())
            .notify(self.notify.clone())
    }

    fn repin(&mut self, window: Vec<usize>) {
        for page in std::mem::take(&mut self.window) {
            if !window.contains(&page) {
                let key = self.key(page);
                self.cache.unpin(&key);
            }
        }
        for &page in &window {
            let key = self.key(page);
            self.cache.pin(key);
        }
        self.window = window;
    }
}

/// Pages within `radius` of `index`, clamped to the book.
fn window(index: usize, radius: usize, page_count: usize) -> Vec<usize> {
    let last = index.saturating_add(radius).min(page_count.saturating_sub(1));
    (index.saturating_sub(radius)..=last).collect()
}

/// Prefetch order around `index`: forward first, nearest first.
fn neighbours(index: usize, radius: usize, page_count: usize) -> Vec<usize> {
    let forward = (1..=radius)
        .map(|d| index + d)
        .filter(|&page| page < page_count);
    let backward = (1..=radius).filter_map(|d| index.checked_sub(d));
    forward.chain(backward).collect()
}

/// An explicitly owned reading session over at most one book.
///
/// All state lives behind `&mut self`; the scheduler's workers only talk back
/// through the completion channel, which [`BookSession::pump`] drains.
pub struct BookSession {
    config: Config,
    scheduler: Scheduler,
    events: broadcast::Sender<SessionEvent>,
    open: Option<OpenBook>,
}

impl BookSession {
    /// Create a session with its own worker pool. Must run inside a tokio runtime.
    pub fn new(config: Config) -> Self {
        let scheduler = Scheduler::new(config.workers, config.decode.clone());
        Self::with_scheduler(config, scheduler)
    }

    /// Create a session sharing an existing worker pool.
    pub fn with_scheduler(config: Config, scheduler: Scheduler) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            scheduler,
            events,
            open: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        log::debug!("Session event: {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Open `path`, replacing any open book. Returns the page count.
    pub async fn open(&mut self, path: &Path) -> Result<usize, OpenError> {
        self.close();
        match Book::open(path, &self.config.tools).await {
            Ok(book) => Ok(self.attach(book)),
            Err(e) => {
                log::error!("Failed to open {:?}: {}", path, e);
                self.emit(SessionEvent::BookFailed(e.clone()));
                Err(e)
            }
        }
    }

    /// Take ownership of an already opened book. Returns the page count.
    pub fn attach(&mut self, book: Book) -> usize {
        self.close();
        let page_count = book.page_count();
        let (notify, completions) = mpsc::unbounded_channel();
        self.open = Some(OpenBook {
            book: Arc::new(book),
            cache: PageCache::new(self.config.cache_budget_bytes),
            current: 0,
            window: Vec::new(),
            generation: Generation::new(),
            current_ticket: None,
            failed: HashMap::new(),
            completions,
            notify,
        });
        self.emit(SessionEvent::BookOpened(page_count));
        page_count
    }

    /// Tear down the open book: its queued jobs are cancelled and its cache dropped.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            log::info!("Closing {} {:?}", open.book.id(), open.book.path());
            // Jobs already running for this book become stale too.
            open.generation.advance();
            self.scheduler.forget_book(open.book.id());
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn book(&self) -> Option<&Arc<Book>> {
        self.open.as_ref().map(|open| &open.book)
    }

    pub fn page_count(&self) -> Option<usize> {
        self.open.as_ref().map(|open| open.book.page_count())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.open.as_ref().map(|open| open.current)
    }

    /// What a bookmark needs to restore this position later.
    pub fn bookmark(&self) -> Option<(PathBuf, usize)> {
        self.open
            .as_ref()
            .map(|open| (open.book.path().to_path_buf(), open.current))
    }

    pub fn is_cached(&self, page: usize) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.cache.contains(&open.key(page)))
    }

    /// Bytes of decoded pages currently cached.
    pub fn cached_bytes(&self) -> u64 {
        self.open.as_ref().map_or(0, |open| open.cache.total_bytes())
    }

    /// Navigate to `index`.
    ///
    /// Starts a new generation, so everything requested for earlier positions
    /// stops at its next checkpoint. The target is requested at Immediate
    /// priority unless cached, its neighbours at Prefetch.
    pub fn goto(&mut self, index: usize) -> Result<(), NavigationError> {
        let open = self.open.as_ref().ok_or(NavigationError::NoBook)?;
        // One blocking stat per navigation, on the caller's task.
        if open.book.is_stale() {
            let path = open.book.path().to_path_buf();
            log::warn!("{:?} changed on disk, closing", path);
            self.close();
            self.emit(SessionEvent::BookFailed(OpenError::Changed(path.clone())));
            return Err(NavigationError::BookChanged(path));
        }
        let page_count = open.book.page_count();
        if index >= page_count {
            return Err(NavigationError::PageIndexOutOfRange { index, page_count });
        }

        self.pump();
        let radius = self.config.prefetch_radius;
        let open = self.open.as_mut().ok_or(NavigationError::NoBook)?;

        let generation = open.generation.advance();
        open.cache.set_epoch(generation);
        open.current = index;
        open.failed.clear();
        open.repin(window(index, radius, page_count));
        log::debug!("Goto page {} of {} (generation {})", index, open.book.id(), generation);

        let key = open.key(index);
        let ready = open.cache.get(&key).is_some();
        open.current_ticket = if ready {
            None
        } else {
            Some(self.scheduler.submit(open.request(index, Priority::Immediate)))
        };
        for page in neighbours(index, radius, page_count) {
            let key = open.key(page);
            if !open.cache.contains(&key) {
                self.scheduler.submit(open.request(page, Priority::Prefetch));
            }
        }

        if ready {
            self.emit(SessionEvent::PageReady(index));
        }
        Ok(())
    }

    /// Go forward one page; stays on the last page. Returns the new index.
    pub fn next_page(&mut self) -> Result<usize, NavigationError> {
        let open = self.open.as_ref().ok_or(NavigationError::NoBook)?;
        let next = (open.current + 1).min(open.book.page_count().saturating_sub(1));
        self.goto(next)?;
        Ok(next)
    }

    /// Go back one page; stays on the first page. Returns the new index.
    pub fn prev_page(&mut self) -> Result<usize, NavigationError> {
        let open = self.open.as_ref().ok_or(NavigationError::NoBook)?;
        let prev = open.current.saturating_sub(1);
        self.goto(prev)?;
        Ok(prev)
    }

    /// State of the current page without waiting.
    pub fn current_page(&mut self) -> Result<PageState, NavigationError> {
        self.pump();
        let open = self.open.as_mut().ok_or(NavigationError::NoBook)?;
        let index = open.current;
        let key = open.key(index);
        if let Some(page) = open.cache.get(&key) {
            return Ok(PageState::Ready(page));
        }

        let resolved = open.current_ticket.as_mut().and_then(JobTicket::try_take);
        if let Some(result) = resolved {
            open.current_ticket = None;
            match result {
                Ok(page) => {
                    open.cache.put(key, page.clone());
                    return Ok(PageState::Ready(page));
                }
                Err(PageError::Cancelled) => return Ok(PageState::Pending),
                Err(e) => {
                    open.failed.insert(index, e.clone());
                    return Ok(PageState::Failed(e));
                }
            }
        }
        Ok(match open.failed.get(&index) {
            Some(e) => PageState::Failed(e.clone()),
            None => PageState::Pending,
        })
    }

    /// Wait for the current page.
    ///
    /// Awaits the outstanding Immediate job; after a failure a fresh one is issued.
    pub async fn wait_current_page(&mut self) -> Result<Arc<DecodedPage>, ReaderError> {
        self.pump();
        let open = self.open.as_mut().ok_or(NavigationError::NoBook)?;
        let index = open.current;
        let key = open.key(index);
        if let Some(page) = open.cache.get(&key) {
            return Ok(page);
        }

        let ticket = match open.current_ticket.take() {
            Some(ticket) if !open.failed.contains_key(&index) => ticket,
            _ => {
                log::debug!("Requesting page {} of {} again", index, open.book.id());
                open.failed.remove(&index);
                self.scheduler.submit(open.request(index, Priority::Immediate))
            }
        };
        let result = ticket.wait().await;

        let open = self.open.as_mut().ok_or(NavigationError::NoBook)?;
        match result {
            Ok(page) => {
                open.cache.put(key, page.clone());
                Ok(page)
            }
            Err(e) => {
                if !matches!(e, PageError::Cancelled) {
                    open.failed.insert(index, e.clone());
                }
                Err(e.into())
            }
        }
    }

    /// Drain finished jobs into the cache and publish their events.
    ///
    /// Every successful result is cached. Events are only published for jobs of
    /// the current generation. Returns how many completions were handled.
    pub fn pump(&mut self) -> usize {
        let Some(open) = self.open.as_mut() else {
            return 0;
        };
        let current = open.generation.current();
        let mut events = Vec::new();
        let mut handled = 0;

        while let Ok(completion) = open.completions.try_recv() {
            handled += 1;
            if completion.book != open.book.id() {
                continue;
            }
            let is_current = completion.generation == current;
            let page = completion.page;
            match completion.result {
                Ok(decoded) => {
                    let key = open.key(page);
                    open.cache.put(key, decoded);
                    open.failed.remove(&page);
                    if is_current {
                        events.push(SessionEvent::PageReady(page));
                    }
                }
                Err(PageError::Cancelled) => {}
                Err(e) if is_current => {
                    open.failed.insert(page, e.clone());
                    events.push(SessionEvent::PageFailed(page, e));
                }
                Err(e) => log::debug!("Ignoring stale failure of page {}: {}", page, e),
            }
        }
        for event in events {
            self.emit(event);
        }
        handled
    }
}

impl Drop for BookSession {
    fn drop(&mut self) {
        self.close();
    }
}
