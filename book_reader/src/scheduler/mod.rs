//! Extraction scheduler: a fixed pool of workers pulling page jobs off a
//! two-level priority queue.
//!
//! Requests for a page that is already queued or running are folded into the
//! existing job. Jobs carry a generation token and are dropped at two
//! checkpoints (dequeue, and between extraction and decode) once a newer
//! navigation has made them stale. Books whose adapter cannot seek are
//! extracted one entry at a time; their other jobs wait in the queue, not on a
//! worker.

mod job;
mod worker;

pub use job::{
    Completion, Generation, JobKey, JobRequest, JobState, JobTicket, PageResult, Priority,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use book_archive::Book;
use book_archive::error::ExtractionError;
use book_archive::model::BookId;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::DecodeLimits;
use crate::error::PageError;

/// Counters since the scheduler started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

struct JobRecord {
    book: Arc<Book>,
    page: usize,
    priority: Priority,
    state: JobState,
    token: u64,
    generation: Generation,
    waiters: Vec<oneshot::Sender<PageResult>>,
    notify: Vec<mpsc::UnboundedSender<Completion>>,
}

impl JobRecord {
    fn add_notify(&mut self, tx: Option<mpsc::UnboundedSender<Completion>>) {
        if let Some(tx) = tx {
            if !self.notify.iter().any(|t| t.same_channel(&tx)) {
                self.notify.push(tx);
            }
        }
    }

    fn is_stale(&self) -> bool {
        self.generation.is_stale(self.token)
    }

    /// Hand `result` to everyone waiting on this job.
    fn resolve(self, result: PageResult) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
        let completion = Completion {
            book: self.book.id(),
            page: self.page,
            generation: self.token,
            priority: self.priority,
            result,
        };
        for tx in self.notify {
            let _ = tx.send(completion.clone());
        }
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobKey, JobRecord>,
    immediate: VecDeque<JobKey>,
    prefetch: VecDeque<JobKey>,
    /// Books without random access that a worker is extracting from right now.
    busy: HashSet<BookId>,
    stats: SchedulerStats,
}

impl State {
    fn count(&mut self, result: &PageResult) {
        match result {
            Ok(_) => self.stats.completed += 1,
            Err(PageError::Cancelled) => self.stats.cancelled += 1,
            Err(_) => self.stats.failed += 1,
        }
    }

    fn queue(&mut self, priority: Priority) -> &mut VecDeque<JobKey> {
        match priority {
            Priority::Immediate => &mut self.immediate,
            Priority::Prefetch => &mut self.prefetch,
        }
    }

    /// Take the first runnable job of one queue.
    ///
    /// Keys of jobs that are gone or already running are dropped, stale jobs are
    /// moved to `cancelled`, and jobs of a busy sequential book keep their place.
    fn take_runnable(
        &mut self,
        priority: Priority,
        cancelled: &mut Vec<JobRecord>,
    ) -> Option<Claimed> {
        let mut i = 0;
        while let Some(key) = self.queue(priority).get(i).cloned() {
            // Upgraded jobs sit in both queues.
            let Some(record) = self.jobs.get(&key) else {
                self.queue(priority).remove(i);
                continue;
            };
            if record.state != JobState::Queued {
                self.queue(priority).remove(i);
                continue;
            }
            if record.is_stale() {
                self.queue(priority).remove(i);
                if let Some(record) = self.jobs.remove(&key) {
                    self.stats.cancelled += 1;
                    cancelled.push(record);
                }
                continue;
            }
            let exclusive = !record.book.supports_random_access();
            if exclusive && self.busy.contains(&key.book) {
                i += 1;
                continue;
            }

            self.queue(priority).remove(i);
            let Some(record) = self.jobs.get_mut(&key) else {
                continue;
            };
            record.state = JobState::Running;
            let claimed = Claimed {
                book: record.book.clone(),
                page: record.page,
                key,
                exclusive,
            };
            if exclusive {
                self.busy.insert(claimed.key.book);
            }
            return Some(claimed);
        }
        None
    }
}

/// A job a worker has claimed.
pub(crate) struct Claimed {
    pub key: JobKey,
    pub book: Arc<Book>,
    pub page: usize,
    /// The book is marked busy until `Shared::release`.
    pub exclusive: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    wake: Notify,
    shutdown: AtomicBool,
    limits: DecodeLimits,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Workers never panic while holding the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Claim the next runnable job, Immediate before Prefetch. Stale jobs met on
    /// the way are cancelled. Jobs of a sequential book another worker is reading
    /// stay queued, so they are checked for staleness again once it is free.
    pub(crate) fn claim(&self) -> Option<Claimed> {
        let mut cancelled = Vec::new();
        let claimed = {
            let mut state = self.lock();
            state
                .take_runnable(Priority::Immediate, &mut cancelled)
                .or_else(|| state.take_runnable(Priority::Prefetch, &mut cancelled))
        };
        for record in cancelled {
            log::debug!("Dropping stale job for page {} of {}", record.page, record.book.id());
            record.resolve(Err(PageError::Cancelled));
        }
        claimed
    }

    /// Hand a sequential book back after extraction and wake a worker for its
    /// next job.
    pub(crate) fn release(&self, book: BookId) {
        self.lock().busy.remove(&book);
        self.wake.notify_one();
    }

    /// Cancel a running job if its token fell behind. Returns true if it did.
    pub(crate) fn cancel_if_stale(&self, key: &JobKey) -> bool {
        let record = {
            let mut state = self.lock();
            match state.jobs.get(key) {
                Some(record) if record.is_stale() => {
                    state.stats.cancelled += 1;
                    state.jobs.remove(key)
                }
                _ => None,
            }
        };
        match record {
            Some(record) => {
                log::debug!("Discarding page {} of {} after extraction", record.page, record.book.id());
                record.resolve(Err(PageError::Cancelled));
                true
            }
            None => false,
        }
    }

    pub(crate) fn finish(&self, key: &JobKey, result: PageResult) {
        let record = {
            let mut state = self.lock();
            state.count(&result);
            state.jobs.remove(key)
        };
        if let Some(record) = record {
            if let Err(e) = &result {
                log::warn!("Page {} of {} failed: {}", record.page, record.book.id(), e);
            }
            record.resolve(result);
        }
    }
}

/// Owns the worker tasks; shuts them down when the last scheduler handle goes.
struct WorkerSet {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        log::debug!("Stopping {} extraction workers", self.handles.len());
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_waiters();
    }
}

/// Cheaply clonable handle on the worker pool.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    _workers: Arc<WorkerSet>,
}

impl Scheduler {
    /// Start `workers` worker tasks on the current tokio runtime.
    pub fn new(workers: usize, limits: DecodeLimits) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            limits,
        });
        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|n| tokio::spawn(worker::run(shared.clone(), n)))
            .collect();
        log::info!("Started {} extraction workers", workers);
        Self {
            _workers: Arc::new(WorkerSet {
                shared: shared.clone(),
                handles,
            }),
            shared,
        }
    }

    /// Request a page. Joins the existing job for the same entry if there is one.
    pub fn submit(&self, request: JobRequest) -> JobTicket {
        let JobRequest {
            book,
            page,
            priority,
            generation,
            notify,
        } = request;

        let Some(entry) = book.page_entry(page) else {
            return JobTicket::ready(Err(PageError::Extraction(ExtractionError::NotFound(
                format!("page {}", page),
            ))));
        };
        let key = JobKey {
            book: book.id(),
            entry: entry.id.clone(),
        };
        let token = generation.current();
        let (tx, rx) = oneshot::channel();

        let mut state = self.shared.lock();
        state.stats.submitted += 1;
        let mut requeue = false;
        let coalesced = match state.jobs.get_mut(&key) {
            Some(record) => {
                record.waiters.push(tx);
                record.add_notify(notify);
                record.token = record.token.max(token);
                if priority > record.priority {
                    record.priority = priority;
                    requeue = record.state == JobState::Queued;
                }
                true
            }
            None => {
                let mut record = JobRecord {
                    book,
                    page,
                    priority,
                    state: JobState::Queued,
                    token,
                    generation,
                    waiters: vec![tx],
                    notify: Vec::new(),
                };
                record.add_notify(notify);
                state.jobs.insert(key.clone(), record);
                requeue = true;
                false
            }
        };
        if coalesced {
            state.stats.coalesced += 1;
            log::debug!("Coalesced request for '{}' of {}", key.entry, key.book);
        }
        if requeue {
            match priority {
                Priority::Immediate => state.immediate.push_back(key),
                Priority::Prefetch => state.prefetch.push_back(key),
            }
        }
        drop(state);

        if requeue {
            self.shared.wake.notify_one();
        }
        JobTicket::new(rx)
    }

    /// Cancel every queued job of `book`. Running jobs finish normally.
    pub fn forget_book(&self, book: BookId) {
        let dropped: Vec<JobRecord> = {
            let mut state = self.shared.lock();
            let keys: Vec<JobKey> = state
                .jobs
                .iter()
                .filter(|(key, record)| key.book == book && record.state == JobState::Queued)
                .map(|(key, _)| key.clone())
                .collect();
            state.immediate.retain(|key| key.book != book);
            state.prefetch.retain(|key| key.book != book);
            let dropped: Vec<JobRecord> =
                keys.iter().filter_map(|key| state.jobs.remove(key)).collect();
            state.stats.cancelled += dropped.len() as u64;
            dropped
        };
        if !dropped.is_empty() {
            log::debug!("Cancelled {} queued jobs of {}", dropped.len(), book);
        }
        for record in dropped {
            record.resolve(Err(PageError::Cancelled));
        }
    }

    /// State of the queued or running job for `key`, if there is one.
    pub fn job_state(&self, key: &JobKey) -> Option<JobState> {
        self.shared.lock().jobs.get(key).map(|record| record.state)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats
    }
}
