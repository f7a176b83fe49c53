//! Byte-budgeted LRU cache of decoded pages with pinning.

use std::collections::HashSet;
use std::sync::Arc;

use book_archive::model::BookId;
use lru::LruCache;

use crate::decode::DecodedPage;

/// Cache key. Names a page; holds no reference to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub book: BookId,
    pub page: usize,
}

impl PageKey {
    pub fn new(book: BookId, page: usize) -> Self {
        Self { book, page }
    }
}

struct Slot {
    page: Arc<DecodedPage>,
    /// Navigation epoch of the last access.
    epoch: u64,
}

/// Decoded pages bounded by a byte budget.
///
/// Unpinned pages are evicted oldest navigation epoch first, then least recently
/// used. Pinned pages are never evicted, so `total_bytes() <= budget +
/// pinned_bytes()` always holds.
pub struct PageCache {
    lru: LruCache<PageKey, Slot>,
    pinned: HashSet<PageKey>,
    budget: u64,
    total: u64,
    epoch: u64,
}

impl PageCache {
    pub fn new(budget: u64) -> Self {
        Self {
            lru: LruCache::unbounded(),
            pinned: HashSet::new(),
            budget,
            total: 0,
            epoch: 0,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Stamp subsequent accesses with `epoch`.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Look up a page, refreshing its recency.
    pub fn get(&mut self, key: &PageKey) -> Option<Arc<DecodedPage>> {
        let epoch = self.epoch;
        self.lru.get_mut(key).map(|slot| {
            slot.epoch = epoch;
            slot.page.clone()
        })
    }

    /// Look up a page without touching its recency.
    pub fn peek(&self, key: &PageKey) -> Option<Arc<DecodedPage>> {
        self.lru.peek(key).map(|slot| slot.page.clone())
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.lru.contains(key)
    }

    /// Insert or replace a page, then evict down to the budget.
    pub fn put(&mut self, key: PageKey, page: Arc<DecodedPage>) {
        let size = page.byte_size;
        let slot = Slot {
            page,
            epoch: self.epoch,
        };
        // `push` moves a replaced key to the front as well.
        if let Some((old_key, old)) = self.lru.push(key, slot) {
            debug_assert_eq!(old_key, key);
            self.total -= old.page.byte_size;
        }
        self.total += size;
        self.evict();
    }

    pub fn remove(&mut self, key: &PageKey) -> Option<Arc<DecodedPage>> {
        let slot = self.lru.pop(key)?;
        self.total -= slot.page.byte_size;
        Some(slot.page)
    }

    /// Protect `key` from eviction. May be called before the page is resident.
    pub fn pin(&mut self, key: PageKey) {
        self.pinned.insert(key);
    }

    pub fn unpin(&mut self, key: &PageKey) {
        if self.pinned.remove(key) {
            self.evict();
        }
    }

    pub fn is_pinned(&self, key: &PageKey) -> bool {
        self.pinned.contains(key)
    }

    pub fn clear(&mut self) {
        self.lru.clear();
        self.pinned.clear();
        self.total = 0;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Bytes held by resident pinned pages.
    pub fn pinned_bytes(&self) -> u64 {
        self.pinned
            .iter()
            .filter_map(|key| self.lru.peek(key))
            .map(|slot| slot.page.byte_size)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    fn evict(&mut self) {
        if self.total <= self.budget {
            return;
        }
        // Least recently used first; the stable sort keeps that order within an epoch.
        let mut candidates: Vec<(PageKey, u64)> = self
            .lru
            .iter()
            .rev()
            .filter(|(key, _)| !self.pinned.contains(*key))
            .map(|(key, slot)| (*key, slot.epoch))
            .collect();
        candidates.sort_by_key(|&(_, epoch)| epoch);

        for (key, _) in candidates {
            if self.total <= self.budget {
                break;
            }
            if let Some(slot) = self.lru.pop(&key) {
                log::debug!("Evicting page {} of {}", key.page, key.book);
                self.total -= slot.page.byte_size;
            }
        }
    }
}
