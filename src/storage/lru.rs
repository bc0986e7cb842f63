//! Pin-aware LRU bookkeeping for resident pages.
//!
//! One entry per resident page: the frame it occupies, its pin count, and
//! a monotonic recency stamp. Victim selection scans for the stamp
//! minimum among unpinned entries, which keeps the structure a single map
//! with no list surgery; with pool-sized populations the scan is cheap
//! and the selection order is exactly least-recently-used.
//!
//! Pins are reentrant counts. A pinned entry is invisible to victim
//! selection, so a page stays resident for as long as any pin is
//! outstanding.

use hashbrown::HashMap;

use crate::error::{Error, Result};
use crate::storage::page::PageId;

pub type FrameId = usize;

#[derive(Debug)]
struct Entry {
    frame_id: FrameId,
    pin_count: u32,
    last_used: u64,
}

#[derive(Debug)]
pub struct LruCache {
    entries: HashMap<PageId, Entry>,
    capacity: usize,
    tick: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.entries.contains_key(&page)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Looks up the frame of a resident page, touching its recency.
    pub fn get(&mut self, page: PageId) -> Option<FrameId> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(&page)?;
        entry.last_used = tick;
        Some(entry.frame_id)
    }

    /// Inserts a resident page. The caller is responsible for having made
    /// room first; a full cache refuses the insert.
    pub fn put(&mut self, page: PageId, frame_id: FrameId) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(Error::CacheNoMoreVictim);
        }
        let tick = self.next_tick();
        self.entries.insert(
            page,
            Entry {
                frame_id,
                pin_count: 0,
                last_used: tick,
            },
        );
        Ok(())
    }

    /// Drops a resident page, returning the frame it occupied.
    pub fn remove(&mut self, page: PageId) -> Result<FrameId> {
        self.entries
            .remove(&page)
            .map(|entry| entry.frame_id)
            .ok_or(Error::CacheEntryNotFound)
    }

    pub fn pin(&mut self, page: PageId) -> Result<()> {
        let entry = self.entries.get_mut(&page).ok_or(Error::KeyNotFound)?;
        entry.pin_count += 1;
        Ok(())
    }

    pub fn unpin(&mut self, page: PageId) -> Result<()> {
        let entry = self.entries.get_mut(&page).ok_or(Error::KeyNotFound)?;
        if entry.pin_count == 0 {
            return Err(Error::KeyNotPinned);
        }
        entry.pin_count -= 1;
        Ok(())
    }

    pub fn pin_count(&self, page: PageId) -> u32 {
        self.entries.get(&page).map_or(0, |entry| entry.pin_count)
    }

    /// Removes and returns the least-recently-used unpinned entry.
    ///
    /// An empty cache fails `PoolNoFreeFrame`; a cache where every entry
    /// is pinned fails `CacheNoMoreVictim`.
    pub fn victim(&mut self) -> Result<(PageId, FrameId)> {
        if self.entries.is_empty() {
            return Err(Error::PoolNoFreeFrame);
        }
        let candidate = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.pin_count == 0)
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(&page, entry)| (page, entry.frame_id));
        let (page, frame_id) = candidate.ok_or(Error::CacheNoMoreVictim)?;
        self.entries.remove(&page);
        Ok((page, frame_id))
    }
}
