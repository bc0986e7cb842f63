//! Frames and the buffer pool.
//!
//! The pool owns a fixed vector of frames, each wrapping at most one
//! resident [`PageImage`]. A page-id → frame-id map with LRU recency
//! decides residency; a free list tracks frames that hold no page.
//!
//! ## Residency protocol
//!
//! `get_frame` returns the resident frame or reads the page through the
//! paged file into a free frame (free list first, then the LRU victim).
//! Before a frame is reassigned to a new page its current resident is
//! written back if dirty; a frame is never handed out with another
//! page's unsaved bytes at risk.
//!
//! ## Pinning
//!
//! A pinned frame is never selected as a victim. [`BufferPool::pin_frame`]
//! returns a [`PinGuard`] that releases the pin on drop, so every exit
//! path of a multi-frame operation unpins. Pins are reentrant counts.
//!
//! Callers that keep a [`FrameRef`] across another pool call must hold a
//! pin for as long as the reference is live: an unpinned frame can be
//! reassigned to a different page by any pool call that misses the cache.
//!
//! ## Dirty discipline
//!
//! Any mutator sets the dirty bit through [`Frame::mark_dirty`]; clearing
//! it is the pool's exclusive right, and only after a successful write.
//! `remove_frame` is the one deliberate exception: removing a page
//! discards its frame without writing, because freeing the page makes its
//! contents moot.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{error, trace};

use crate::error::{Error, Result};
use crate::storage::disk::PagedFile;
use crate::storage::lru::{FrameId, LruCache};
use crate::storage::page::{PageId, PageImage};

/// Pool slot holding one resident page plus bookkeeping.
#[derive(Debug)]
pub struct Frame {
    id: FrameId,
    dirty: bool,
    page: PageImage,
}

impl Frame {
    fn new(id: FrameId) -> Self {
        Self {
            id,
            dirty: false,
            page: PageImage::bare(0),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    pub fn page(&self) -> &PageImage {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut PageImage {
        &mut self.page
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn reassign(&mut self, page: PageImage) {
        self.page = page;
        self.dirty = false;
    }
}

pub type FrameRef = Rc<RefCell<Frame>>;

/// RAII pin: drop releases one pin count on the page.
#[derive(Debug)]
pub struct PinGuard {
    cache: Rc<RefCell<LruCache>>,
    page: PageId,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        // The page may have been removed from the pool while pinned
        // (merge frees the absorbed page); an unpin miss is benign here.
        let _ = self.cache.borrow_mut().unpin(self.page);
    }
}

/// Fixed pool of frames over one paged file.
#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<FrameRef>,
    cache: Rc<RefCell<LruCache>>,
    free_list: VecDeque<FrameId>,
    disk: PagedFile,
}

impl BufferPool {
    pub fn new(pool_size: usize, disk: PagedFile) -> Self {
        let frames = (0..pool_size)
            .map(|id| Rc::new(RefCell::new(Frame::new(id))))
            .collect();
        Self {
            frames,
            cache: Rc::new(RefCell::new(LruCache::new(pool_size))),
            free_list: (0..pool_size).collect(),
            disk,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk(&self) -> &PagedFile {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut PagedFile {
        &mut self.disk
    }

    /// Returns the frame of `page`, reading it from disk on a miss.
    pub fn get_frame(&mut self, page: PageId) -> Result<FrameRef> {
        if page == 0 {
            return Err(Error::GetRootPage);
        }
        let hit = self.cache.borrow_mut().get(page);
        if let Some(frame_id) = hit {
            return Ok(Rc::clone(&self.frames[frame_id]));
        }
        let image = self.disk.read_page(page)?;
        self.install(image, false)
    }

    /// Allocates a fresh page through the paged file and installs it into
    /// a frame. Every new page starts dirty.
    pub fn allocate_frame(&mut self) -> Result<FrameRef> {
        let image = self.disk.get_free_page()?;
        self.install(image, true)
    }

    /// `get_frame` plus an immediate pin.
    pub fn get_pinned(&mut self, page: PageId) -> Result<(FrameRef, PinGuard)> {
        let frame = self.get_frame(page)?;
        let guard = self.pin_frame(page)?;
        Ok((frame, guard))
    }

    /// `allocate_frame` plus an immediate pin.
    pub fn allocate_pinned(&mut self) -> Result<(FrameRef, PinGuard)> {
        let frame = self.allocate_frame()?;
        let page = frame.borrow().page_id();
        let guard = self.pin_frame(page)?;
        Ok((frame, guard))
    }

    pub fn pin_frame(&mut self, page: PageId) -> Result<PinGuard> {
        self.cache.borrow_mut().pin(page)?;
        Ok(PinGuard {
            cache: Rc::clone(&self.cache),
            page,
        })
    }

    /// Manual unpin for embedders that do not use [`PinGuard`].
    pub fn unpin_frame(&mut self, page: PageId) -> Result<()> {
        self.cache.borrow_mut().unpin(page)
    }

    pub fn pin_count(&self, page: PageId) -> u32 {
        self.cache.borrow().pin_count(page)
    }

    pub fn is_resident(&self, page: PageId) -> bool {
        self.cache.borrow().contains(page)
    }

    /// Returns the frame's slot to the free list and frees its page in
    /// the file. A dirty resident is discarded without being written; the
    /// caller's decision to remove is authoritative.
    pub fn remove_frame(&mut self, frame: &FrameRef) -> Result<()> {
        let (page, frame_id) = {
            let f = frame.borrow();
            (f.page_id(), f.id())
        };
        self.cache.borrow_mut().remove(page)?;
        frame.borrow_mut().clear_dirty();
        self.free_list.push_back(frame_id);
        self.disk.set_page_free(page)?;
        trace!("removed frame {frame_id} and freed page {page}");
        Ok(())
    }

    /// Writes the frame through if dirty, then clears the dirty bit.
    pub fn flush_frame(&mut self, frame: &FrameRef) -> Result<()> {
        let mut f = frame.borrow_mut();
        if f.is_dirty() {
            self.disk.write_page(f.page())?;
            f.clear_dirty();
            trace!("flushed page {}", f.page_id());
        }
        Ok(())
    }

    /// Flushes every dirty frame in the pool.
    pub fn flush_all(&mut self) -> Result<()> {
        for frame in &self.frames {
            let mut f = frame.borrow_mut();
            if f.is_dirty() {
                self.disk.write_page(f.page())?;
                f.clear_dirty();
            }
        }
        Ok(())
    }

    /// Visits every frame in slot order.
    pub fn for_each_frame(&self, mut visit: impl FnMut(&Frame)) {
        for frame in &self.frames {
            visit(&frame.borrow());
        }
    }

    /// Binds `image` to a free frame and makes it resident.
    fn install(&mut self, image: PageImage, dirty: bool) -> Result<FrameRef> {
        let page = image.page_id();
        let frame_id = self.acquire_slot()?;
        {
            let mut frame = self.frames[frame_id].borrow_mut();
            frame.reassign(image);
            if dirty {
                frame.mark_dirty();
            }
        }
        if let Err(e) = self.cache.borrow_mut().put(page, frame_id) {
            self.free_list.push_front(frame_id);
            return Err(e);
        }
        Ok(Rc::clone(&self.frames[frame_id]))
    }

    /// Picks a frame slot: free list first, else evict the LRU victim,
    /// writing it back if dirty.
    fn acquire_slot(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Ok(frame_id);
        }

        let (victim_page, frame_id) = self.cache.borrow_mut().victim()?;
        let frame = Rc::clone(&self.frames[frame_id]);
        let mut f = frame.borrow_mut();
        if f.is_dirty() {
            if let Err(e) = self.disk.write_page(f.page()) {
                // Failed write-back: the victim stays resident.
                let _ = self.cache.borrow_mut().put(victim_page, frame_id);
                return Err(e);
            }
            f.clear_dirty();
        }
        trace!("evicted page {victim_page} from frame {frame_id}");
        Ok(frame_id)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!("failed to flush buffer pool on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch_pool(pool_size: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = PagedFile::open(dir.path().join("pool.db")).unwrap();
        (BufferPool::new(pool_size, disk), dir)
    }

    #[test]
    fn page_zero_is_guarded() {
        let (mut pool, _dir) = scratch_pool(2);
        assert!(matches!(pool.get_frame(0), Err(Error::GetRootPage)));
    }

    #[test]
    fn allocate_marks_dirty_and_resident() {
        let (mut pool, _dir) = scratch_pool(2);
        let frame = pool.allocate_frame().unwrap();
        assert_eq!(frame.borrow().page_id(), 1);
        assert!(frame.borrow().is_dirty());
        assert!(pool.is_resident(1));
    }

    #[test]
    fn get_returns_cached_frame() {
        let (mut pool, _dir) = scratch_pool(2);
        let a = pool.allocate_frame().unwrap();
        let b = pool.get_frame(1).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let (mut pool, _dir) = scratch_pool(1);
        {
            let frame = pool.allocate_frame().unwrap();
            let mut f = frame.borrow_mut();
            f.page_mut().payload_mut().unwrap()[0] = 0x5A;
            f.mark_dirty();
        }
        // A second allocation must evict page 1 through a write-back.
        let frame = pool.allocate_frame().unwrap();
        assert_eq!(frame.borrow().page_id(), 2);
        assert!(!pool.is_resident(1));

        let read = pool.get_frame(1).unwrap();
        assert_eq!(read.borrow().page().payload().unwrap()[0], 0x5A);
    }

    #[test]
    fn pinned_frame_is_never_evicted() {
        let (mut pool, _dir) = scratch_pool(1);
        pool.allocate_frame().unwrap();
        let _pin = pool.pin_frame(1).unwrap();
        assert!(matches!(
            pool.allocate_frame(),
            Err(Error::CacheNoMoreVictim)
        ));
    }

    #[test]
    fn pin_guard_releases_on_drop() {
        let (mut pool, _dir) = scratch_pool(1);
        pool.allocate_frame().unwrap();
        {
            let _pin = pool.pin_frame(1).unwrap();
            assert_eq!(pool.pin_count(1), 1);
        }
        assert_eq!(pool.pin_count(1), 0);
        // With the pin gone the frame can be evicted again.
        pool.allocate_frame().unwrap();
        assert!(!pool.is_resident(1));
    }

    #[test]
    fn pin_of_nonresident_page_fails() {
        let (mut pool, _dir) = scratch_pool(1);
        assert!(matches!(pool.pin_frame(3), Err(Error::KeyNotFound)));
        assert!(matches!(pool.unpin_frame(3), Err(Error::KeyNotFound)));
    }

    #[test]
    fn remove_frame_discards_dirty_contents() {
        let (mut pool, _dir) = scratch_pool(2);
        let frame = pool.allocate_frame().unwrap();
        frame.borrow_mut().page_mut().payload_mut().unwrap()[0] = 0xEE;
        frame.borrow_mut().mark_dirty();
        pool.remove_frame(&frame).unwrap();

        assert!(!pool.is_resident(1));
        assert!(pool.disk().header().is_free(1));
        // The discarded bytes were never written; reallocation scrubs.
        let fresh = pool.allocate_frame().unwrap();
        assert_eq!(fresh.borrow().page_id(), 1);
        assert!(fresh
            .borrow()
            .page()
            .payload()
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn flush_all_clears_every_dirty_bit() {
        let (mut pool, _dir) = scratch_pool(4);
        for _ in 0..3 {
            pool.allocate_frame().unwrap();
        }
        pool.flush_all().unwrap();
        let mut dirty = 0;
        pool.for_each_frame(|frame| {
            if frame.is_dirty() {
                dirty += 1;
            }
        });
        assert_eq!(dirty, 0);
    }
}
