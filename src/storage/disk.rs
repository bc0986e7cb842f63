//! Block-addressable page file with a free-page bitmap.
//!
//! One file backs one index. Page 0 holds the file header; page N
//! (N ≥ 1) holds one page image at byte offset `N * PAGE_SIZE`, so the
//! file length is always a multiple of the page size.
//!
//! ## File header (page 0)
//!
//! ```text
//! magic            8   "burrowdb"
//! version          4
//! total_page_count 4   slots ever allocated, header page included
//! in_use_count     4   live data pages
//! root_page        4   persisted index meta
//! depth            4
//! record_count     8
//! index_id         4
//! key_tag          1
//! is_primary       1
//! reserved         2
//! free_bitmap      512  one bit per slot; set = free and reusable
//! ```
//!
//! The header is rewritten synchronously on every allocation and free so
//! the bitmap on disk never trails the in-memory state, and once more on
//! drop to capture the index meta fields.
//!
//! ## Allocation
//!
//! `get_free_page` prefers the lowest-index free slot (an O(pages) bitmap
//! scan); only when no slot is free does the file grow by one zeroed
//! page. Freeing is lazy: the slot's contents stay on disk untouched and
//! the caller of a future allocation receives a zeroed image instead of
//! the stale bytes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, error};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FREE_BITMAP_BYTES, MAX_PAGE_COUNT, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::storage::page::{PageId, PageImage};

pub const FILE_MAGIC: &[u8; 8] = b"burrowdb";
pub const FILE_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 8],
    version: U32,
    total_page_count: U32,
    in_use_count: U32,
    root_page: U32,
    depth: U32,
    record_count: U64,
    index_id: U32,
    key_tag: u8,
    is_primary: u8,
    reserved: [u8; 2],
    free_bitmap: [u8; FREE_BITMAP_BYTES],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() <= PAGE_SIZE);

impl FileHeader {
    fn new() -> Self {
        Self {
            magic: *FILE_MAGIC,
            version: U32::new(FILE_VERSION),
            total_page_count: U32::new(1),
            in_use_count: U32::new(0),
            root_page: U32::new(0),
            depth: U32::new(1),
            record_count: U64::new(0),
            index_id: U32::new(0),
            key_tag: 0,
            is_primary: 0,
            reserved: [0; 2],
            free_bitmap: [0; FREE_BITMAP_BYTES],
        }
    }

    pub fn total_page_count(&self) -> u32 {
        self.total_page_count.get()
    }

    pub fn in_use_count(&self) -> u32 {
        self.in_use_count.get()
    }

    pub fn root_page(&self) -> PageId {
        self.root_page.get()
    }

    pub fn set_root_page(&mut self, page: PageId) {
        self.root_page = U32::new(page);
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = U32::new(depth);
    }

    pub fn record_count(&self) -> u64 {
        self.record_count.get()
    }

    pub fn set_record_count(&mut self, count: u64) {
        self.record_count = U64::new(count);
    }

    pub fn index_id(&self) -> u32 {
        self.index_id.get()
    }

    pub fn set_index_id(&mut self, id: u32) {
        self.index_id = U32::new(id);
    }

    pub fn key_tag(&self) -> u8 {
        self.key_tag
    }

    pub fn set_key_tag(&mut self, tag: u8) {
        self.key_tag = tag;
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary != 0
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.is_primary = primary as u8;
    }

    /// True when the slot's bit is set, i.e. the page was freed and can
    /// be handed out again.
    pub fn is_free(&self, page: PageId) -> bool {
        let idx = page as usize;
        self.free_bitmap[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_free_bit(&mut self, page: PageId, free: bool) {
        let idx = page as usize;
        if free {
            self.free_bitmap[idx / 8] |= 1 << (idx % 8);
        } else {
            self.free_bitmap[idx / 8] &= !(1 << (idx % 8));
        }
    }

    fn first_free_slot(&self) -> Option<PageId> {
        (1..self.total_page_count()).find(|&page| self.is_free(page))
    }

    /// Number of set bits among the allocated slots.
    pub fn free_count(&self) -> u32 {
        (1..self.total_page_count())
            .filter(|&page| self.is_free(page))
            .count() as u32
    }
}

/// Owner of the backing file. Reads and writes whole pages and keeps the
/// free-page accounting in the header page.
#[derive(Debug)]
pub struct PagedFile {
    file: File,
    header: FileHeader,
}

impl PagedFile {
    /// Opens the file at `path`, creating and initializing it when absent
    /// or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())
            .map_err(|source| Error::DiskRead { page: 0, source })?;

        let len = file
            .metadata()
            .map_err(|source| Error::DiskRead { page: 0, source })?
            .len();

        if len == 0 {
            let mut this = Self {
                file,
                header: FileHeader::new(),
            };
            this.write_header()?;
            return Ok(this);
        }

        let mut block = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut block))
            .map_err(|source| Error::DiskRead { page: 0, source })?;

        let header =
            FileHeader::read_from_bytes(&block[..std::mem::size_of::<FileHeader>()])
                .map_err(|e| Error::Unknown(format!("failed to read file header: {e:?}")))?;
        if &header.magic != FILE_MAGIC {
            return Err(Error::Unknown("bad file magic".into()));
        }
        if header.version.get() != FILE_VERSION {
            return Err(Error::Unknown(format!(
                "unsupported file version {}",
                header.version.get()
            )));
        }

        Ok(Self { file, header })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut FileHeader {
        &mut self.header
    }

    /// Reads exactly one page-sized block at `id * PAGE_SIZE`.
    pub fn read_page(&mut self, id: PageId) -> Result<PageImage> {
        if id == 0 {
            return Err(Error::InvalidPageNum(0));
        }
        if id >= self.header.total_page_count() {
            return Err(Error::DiskReadOverflow(id));
        }

        let mut block = [0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_offset(id)))
            .and_then(|_| self.file.read_exact(&mut block))
            .map_err(|source| Error::DiskRead { page: id, source })?;
        PageImage::deserialize(&block)
    }

    /// Serializes `image` to its page offset and flushes through to the
    /// OS before returning.
    pub fn write_page(&mut self, image: &PageImage) -> Result<()> {
        let id = image.page_id();
        if id == 0 {
            return Err(Error::InvalidPageNum(0));
        }
        if id >= self.header.total_page_count() {
            return Err(Error::DiskWriteOverflow);
        }

        let block = image.serialize()?;
        self.file
            .seek(SeekFrom::Start(page_offset(id)))
            .and_then(|_| self.file.write_all(&block))
            .and_then(|_| self.file.flush())
            .map_err(|source| Error::DiskWrite { page: id, source })?;
        Ok(())
    }

    /// Returns a scrubbed page image bound to the lowest-index free slot,
    /// or grows the file by one zeroed page.
    pub fn get_free_page(&mut self) -> Result<PageImage> {
        if let Some(slot) = self.header.first_free_slot() {
            self.header.set_free_bit(slot, false);
            self.header.in_use_count = U32::new(self.header.in_use_count() + 1);
            self.write_header()?;
            debug!("reusing free page {slot}");
            return Ok(PageImage::zeroed(slot));
        }

        let id = self.header.total_page_count();
        if id as usize >= MAX_PAGE_COUNT {
            return Err(Error::DiskWriteOverflow);
        }

        let zeroes = [0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_offset(id)))
            .and_then(|_| self.file.write_all(&zeroes))
            .map_err(|source| Error::DiskWrite { page: id, source })?;

        self.header.total_page_count = U32::new(id + 1);
        self.header.in_use_count = U32::new(self.header.in_use_count() + 1);
        self.write_header()?;
        debug!("extended file with page {id}");
        Ok(PageImage::zeroed(id))
    }

    /// Marks the slot free and decrements the in-use count. The page
    /// contents are left untouched on disk.
    pub fn set_page_free(&mut self, id: PageId) -> Result<()> {
        if id == 0 || id >= self.header.total_page_count() {
            return Err(Error::InvalidPageNum(id));
        }
        if self.header.is_free(id) {
            return Err(Error::DeletedPageNotExist);
        }

        self.header.set_free_bit(id, true);
        self.header.in_use_count = U32::new(self.header.in_use_count() - 1);
        self.write_header()?;
        debug!("freed page {id}");
        Ok(())
    }

    /// Rewrites the header page from the in-memory header.
    pub fn write_header(&mut self) -> Result<()> {
        let mut block = [0u8; PAGE_SIZE];
        block[..std::mem::size_of::<FileHeader>()].copy_from_slice(self.header.as_bytes());
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&block))
            .and_then(|_| self.file.flush())
            .map_err(|source| Error::DiskWrite { page: 0, source })?;
        Ok(())
    }

    /// Forces everything down to the device.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|source| Error::DiskWrite { page: 0, source })
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        if let Err(e) = self.write_header() {
            error!("failed to write file header on close: {e}");
        }
    }
}

fn page_offset(id: PageId) -> u64 {
    id as u64 * PAGE_SIZE as u64
}
