//! Error taxonomy for the storage engine.
//!
//! One flat sum type covers every failure the engine can report. The
//! variants fall into five groups:
//!
//! - **Logical**: expected outcomes of specific operations
//!   (`KeyNotFound`, `KeyAlreadyExist`, `InvalidKeyType`,
//!   `InvalidInsertPos`). Surfaced unchanged to callers.
//! - **Resource**: the buffer pool cannot satisfy a request because the
//!   working set exceeds the pool, or a pin was mismanaged. Fatal to the
//!   operation.
//! - **I/O**: page file failures. Fatal to the operation.
//! - **Structural**: internal signals exchanged between the tree, the
//!   pool, and the node views (`RootHeightDecrease` triggers a tree
//!   shrink, `PageOverflow` triggers compaction). These are caught before
//!   the public API boundary.
//! - **Unknown**: serialization failures that are not the recoverable
//!   page-overflow case.
//!
//! Each layer converts only what it locally owns: the pool turns a cache
//! miss into a disk read but passes I/O errors through untouched; the
//! index catches `PageOverflow` exactly once per operation (compact and
//! retry) and reports a second occurrence as `Unknown`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Logical.
    #[error("key not found")]
    KeyNotFound,
    #[error("key already exists")]
    KeyAlreadyExist,
    #[error("key type does not match the index key schema")]
    InvalidKeyType,
    #[error("invalid insert position")]
    InvalidInsertPos,

    // Resource.
    #[error("buffer pool has no frame to reuse")]
    PoolNoFreeFrame,
    #[error("every resident frame is pinned, no eviction victim")]
    CacheNoMoreVictim,
    #[error("page is not resident in the buffer pool")]
    CacheEntryNotFound,
    #[error("frame is not pinned")]
    FrameNotPinned,
    #[error("unpin on a page with no outstanding pins")]
    KeyNotPinned,
    #[error("page is already pinned")]
    KeyAlreadyPinned,

    // I/O.
    #[error("failed to read page {page}")]
    DiskRead {
        page: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write page {page}")]
    DiskWrite {
        page: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("page {0} lies beyond the end of the file")]
    DiskReadOverflow(u32),
    #[error("file is at capacity, cannot allocate another page")]
    DiskWriteOverflow,
    #[error("invalid page number {0}")]
    InvalidPageNum(u32),
    #[error("page image has no payload")]
    InvalidPagePayload,

    // Structural signals.
    #[error("node is not full")]
    NodeNotFull,
    #[error("pop from an empty node")]
    PopEmptyNode,
    #[error("root height decrease requested")]
    RootHeightDecrease,
    #[error("page 0 is the file header, not a data page")]
    GetRootPage,
    #[error("root page has no parent")]
    GetRootParent,
    #[error("page is already free")]
    DeletedPageNotExist,
    #[error("record does not fit in the page payload")]
    PageOverflow,

    // Serialization failures outside the recoverable overflow case.
    #[error("serialization failure: {0}")]
    Unknown(String),
}

impl Error {
    /// True for the recoverable in-page overflow signal that the index
    /// answers with compaction.
    pub fn is_page_overflow(&self) -> bool {
        matches!(self, Error::PageOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_overflow_is_recoverable() {
        assert!(Error::PageOverflow.is_page_overflow());
        assert!(!Error::KeyNotFound.is_page_overflow());
    }

    #[test]
    fn io_errors_carry_their_source() {
        let err = Error::DiskRead {
            page: 7,
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        };
        assert!(err.to_string().contains("page 7"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
