//! Compile-time geometry for the storage engine.
//!
//! Everything here is a hard layout constant: changing any of these values
//! changes the on-disk format. The page is deliberately small (1 KiB) and
//! nodes are capped at 16 records so that splits, merges, and compaction
//! are exercised by modest workloads.

/// Fixed unit of file I/O and of in-memory residency.
pub const PAGE_SIZE: usize = 1024;

/// Bytes reserved at the front of every non-header page for the page header.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Bytes of record payload per page.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Maximum number of page slots a single file can address. One bit per
/// slot in the file header's free bitmap.
pub const MAX_PAGE_COUNT: usize = 4096;

/// Free bitmap size in bytes.
pub const FREE_BITMAP_BYTES: usize = MAX_PAGE_COUNT / 8;

/// Upper bound on user records per node. Sentinels do not count.
pub const MAX_RECORDS_PER_PAGE: usize = 16;

/// Lower bound on user records per non-root node.
pub const MIN_RECORDS_PER_PAGE: usize = MAX_RECORDS_PER_PAGE / 2;

/// Default number of frames in a buffer pool.
pub const DEFAULT_POOL_SIZE: usize = 300;

/// Records kept in the left node by a split.
pub const SPLIT_LEFT_COUNT: usize = MAX_RECORDS_PER_PAGE - MAX_RECORDS_PER_PAGE / 2;

/// Records moved to the new right sibling by a split.
pub const SPLIT_RIGHT_COUNT: usize = MAX_RECORDS_PER_PAGE / 2;

const _: () = assert!(PAGE_HEADER_SIZE < PAGE_SIZE);
const _: () = assert!(MIN_RECORDS_PER_PAGE * 2 <= MAX_RECORDS_PER_PAGE);
const _: () = assert!(SPLIT_LEFT_COUNT + SPLIT_RIGHT_COUNT == MAX_RECORDS_PER_PAGE);
