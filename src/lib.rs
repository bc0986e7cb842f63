//! # burrowdb
//!
//! A single-file, disk-backed clustered B+tree storage engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Index (clustered B+tree)      │
//! ├──────────────────────────────────────┤
//! │   Node views (in-page record lists)  │
//! ├──────────────────────────────────────┤
//! │  Buffer pool (frames, pins, LRU)     │
//! ├──────────────────────────────────────┤
//! │  Paged file (bitmap-tracked pages)   │
//! └──────────────────────────────────────┘
//! ```
//!
//! One file backs one index. Page 0 is the file header (page counters,
//! free bitmap, persisted index meta); every other page is a tree node
//! holding a bump-allocated, lazily-deleted record list bounded by
//! infimum/supremum sentinels. Pages become resident in a fixed pool of
//! frames with pin counts and LRU write-back eviction; the file is
//! authoritative and every persistent change is a page write.
//!
//! ## Quick start
//!
//! ```no_run
//! use burrowdb::{Column, Datum, FieldSchema, FieldType, Index, Key, KeySchema, KeyType};
//!
//! # fn main() -> burrowdb::Result<()> {
//! let mut index = Index::make_index(
//!     1,
//!     "accounts.db",
//!     KeySchema::new("id", KeyType::Int),
//!     vec![FieldSchema::new("balance", FieldType::Int)],
//! )?;
//!
//! index.insert(Key::Int(1), Column::new(vec![Datum::Int(80)]))?;
//! let value = index.search(&Key::Int(1))?;
//! index.traverse(|key, value| println!("{key:?} -> {value:?}"))?;
//! index.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! The core is single-writer and single-threaded: every operation runs
//! to completion before the next begins, and invariants hold at
//! operation boundaries. An embedding runtime that adds concurrency
//! interposes a lock at the index operation boundary.

pub mod btree;
pub mod config;
pub mod encoding;
pub mod error;
pub mod storage;
pub mod types;

pub use btree::{Cursor, Index, IndexMeta};
pub use error::{Error, Result};
pub use types::{Column, Datum, FieldSchema, FieldType, Key, KeySchema, KeyType, RecordSchema};
