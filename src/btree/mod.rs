//! Clustered B+tree index over the paged storage substrate.
//!
//! - `record`: the intra-page record format (11-byte linked-list header,
//!   tagged key, leaf/internal record bodies, cursors).
//! - `node`: [`NodeView`], the typed cursor/mutator over one page's
//!   sentinel-bounded record list; shared between leaf and internal pages
//!   through the [`RecordBody`] parameter.
//! - `meta`: [`IndexMeta`], the root page, depth, record count, and
//!   schema, persisted in the file header.
//! - `tree`: [`Index`], the public index with descent, insert with
//!   pre-emptive split, delete with union/borrow rebalance, traversal,
//!   and validation.

mod meta;
mod node;
mod record;
mod tree;

pub use meta::IndexMeta;
pub use node::{InternalNode, LeafNode, NodeView};
pub use record::{
    Cursor, NodeRecord, RecordBody, RecordHeader, RecordKey, MAX_KEY_SIZE, MAX_RECORD_SIZE,
    RECORD_HEADER_SIZE,
};
pub use tree::Index;
