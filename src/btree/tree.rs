//! Clustered B+tree index.
//!
//! The index owns the buffer pool (and through it the page file) plus the
//! meta: root page, depth, record count, schema. Leaf pages hold the row
//! itself; internal pages hold `(separator key, child page)` records. All
//! pages at one level are linked into a doubly linked sibling list.
//!
//! ## Insert
//!
//! Descend to the target leaf, then pre-emptively rebalance: a full node
//! on the path is split before the insert ever runs, growing a new root
//! when the split reaches it. The insert itself is a single in-page
//! append; if accumulated tombstones leave no room for the append, the
//! leaf's live records are moved into a fresh page (compaction) and the
//! insert retried once.
//!
//! ## Delete
//!
//! Descend, and when the leaf sits at the minimum record count first
//! union it with a same-parent sibling (left preferred) or borrow one
//! record from a sibling holding spare records (left preferred). A union
//! removes the absorbed page's record from its parent, which can cascade
//! the rebalance upward; a root left with a single record hands its sole
//! child the root role and the tree loses a level.
//!
//! ## Separator convention
//!
//! The first record of an internal page is a placeholder lower bound:
//! descent for a key below every separator follows the first child, so
//! the leftmost separator key is not required to equal its subtree's
//! minimum. Everywhere else separators are maintained to the subtree
//! minimum on split, borrow, and merge.
//!
//! ## Pinning
//!
//! Structural operations pin at most two frames at a time (the node pair
//! being split, merged, or moved) and fetch everything else transiently,
//! so any pool of three or more frames can run every path.

use log::debug;
use smallvec::SmallVec;

use crate::config::{
    DEFAULT_POOL_SIZE, MAX_PAGE_COUNT, MAX_RECORDS_PER_PAGE, MIN_RECORDS_PER_PAGE,
    PAGE_PAYLOAD_SIZE, SPLIT_RIGHT_COUNT,
};
use crate::error::{Error, Result};
use crate::storage::{BufferPool, FrameRef, PageHeader, PageId, PagedFile};
use crate::types::{Column, FieldSchema, Key, KeySchema, RecordSchema};

use super::meta::IndexMeta;
use super::node::{InternalNode, LeafNode};
use super::record::{Cursor, NodeRecord, MAX_KEY_SIZE, MAX_RECORD_SIZE};

/// Disk-backed clustered index over one page file.
pub struct Index {
    meta: IndexMeta,
    pool: BufferPool,
}

fn frame_header(frame: &FrameRef) -> PageHeader {
    *frame.borrow().page().header()
}

impl Index {
    /// Creates a new index: opens (or creates) the file, allocates the
    /// root leaf page, and writes the initial meta.
    pub fn make_index(
        id: u32,
        path: impl AsRef<std::path::Path>,
        key_schema: KeySchema,
        field_schema: Vec<FieldSchema>,
    ) -> Result<Self> {
        Self::make_index_sized(id, path, key_schema, field_schema, DEFAULT_POOL_SIZE)
    }

    /// [`make_index`](Self::make_index) with an explicit pool size.
    pub fn make_index_sized(
        id: u32,
        path: impl AsRef<std::path::Path>,
        key_schema: KeySchema,
        field_schema: Vec<FieldSchema>,
        pool_size: usize,
    ) -> Result<Self> {
        let disk = PagedFile::open(path)?;
        if disk.header().root_page() != 0 {
            return Err(Error::Unknown(
                "file already contains an index; open it instead".into(),
            ));
        }
        let schema = RecordSchema {
            key: key_schema,
            fields: field_schema,
        };
        let mut index = Self {
            meta: IndexMeta::new(id, schema),
            pool: BufferPool::new(pool_size, disk),
        };
        let root = index.allocate_node(id, 0, true)?;
        index.meta.root_page = root.borrow().page_id();
        index.persist_meta()?;
        debug!("created index {id} with root page {}", index.meta.root_page);
        Ok(index)
    }

    /// Reopens an existing index file, restoring the meta from the file
    /// header.
    pub fn open(
        path: impl AsRef<std::path::Path>,
        key_schema: KeySchema,
        field_schema: Vec<FieldSchema>,
    ) -> Result<Self> {
        Self::open_sized(path, key_schema, field_schema, DEFAULT_POOL_SIZE)
    }

    /// [`open`](Self::open) with an explicit pool size.
    pub fn open_sized(
        path: impl AsRef<std::path::Path>,
        key_schema: KeySchema,
        field_schema: Vec<FieldSchema>,
        pool_size: usize,
    ) -> Result<Self> {
        let disk = PagedFile::open(path)?;
        if disk.header().root_page() == 0 {
            return Err(Error::Unknown("file does not contain an index".into()));
        }
        let schema = RecordSchema {
            key: key_schema,
            fields: field_schema,
        };
        let meta = IndexMeta::load_from(disk.header(), schema)?;
        Ok(Self {
            meta,
            pool: BufferPool::new(pool_size, disk),
        })
    }

    pub fn id(&self) -> u32 {
        self.meta.id
    }

    pub fn depth(&self) -> u32 {
        self.meta.depth
    }

    pub fn number_of_records(&self) -> u64 {
        self.meta.number_of_records
    }

    pub fn root_page(&self) -> PageId {
        self.meta.root_page
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Flushes every dirty frame and persists the meta into the file
    /// header.
    pub fn flush(&mut self) -> Result<()> {
        self.pool.flush_all()?;
        self.persist_meta()
    }

    fn persist_meta(&mut self) -> Result<()> {
        self.meta.store_into(self.pool.disk_mut().header_mut());
        self.pool.disk_mut().write_header()
    }

    // ---- point operations ----------------------------------------------

    /// Inserts `(key, value)`; an existing equal key is `KeyAlreadyExist`.
    pub fn insert(&mut self, key: Key, value: Column) -> Result<()> {
        self.meta.check_key(&key)?;
        let key_len = key.encoded_len();
        if key_len > MAX_KEY_SIZE {
            return Err(Error::Unknown(format!(
                "key of {key_len} bytes exceeds the {MAX_KEY_SIZE}-byte limit"
            )));
        }
        let record_len = NodeRecord::user(key.clone(), value.clone())
            .header
            .length() as usize;
        if record_len > MAX_RECORD_SIZE {
            return Err(Error::Unknown(format!(
                "record of {record_len} bytes exceeds the {MAX_RECORD_SIZE}-byte limit"
            )));
        }

        let leaf = self.search_leaf(&key)?;
        self.balance_for_insert(leaf)?;
        // The balance step can split or move the leaf; descend again.
        let leaf = self.search_leaf(&key)?;

        match self.leaf_insert(leaf, key.clone(), value.clone()) {
            Err(Error::PageOverflow) => {
                let compacted = self.move_frame(leaf, None)?;
                match self.leaf_insert(compacted, key, value) {
                    Err(Error::PageOverflow) => {
                        return Err(Error::Unknown(
                            "insert overflow persisted after compaction".into(),
                        ))
                    }
                    other => other?,
                }
            }
            other => other?,
        }
        self.meta.number_of_records += 1;
        Ok(())
    }

    fn leaf_insert(&mut self, page: PageId, key: Key, value: Column) -> Result<()> {
        let frame = self.pool.get_frame(page)?;
        let node = LeafNode::new(frame)?;
        node.insert_record(key, value)?;
        Ok(())
    }

    /// Removes the record with `key`; `KeyNotFound` when absent.
    pub fn remove(&mut self, key: &Key) -> Result<()> {
        self.meta.check_key(key)?;
        let leaf = self.search_leaf(key)?;
        let hdr = self.page_header(leaf)?;
        if leaf != self.meta.root_page
            && hdr.number_of_records() as usize == MIN_RECORDS_PER_PAGE
        {
            self.rebalance_for_delete(leaf)?;
        }
        // Rebalancing can merge the leaf away; descend again.
        let leaf = self.search_leaf(key)?;
        let frame = self.pool.get_frame(leaf)?;
        let node = LeafNode::new(frame)?;
        node.remove_record(key)?;
        self.meta.number_of_records -= 1;
        Ok(())
    }

    /// Returns the value stored under `key`.
    pub fn search(&mut self, key: &Key) -> Result<Column> {
        self.meta.check_key(key)?;
        let leaf = self.search_leaf(key)?;
        let frame = self.pool.get_frame(leaf)?;
        let node = LeafNode::new(frame)?;
        Ok(node.search_record(key)?.body)
    }

    /// Positioned lookup: the leaf record with the greatest key `≤ key`,
    /// or the first user position of the leaf that would hold `key`.
    pub fn get_cursor(&mut self, key: &Key) -> Result<Cursor<Column>> {
        self.meta.check_key(key)?;
        let leaf = self.search_leaf(key)?;
        let frame = self.pool.get_frame(leaf)?;
        LeafNode::new(frame)?.get_cursor(key)
    }

    /// Visits every leaf record in ascending key order.
    pub fn traverse<F: FnMut(&Key, &Column)>(&mut self, mut visit: F) -> Result<()> {
        let mut page = self.leftmost_leaf()?;
        while page != 0 {
            let frame = self.pool.get_frame(page)?;
            let next = frame_header(&frame).next_page();
            let node = LeafNode::new(frame)?;
            node.for_each_record(|cursor| {
                visit(cursor.record.key.user_key()?, &cursor.record.body);
                Ok(())
            })?;
            page = next;
        }
        Ok(())
    }

    // ---- descent -------------------------------------------------------

    fn search_leaf(&mut self, key: &Key) -> Result<PageId> {
        let mut page = self.meta.root_page;
        loop {
            let frame = self.pool.get_frame(page)?;
            if frame_header(&frame).is_leaf() {
                return Ok(page);
            }
            let node = InternalNode::new(frame)?;
            let cursor = node.get_cursor(key)?;
            if cursor.record.key.is_sentinel() {
                return Err(Error::Unknown(format!(
                    "internal page {page} has no records to descend through"
                )));
            }
            page = cursor.record.body;
        }
    }

    fn leftmost_leaf(&mut self) -> Result<PageId> {
        let mut page = self.meta.root_page;
        loop {
            let frame = self.pool.get_frame(page)?;
            if frame_header(&frame).is_leaf() {
                return Ok(page);
            }
            let node = InternalNode::new(frame)?;
            let first = node.first_user_cursor()?;
            if first.record.key.is_sentinel() {
                return Err(Error::Unknown(format!(
                    "internal page {page} has no records to descend through"
                )));
            }
            page = first.record.body;
        }
    }

    fn page_header(&mut self, page: PageId) -> Result<PageHeader> {
        let frame = self.pool.get_frame(page)?;
        Ok(frame_header(&frame))
    }

    fn parent_link(&mut self, page: PageId) -> Result<Option<(PageId, u16)>> {
        let hdr = self.page_header(page)?;
        if hdr.parent_page() == 0 {
            Ok(None)
        } else {
            Ok(Some((hdr.parent_page(), hdr.parent_record_off())))
        }
    }

    fn node_min_key(&mut self, page: PageId) -> Result<Key> {
        let frame = self.pool.get_frame(page)?;
        if frame_header(&frame).is_leaf() {
            LeafNode::new(frame)?.min_key()
        } else {
            InternalNode::new(frame)?.min_key()
        }
    }

    // ---- node allocation and compaction --------------------------------

    fn allocate_node(&mut self, index_id: u32, level: u8, is_leaf: bool) -> Result<FrameRef> {
        let frame = self.pool.allocate_frame()?;
        {
            let mut f = frame.borrow_mut();
            let header = f.page_mut().header_mut();
            header.set_index_id(index_id);
            header.set_level(level);
            header.set_leaf(is_leaf);
            header.set_prev_page(0);
            header.set_next_page(0);
            header.set_parent(0, 0);
            f.mark_dirty();
        }
        if is_leaf {
            LeafNode::init(frame.clone())?;
        } else {
            InternalNode::init(frame.clone())?;
        }
        Ok(frame)
    }

    /// Moves the page's live records into a fresh page, reclaiming
    /// tombstone space, and rewires parent and sibling links to the new
    /// page. With `prefix` only the first `prefix` records are taken;
    /// the rest are deliberately dropped (the merge retry path re-copies
    /// them from their source page). Returns the new page id.
    fn move_frame(&mut self, page: PageId, prefix: Option<usize>) -> Result<PageId> {
        let (frame, pin) = self.pool.get_pinned(page)?;
        let hdr = frame_header(&frame);
        let new_frame = self.allocate_node(hdr.index_id(), hdr.level(), hdr.is_leaf())?;
        let new_page = new_frame.borrow().page_id();
        let new_pin = self.pool.pin_frame(new_page)?;
        {
            let mut nf = new_frame.borrow_mut();
            let h = nf.page_mut().header_mut();
            h.set_prev_page(hdr.prev_page());
            h.set_next_page(hdr.next_page());
            h.set_parent(hdr.parent_page(), hdr.parent_record_off());
            nf.mark_dirty();
        }
        self.move_node_records(&frame, &new_frame, hdr.is_leaf(), prefix)?;

        if hdr.parent_page() == 0 {
            self.meta.root_page = new_page;
        } else {
            let parent_frame = self.pool.get_frame(hdr.parent_page())?;
            let parent = InternalNode::new(parent_frame)?;
            let cursor = parent.cursor_at_start(hdr.parent_record_off() as usize)?;
            if cursor.record.body != page {
                return Err(Error::Unknown(format!(
                    "parent record names page {} instead of moved page {page}",
                    cursor.record.body
                )));
            }
            parent.set_child_at(&cursor, new_page)?;
        }
        if hdr.prev_page() != 0 {
            let prev = self.pool.get_frame(hdr.prev_page())?;
            let mut pf = prev.borrow_mut();
            pf.page_mut().header_mut().set_next_page(new_page);
            pf.mark_dirty();
        }
        if hdr.next_page() != 0 {
            let next = self.pool.get_frame(hdr.next_page())?;
            let mut nf = next.borrow_mut();
            nf.page_mut().header_mut().set_prev_page(new_page);
            nf.mark_dirty();
        }

        drop(pin);
        drop(new_pin);
        self.pool.remove_frame(&frame)?;
        debug!("compacted page {page} into {new_page}");
        Ok(new_page)
    }

    fn move_node_records(
        &mut self,
        from: &FrameRef,
        to: &FrameRef,
        is_leaf: bool,
        limit: Option<usize>,
    ) -> Result<()> {
        if is_leaf {
            let from = LeafNode::new(from.clone())?;
            let to = LeafNode::new(to.clone())?;
            from.move_records_into(&to, limit, &mut self.pool)
        } else {
            let from = InternalNode::new(from.clone())?;
            let to = InternalNode::new(to.clone())?;
            from.move_records_into(&to, limit, &mut self.pool)
        }
    }

    // ---- insert rebalance ----------------------------------------------

    /// Splits `page` if it is full, first making sure its parent exists
    /// and has room (recursing upward, growing a new root if the split
    /// reaches it). After this returns, every node on the path from the
    /// root to `page`'s old position has room for one more record.
    fn balance_for_insert(&mut self, page: PageId) -> Result<()> {
        let hdr = self.page_header(page)?;
        if (hdr.number_of_records() as usize) < MAX_RECORDS_PER_PAGE {
            return Ok(());
        }
        match self.parent_link(page)? {
            None => self.grow_root(page)?,
            Some((parent, _)) => {
                let parent_hdr = self.page_header(parent)?;
                if parent_hdr.number_of_records() as usize >= MAX_RECORDS_PER_PAGE {
                    self.balance_for_insert(parent)?;
                }
            }
        }
        self.split_node(page)
    }

    /// Installs a new internal root above `old_root`.
    fn grow_root(&mut self, old_root: PageId) -> Result<()> {
        let (old_frame, old_pin) = self.pool.get_pinned(old_root)?;
        let min = if frame_header(&old_frame).is_leaf() {
            LeafNode::new(old_frame.clone())?.min_key()?
        } else {
            InternalNode::new(old_frame.clone())?.min_key()?
        };
        let new_frame = self.allocate_node(self.meta.id, self.meta.depth as u8, false)?;
        let new_root = new_frame.borrow().page_id();
        let root_node = InternalNode::new(new_frame.clone())?;
        let inserted = root_node.insert_record(min, old_root)?;
        {
            let mut of = old_frame.borrow_mut();
            of.page_mut()
                .header_mut()
                .set_parent(new_root, inserted.start() as u16);
            of.mark_dirty();
        }
        drop(old_pin);
        self.meta.root_page = new_root;
        self.meta.depth += 1;
        debug!("grew tree: new root {new_root}, depth {}", self.meta.depth);
        Ok(())
    }

    /// Splits a full node: allocates a right sibling at the same level,
    /// splices it into the sibling list, moves the tail half of the
    /// records over, and registers the sibling in the parent.
    fn split_node(&mut self, page: PageId) -> Result<()> {
        let (frame, pin) = self.pool.get_pinned(page)?;
        let hdr = frame_header(&frame);
        let new_frame = self.allocate_node(hdr.index_id(), hdr.level(), hdr.is_leaf())?;
        let new_page = new_frame.borrow().page_id();
        let new_pin = self.pool.pin_frame(new_page)?;

        {
            let mut nf = new_frame.borrow_mut();
            let h = nf.page_mut().header_mut();
            h.set_prev_page(page);
            h.set_next_page(hdr.next_page());
            nf.mark_dirty();
        }
        {
            let mut f = frame.borrow_mut();
            f.page_mut().header_mut().set_next_page(new_page);
            f.mark_dirty();
        }
        if hdr.next_page() != 0 {
            let after = self.pool.get_frame(hdr.next_page())?;
            let mut af = after.borrow_mut();
            af.page_mut().header_mut().set_prev_page(new_page);
            af.mark_dirty();
        }

        let (old_min, new_min) = if hdr.is_leaf() {
            let left = LeafNode::new(frame.clone())?;
            let right = LeafNode::new(new_frame.clone())?;
            left.node_split(&right, SPLIT_RIGHT_COUNT, &mut self.pool)?;
            (left.min_key()?, right.min_key()?)
        } else {
            let left = InternalNode::new(frame.clone())?;
            let right = InternalNode::new(new_frame.clone())?;
            left.node_split(&right, SPLIT_RIGHT_COUNT, &mut self.pool)?;
            (left.min_key()?, right.min_key()?)
        };
        drop(pin);
        drop(new_pin);
        debug!("split page {page}, new right sibling {new_page}");
        self.split_update_parent(page, new_page, old_min, new_min)
    }

    /// Rewrites the parent record naming the split node and inserts the
    /// new sibling's record right after it. Byte capacity is checked up
    /// front; a short parent page is compacted first so the two appends
    /// cannot fail midway.
    fn split_update_parent(
        &mut self,
        page: PageId,
        new_page: PageId,
        old_min: Key,
        new_min: Key,
    ) -> Result<()> {
        let (parent, off) = self.parent_link(page)?.ok_or(Error::GetRootParent)?;
        let (parent_frame, parent_pin) = self.pool.get_pinned(parent)?;
        let node = InternalNode::new(parent_frame.clone())?;
        let cursor = node.cursor_at_start(off as usize)?;
        if cursor.record.body != page {
            return Err(Error::Unknown(format!(
                "parent record names page {} instead of split page {page}",
                cursor.record.body
            )));
        }

        let rewrite_len = NodeRecord::user(old_min.clone(), page).header.length() as usize;
        let insert_len = NodeRecord::user(new_min.clone(), new_page).header.length() as usize;
        let mut needed = insert_len;
        if rewrite_len != cursor.record.header.length() as usize {
            needed += rewrite_len;
        }
        let watermark = frame_header(&parent_frame).last_inserted_off() as usize;
        if watermark + needed > PAGE_PAYLOAD_SIZE {
            drop(parent_pin);
            self.move_frame(parent, None)?;
            return self.split_update_parent(page, new_page, old_min, new_min);
        }

        let cursor = node.rewrite_key_at(&cursor, old_min)?;
        node.relink_child(&mut self.pool, &cursor)?;
        let inserted = node.insert_after(&cursor, new_min, new_page)?;
        node.relink_child(&mut self.pool, &inserted)?;
        Ok(())
    }

    // ---- delete rebalance ----------------------------------------------

    /// Unions `page` with a same-parent sibling when the combined record
    /// count fits one node, else borrows a record from a same-parent
    /// sibling with spare records. Left sibling preferred in both cases.
    fn rebalance_for_delete(&mut self, page: PageId) -> Result<()> {
        let hdr = self.page_header(page)?;
        if hdr.parent_page() == 0 {
            return Ok(());
        }
        let count = hdr.number_of_records() as usize;
        let parent = hdr.parent_page();

        let sibling_info = |this: &mut Self, sibling: PageId| -> Result<Option<usize>> {
            if sibling == 0 {
                return Ok(None);
            }
            let h = this.page_header(sibling)?;
            Ok((h.parent_page() == parent).then(|| h.number_of_records() as usize))
        };
        let prev_count = sibling_info(self, hdr.prev_page())?;
        let next_count = sibling_info(self, hdr.next_page())?;

        if let Some(n) = prev_count {
            if n + count <= MAX_RECORDS_PER_PAGE {
                return self.union_pages(hdr.prev_page(), page);
            }
        }
        if let Some(n) = next_count {
            if n + count <= MAX_RECORDS_PER_PAGE {
                return self.union_pages(page, hdr.next_page());
            }
        }
        if let Some(n) = prev_count {
            if n > MIN_RECORDS_PER_PAGE {
                return self.borrow_from_left(page, hdr.prev_page());
            }
        }
        if let Some(n) = next_count {
            if n > MIN_RECORDS_PER_PAGE {
                return self.borrow_from_right(page, hdr.next_page());
            }
        }
        Ok(())
    }

    /// Absorbs `right` into `left`: appends the records, splices `right`
    /// out of the sibling list, frees its page, and removes its record
    /// from the parent, cascading the rebalance upward as needed.
    fn union_pages(&mut self, left: PageId, right: PageId) -> Result<()> {
        debug!("merging page {right} into {left}");
        let right_hdr = self.page_header(right)?;
        let (rparent, rpoff) = (right_hdr.parent_page(), right_hdr.parent_record_off());
        if rparent == 0 {
            return Err(Error::GetRootParent);
        }
        let is_leaf = right_hdr.is_leaf();

        // Copy the records, compacting `left` down to its pre-union
        // prefix and retrying once if the appends run out of payload.
        let left_page = {
            let (left_frame, left_pin) = self.pool.get_pinned(left)?;
            let (right_frame, right_pin) = self.pool.get_pinned(right)?;
            let left_before = frame_header(&left_frame).number_of_records() as usize;
            match self.union_records(&left_frame, &right_frame, is_leaf) {
                Ok(()) => left,
                Err(Error::PageOverflow) => {
                    drop(left_pin);
                    drop(right_pin);
                    let compacted = self.move_frame(left, Some(left_before))?;
                    let (lf, _lp) = self.pool.get_pinned(compacted)?;
                    let (rf, _rp) = self.pool.get_pinned(right)?;
                    match self.union_records(&lf, &rf, is_leaf) {
                        Err(Error::PageOverflow) => {
                            return Err(Error::Unknown(
                                "merge overflow persisted after compaction".into(),
                            ))
                        }
                        other => other?,
                    }
                    compacted
                }
                Err(e) => return Err(e),
            }
        };

        // Splice `right` out of the level list and free it.
        {
            let left_frame = self.pool.get_frame(left_page)?;
            let mut lf = left_frame.borrow_mut();
            lf.page_mut().header_mut().set_next_page(right_hdr.next_page());
            lf.mark_dirty();
        }
        if right_hdr.next_page() != 0 {
            let after = self.pool.get_frame(right_hdr.next_page())?;
            let mut af = after.borrow_mut();
            af.page_mut().header_mut().set_prev_page(left_page);
            af.mark_dirty();
        }
        {
            let right_frame = self.pool.get_frame(right)?;
            self.pool.remove_frame(&right_frame)?;
        }

        // Drop `right`'s record from its parent.
        {
            let (parent_frame, _parent_pin) = self.pool.get_pinned(rparent)?;
            let parent = InternalNode::new(parent_frame)?;
            let cursor = parent.cursor_at_start(rpoff as usize)?;
            if cursor.record.body != right {
                return Err(Error::Unknown(format!(
                    "parent record names page {} instead of merged page {right}",
                    cursor.record.body
                )));
            }
            parent.remove_at(&cursor)?;
        }
        match self.balance_after_removal(rparent) {
            Err(Error::RootHeightDecrease) => self.shrink_root(),
            other => other,
        }
    }

    fn union_records(
        &mut self,
        left: &FrameRef,
        right: &FrameRef,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let l = LeafNode::new(left.clone())?;
            let r = LeafNode::new(right.clone())?;
            l.node_union(&r, &mut self.pool)
        } else {
            let l = InternalNode::new(left.clone())?;
            let r = InternalNode::new(right.clone())?;
            l.node_union(&r, &mut self.pool)
        }
    }

    /// Post-removal check on an internal node: a root down to a single
    /// record signals the tree shrink; any other node below the minimum
    /// rebalances.
    fn balance_after_removal(&mut self, page: PageId) -> Result<()> {
        let hdr = self.page_header(page)?;
        if page == self.meta.root_page {
            if !hdr.is_leaf() && hdr.number_of_records() == 1 {
                return Err(Error::RootHeightDecrease);
            }
            return Ok(());
        }
        if (hdr.number_of_records() as usize) < MIN_RECORDS_PER_PAGE {
            self.rebalance_for_delete(page)?;
        }
        Ok(())
    }

    /// Promotes the root's sole child as the new root and frees the old
    /// root page.
    fn shrink_root(&mut self) -> Result<()> {
        let root = self.meta.root_page;
        let frame = self.pool.get_frame(root)?;
        if frame_header(&frame).is_leaf() {
            return Ok(());
        }
        let node = InternalNode::new(frame.clone())?;
        if node.count() != 1 {
            return Ok(());
        }
        let sole = node.first_user_cursor()?;
        let child = sole.record.body;
        self.pool.remove_frame(&frame)?;
        {
            let (child_frame, _pin) = self.pool.get_pinned(child)?;
            let mut cf = child_frame.borrow_mut();
            cf.page_mut().header_mut().set_parent(0, 0);
            cf.mark_dirty();
        }
        self.meta.root_page = child;
        self.meta.depth -= 1;
        debug!("shrank tree: new root {child}, depth {}", self.meta.depth);
        Ok(())
    }

    /// Moves the last record of the left sibling to the front of `page`
    /// and rewrites `page`'s separator in the parent.
    fn borrow_from_left(&mut self, page: PageId, donor: PageId) -> Result<()> {
        debug!("borrowing from left sibling {donor} into {page}");
        let (donor_frame, donor_pin) = self.pool.get_pinned(donor)?;
        let (frame, pin) = self.pool.get_pinned(page)?;
        let hdr = frame_header(&frame);

        let incoming = if hdr.is_leaf() {
            LeafNode::new(donor_frame.clone())?
                .last_user_cursor()?
                .record
                .header
                .length()
        } else {
            InternalNode::new(donor_frame.clone())?
                .last_user_cursor()?
                .record
                .header
                .length()
        } as usize;
        if hdr.last_inserted_off() as usize + incoming > PAGE_PAYLOAD_SIZE {
            drop(pin);
            drop(donor_pin);
            let compacted = self.move_frame(page, None)?;
            return self.borrow_from_left(compacted, donor);
        }

        if hdr.is_leaf() {
            let d = LeafNode::new(donor_frame.clone())?;
            let n = LeafNode::new(frame.clone())?;
            let record = d.pop_back()?;
            let key = record.key.user_key()?.clone();
            let inserted = n.push_front(key, record.body)?;
            n.relink_child(&mut self.pool, &inserted)?;
        } else {
            let d = InternalNode::new(donor_frame.clone())?;
            let n = InternalNode::new(frame.clone())?;
            let record = d.pop_back()?;
            let key = record.key.user_key()?.clone();
            let inserted = n.push_front(key, record.body)?;
            n.relink_child(&mut self.pool, &inserted)?;
        }
        drop(pin);
        drop(donor_pin);
        self.rewrite_parent_key(page)
    }

    /// Moves the first record of the right sibling to the back of `page`
    /// and rewrites the sibling's separator in the parent.
    fn borrow_from_right(&mut self, page: PageId, donor: PageId) -> Result<()> {
        debug!("borrowing from right sibling {donor} into {page}");
        let (donor_frame, donor_pin) = self.pool.get_pinned(donor)?;
        let (frame, pin) = self.pool.get_pinned(page)?;
        let hdr = frame_header(&frame);

        let incoming = if hdr.is_leaf() {
            LeafNode::new(donor_frame.clone())?
                .first_user_cursor()?
                .record
                .header
                .length()
        } else {
            InternalNode::new(donor_frame.clone())?
                .first_user_cursor()?
                .record
                .header
                .length()
        } as usize;
        if hdr.last_inserted_off() as usize + incoming > PAGE_PAYLOAD_SIZE {
            drop(pin);
            drop(donor_pin);
            let compacted = self.move_frame(page, None)?;
            return self.borrow_from_right(compacted, donor);
        }

        if hdr.is_leaf() {
            let d = LeafNode::new(donor_frame.clone())?;
            let n = LeafNode::new(frame.clone())?;
            let record = d.pop_front()?;
            let key = record.key.user_key()?.clone();
            let inserted = n.push_back(key, record.body)?;
            n.relink_child(&mut self.pool, &inserted)?;
        } else {
            let d = InternalNode::new(donor_frame.clone())?;
            let n = InternalNode::new(frame.clone())?;
            let record = d.pop_front()?;
            let key = record.key.user_key()?.clone();
            let inserted = n.push_back(key, record.body)?;
            n.relink_child(&mut self.pool, &inserted)?;
        }
        drop(pin);
        drop(donor_pin);
        self.rewrite_parent_key(donor)
    }

    /// Re-points `page`'s parent record key at the node's current
    /// minimum.
    fn rewrite_parent_key(&mut self, page: PageId) -> Result<()> {
        let min = self.node_min_key(page)?;
        let (parent, off) = match self.parent_link(page)? {
            Some(link) => link,
            None => return Ok(()),
        };
        let (parent_frame, parent_pin) = self.pool.get_pinned(parent)?;
        let node = InternalNode::new(parent_frame.clone())?;
        let cursor = node.cursor_at_start(off as usize)?;
        if cursor.record.body != page {
            return Err(Error::Unknown(format!(
                "parent record names page {} instead of page {page}",
                cursor.record.body
            )));
        }

        let new_len = NodeRecord::user(min.clone(), page).header.length() as usize;
        if new_len != cursor.record.header.length() as usize {
            let watermark = frame_header(&parent_frame).last_inserted_off() as usize;
            if watermark + new_len > PAGE_PAYLOAD_SIZE {
                drop(parent_pin);
                self.move_frame(parent, None)?;
                return self.rewrite_parent_key(page);
            }
        }
        let cursor = node.rewrite_key_at(&cursor, min)?;
        node.relink_child(&mut self.pool, &cursor)?;
        Ok(())
    }

    // ---- validation ----------------------------------------------------

    /// Walks the whole tree and checks its structural invariants:
    /// per-node record count bounds, child parent back-pointers, leaf
    /// sibling list integrity, globally ascending keys, the meta record
    /// count, and the file's free-page accounting. A debugging aid for
    /// embedders and the test suite.
    pub fn validate(&mut self) -> Result<()> {
        let root = self.meta.root_page;
        let mut leaf_total = 0u64;
        self.validate_subtree(root, &mut leaf_total)?;

        let mut page = self.leftmost_leaf()?;
        let mut visited = 0usize;
        let mut walked = 0u64;
        let mut expected_prev = 0;
        let mut last_key: Option<Key> = None;
        while page != 0 {
            visited += 1;
            if visited > MAX_PAGE_COUNT {
                return Err(Error::Unknown("leaf sibling list contains a cycle".into()));
            }
            let frame = self.pool.get_frame(page)?;
            let hdr = frame_header(&frame);
            if hdr.prev_page() != expected_prev {
                return Err(Error::Unknown(format!(
                    "leaf {page} prev link is {}, expected {expected_prev}",
                    hdr.prev_page()
                )));
            }
            let node = LeafNode::new(frame)?;
            node.for_each_record(|cursor| {
                let key = cursor.record.key.user_key()?;
                if let Some(last) = &last_key {
                    if last.try_cmp(key)? != std::cmp::Ordering::Less {
                        return Err(Error::Unknown(format!(
                            "keys out of order in leaf {page}"
                        )));
                    }
                }
                last_key = Some(key.clone());
                walked += 1;
                Ok(())
            })?;
            expected_prev = page;
            page = hdr.next_page();
        }

        if walked != self.meta.number_of_records || leaf_total != walked {
            return Err(Error::Unknown(format!(
                "record count mismatch: meta {}, subtree {leaf_total}, traversal {walked}",
                self.meta.number_of_records
            )));
        }

        let header = self.pool.disk().header();
        if header.free_count() + header.in_use_count() != header.total_page_count() - 1 {
            return Err(Error::Unknown(format!(
                "page accounting mismatch: {} free + {} in use != {} total - 1",
                header.free_count(),
                header.in_use_count(),
                header.total_page_count()
            )));
        }
        Ok(())
    }

    fn validate_subtree(&mut self, page: PageId, leaf_total: &mut u64) -> Result<()> {
        let hdr = self.page_header(page)?;
        let count = hdr.number_of_records() as usize;
        let is_root = page == self.meta.root_page;
        if count > MAX_RECORDS_PER_PAGE {
            return Err(Error::Unknown(format!(
                "page {page} holds {count} records, over the maximum"
            )));
        }
        if !is_root && count < MIN_RECORDS_PER_PAGE {
            return Err(Error::Unknown(format!(
                "page {page} holds {count} records, under the minimum"
            )));
        }
        if hdr.index_id() != self.meta.id {
            return Err(Error::Unknown(format!(
                "page {page} belongs to index {}, expected {}",
                hdr.index_id(),
                self.meta.id
            )));
        }
        if hdr.is_leaf() {
            *leaf_total += count as u64;
            return Ok(());
        }

        let mut children: SmallVec<[(PageId, usize); MAX_RECORDS_PER_PAGE]> = SmallVec::new();
        {
            let frame = self.pool.get_frame(page)?;
            let node = InternalNode::new(frame)?;
            node.for_each_record(|cursor| {
                children.push((cursor.record.body, cursor.start()));
                Ok(())
            })?;
        }
        for (child, record_start) in children {
            let child_hdr = self.page_header(child)?;
            if child_hdr.parent_page() != page
                || child_hdr.parent_record_off() as usize != record_start
            {
                return Err(Error::Unknown(format!(
                    "child {child} back-pointer ({}, {}) does not name its parent record ({page}, {record_start})",
                    child_hdr.parent_page(),
                    child_hdr.parent_record_off()
                )));
            }
            self.validate_subtree(child, leaf_total)?;
        }
        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("failed to flush index on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Datum, FieldType, KeyType};
    use tempfile::tempdir;

    fn int_index(dir: &tempfile::TempDir) -> Index {
        Index::make_index(
            1,
            dir.path().join("tree.db"),
            KeySchema::new("id", KeyType::Int),
            vec![FieldSchema::new("value", FieldType::Int)],
        )
        .unwrap()
    }

    fn row(v: i64) -> Column {
        Column::new(vec![Datum::Int(v)])
    }

    #[test]
    fn fresh_index_is_an_empty_leaf_root() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        assert_eq!(index.depth(), 1);
        assert_eq!(index.number_of_records(), 0);
        assert!(matches!(
            index.search(&Key::Int(1)),
            Err(Error::KeyNotFound)
        ));
        assert!(matches!(
            index.remove(&Key::Int(1)),
            Err(Error::KeyNotFound)
        ));
        index.validate().unwrap();
    }

    #[test]
    fn insert_search_remove_round_trip() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        index.insert(Key::Int(1), row(80)).unwrap();
        index.insert(Key::Int(5), row(81)).unwrap();
        assert_eq!(index.search(&Key::Int(5)).unwrap(), row(81));
        assert!(matches!(
            index.insert(Key::Int(5), row(99)),
            Err(Error::KeyAlreadyExist)
        ));
        assert_eq!(index.number_of_records(), 2);

        index.remove(&Key::Int(5)).unwrap();
        assert!(matches!(
            index.search(&Key::Int(5)),
            Err(Error::KeyNotFound)
        ));
        assert_eq!(index.number_of_records(), 1);
        index.validate().unwrap();
    }

    #[test]
    fn split_grows_the_tree() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        for v in 0..MAX_RECORDS_PER_PAGE as i64 {
            index.insert(Key::Int(v), row(v)).unwrap();
        }
        assert_eq!(index.depth(), 1);
        index.insert(Key::Int(16), row(16)).unwrap();
        assert_eq!(index.depth(), 2);
        index.validate().unwrap();

        let mut seen = Vec::new();
        index.traverse(|key, _| {
            if let Key::Int(v) = key {
                seen.push(*v);
            }
        })
        .unwrap();
        assert_eq!(seen, (0..=16).collect::<Vec<_>>());
    }

    #[test]
    fn mismatched_key_type_leaves_tree_untouched() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        index.insert(Key::Int(1), row(80)).unwrap();
        assert!(matches!(
            index.insert(Key::Str("one".into()), row(80)),
            Err(Error::InvalidKeyType)
        ));
        assert_eq!(index.number_of_records(), 1);
        index.validate().unwrap();
    }

    #[test]
    fn get_cursor_floors_to_existing_record() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        for v in [10i64, 20, 30] {
            index.insert(Key::Int(v), row(v)).unwrap();
        }
        let cursor = index.get_cursor(&Key::Int(25)).unwrap();
        assert_eq!(
            cursor.record.key.user_key().unwrap(),
            &Key::Int(20)
        );
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = tempdir().unwrap();
        let mut index = int_index(&dir);
        let huge = Column::new(vec![Datum::Str("z".repeat(400))]);
        assert!(index.insert(Key::Int(1), huge).is_err());
        assert_eq!(index.number_of_records(), 0);
    }
}
