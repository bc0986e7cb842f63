//! Index metadata.
//!
//! The meta is the index's identity and the entry point into the tree:
//! the root page, the depth (1 when the root is a leaf), the live record
//! count, and the record schema. The numeric fields persist in the file
//! header page and are restored on open; the schema is supplied by the
//! caller and cross-checked against the stored key tag.

use crate::error::{Error, Result};
use crate::storage::{FileHeader, PageId};
use crate::types::{Key, KeyType, RecordSchema};

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub id: u32,
    pub is_primary: bool,
    pub root_page: PageId,
    /// Tree depth; starts at 1 with a leaf root, grows on root split and
    /// shrinks on root merge.
    pub depth: u32,
    pub number_of_records: u64,
    pub schema: RecordSchema,
}

impl IndexMeta {
    pub fn new(id: u32, schema: RecordSchema) -> Self {
        Self {
            id,
            is_primary: true,
            root_page: 0,
            depth: 1,
            number_of_records: 0,
            schema,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.schema.key.key_type
    }

    /// Fast-fails a key whose tag disagrees with the index key schema.
    pub fn check_key(&self, key: &Key) -> Result<()> {
        if key.key_type() != self.key_type() {
            return Err(Error::InvalidKeyType);
        }
        Ok(())
    }

    /// Copies the persistent fields into the file header.
    pub fn store_into(&self, header: &mut FileHeader) {
        header.set_index_id(self.id);
        header.set_primary(self.is_primary);
        header.set_root_page(self.root_page);
        header.set_depth(self.depth);
        header.set_record_count(self.number_of_records);
        header.set_key_tag(self.key_type().tag());
    }

    /// Restores the meta from the file header, verifying that the caller
    /// supplied the schema the file was built with.
    pub fn load_from(header: &FileHeader, schema: RecordSchema) -> Result<Self> {
        let stored = KeyType::from_tag(header.key_tag())?;
        if stored != schema.key.key_type {
            return Err(Error::InvalidKeyType);
        }
        Ok(Self {
            id: header.index_id(),
            is_primary: header.is_primary(),
            root_page: header.root_page(),
            depth: header.depth(),
            number_of_records: header.record_count(),
            schema,
        })
    }
}
