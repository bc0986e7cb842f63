//! Page images and the common page header.
//!
//! Every page except page 0 (the file header) starts with a fixed 32-byte
//! header followed by a flat payload region. The header is a zerocopy
//! struct with little-endian fields so a page image round-trips through
//! the disk byte-for-byte.
//!
//! ## Header layout (32 bytes)
//!
//! ```text
//! Offset  Size  Field              Description
//! ------  ----  -----------------  -------------------------------------
//! 0       4     page_id            Page number, stable for the file's life
//! 4       4     index_id           Owning index
//! 8       1     level              Height above the leaf level (leaf = 0)
//! 9       1     is_leaf            1 when the page is a leaf
//! 10      2     number_of_records  User records; sentinels excluded
//! 12      2     last_inserted_off  Bump-allocator watermark in the payload
//! 14      4     prev_page          Left sibling at this level (0 = none)
//! 18      4     next_page          Right sibling at this level (0 = none)
//! 22      4     parent_page        Parent page (0 = this page is the root)
//! 26      2     parent_record_off  Start offset of the parent record that
//!                                  names this page
//! 28      4     reserved
//! ```
//!
//! The payload's internal structure (the sentinel-bounded record list) is
//! the node view's concern; this module only moves the bytes.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_HEADER_SIZE, PAGE_PAYLOAD_SIZE, PAGE_SIZE};
use crate::error::{Error, Result};

pub type PageId = u32;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_id: U32,
    index_id: U32,
    level: u8,
    is_leaf: u8,
    number_of_records: U16,
    last_inserted_off: U16,
    prev_page: U32,
    next_page: U32,
    parent_page: U32,
    parent_record_off: U16,
    reserved: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id: U32::new(page_id),
            index_id: U32::new(0),
            level: 0,
            is_leaf: 0,
            number_of_records: U16::new(0),
            last_inserted_off: U16::new(0),
            prev_page: U32::new(0),
            next_page: U32::new(0),
            parent_page: U32::new(0),
            parent_record_off: U16::new(0),
            reserved: [0; 4],
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.get()
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = U32::new(page_id);
    }

    pub fn index_id(&self) -> u32 {
        self.index_id.get()
    }

    pub fn set_index_id(&mut self, index_id: u32) {
        self.index_id = U32::new(index_id);
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn set_level(&mut self, level: u8) {
        self.level = level;
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf != 0
    }

    pub fn set_leaf(&mut self, is_leaf: bool) {
        self.is_leaf = is_leaf as u8;
    }

    pub fn number_of_records(&self) -> u16 {
        self.number_of_records.get()
    }

    pub fn set_number_of_records(&mut self, count: u16) {
        self.number_of_records = U16::new(count);
    }

    pub fn last_inserted_off(&self) -> u16 {
        self.last_inserted_off.get()
    }

    pub fn set_last_inserted_off(&mut self, off: u16) {
        self.last_inserted_off = U16::new(off);
    }

    pub fn prev_page(&self) -> PageId {
        self.prev_page.get()
    }

    pub fn set_prev_page(&mut self, page: PageId) {
        self.prev_page = U32::new(page);
    }

    pub fn next_page(&self) -> PageId {
        self.next_page.get()
    }

    pub fn set_next_page(&mut self, page: PageId) {
        self.next_page = U32::new(page);
    }

    pub fn parent_page(&self) -> PageId {
        self.parent_page.get()
    }

    pub fn parent_record_off(&self) -> u16 {
        self.parent_record_off.get()
    }

    /// Points this page at the internal record that names it.
    pub fn set_parent(&mut self, page: PageId, record_off: u16) {
        self.parent_page = U32::new(page);
        self.parent_record_off = U16::new(record_off);
    }
}

/// In-memory representation of one page: header plus payload bytes.
///
/// A bare image (no payload) exists only as a freshly-constructed
/// placeholder; serializing one fails with `InvalidPagePayload`.
#[derive(Debug, Clone)]
pub struct PageImage {
    header: PageHeader,
    payload: Option<Box<[u8; PAGE_PAYLOAD_SIZE]>>,
}

impl PageImage {
    /// Header-only placeholder. The payload must be installed before the
    /// image can be serialized.
    pub fn bare(page_id: PageId) -> Self {
        Self {
            header: PageHeader::new(page_id),
            payload: None,
        }
    }

    /// Fresh image with a zeroed payload.
    pub fn zeroed(page_id: PageId) -> Self {
        Self {
            header: PageHeader::new(page_id),
            payload: Some(Box::new([0u8; PAGE_PAYLOAD_SIZE])),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id()
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        &mut self.header
    }

    pub fn payload(&self) -> Result<&[u8]> {
        self.payload
            .as_deref()
            .map(|p| p.as_slice())
            .ok_or(Error::InvalidPagePayload)
    }

    pub fn payload_mut(&mut self) -> Result<&mut [u8]> {
        self.payload
            .as_deref_mut()
            .map(|p| p.as_mut_slice())
            .ok_or(Error::InvalidPagePayload)
    }

    /// Replaces the payload with zeroes, installing one if absent.
    pub fn scrub_payload(&mut self) {
        self.payload = Some(Box::new([0u8; PAGE_PAYLOAD_SIZE]));
    }

    /// Serializes the image into one page-sized block.
    pub fn serialize(&self) -> Result<[u8; PAGE_SIZE]> {
        let payload = self.payload.as_deref().ok_or(Error::InvalidPagePayload)?;
        let mut block = [0u8; PAGE_SIZE];
        block[..PAGE_HEADER_SIZE].copy_from_slice(self.header.as_bytes());
        block[PAGE_HEADER_SIZE..].copy_from_slice(payload);
        Ok(block)
    }

    /// Rebuilds an image from one page-sized block.
    pub fn deserialize(block: &[u8]) -> Result<Self> {
        if block.len() != PAGE_SIZE {
            return Err(Error::Unknown(format!(
                "page block has {} bytes, expected {PAGE_SIZE}",
                block.len()
            )));
        }
        let header = PageHeader::read_from_bytes(&block[..PAGE_HEADER_SIZE])
            .map_err(|e| Error::Unknown(format!("failed to read page header: {e:?}")))?;
        let mut payload = Box::new([0u8; PAGE_PAYLOAD_SIZE]);
        payload.copy_from_slice(&block[PAGE_HEADER_SIZE..]);
        Ok(Self {
            header,
            payload: Some(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_32_bytes() {
        assert_eq!(std::mem::size_of::<PageHeader>(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn header_fields_round_trip_through_bytes() {
        let mut header = PageHeader::new(7);
        header.set_index_id(3);
        header.set_level(2);
        header.set_leaf(true);
        header.set_number_of_records(5);
        header.set_last_inserted_off(120);
        header.set_prev_page(6);
        header.set_next_page(8);
        header.set_parent(4, 36);

        let bytes = header.as_bytes().to_vec();
        let copy = PageHeader::read_from_bytes(&bytes).unwrap();
        assert_eq!(copy.page_id(), 7);
        assert_eq!(copy.index_id(), 3);
        assert_eq!(copy.level(), 2);
        assert!(copy.is_leaf());
        assert_eq!(copy.number_of_records(), 5);
        assert_eq!(copy.last_inserted_off(), 120);
        assert_eq!(copy.prev_page(), 6);
        assert_eq!(copy.next_page(), 8);
        assert_eq!(copy.parent_page(), 4);
        assert_eq!(copy.parent_record_off(), 36);
    }

    #[test]
    fn serialize_round_trip_preserves_header_and_payload() {
        let mut image = PageImage::zeroed(9);
        image.header_mut().set_leaf(true);
        image.header_mut().set_number_of_records(2);
        image.payload_mut().unwrap()[0..4].copy_from_slice(&[1, 2, 3, 4]);

        let block = image.serialize().unwrap();
        let copy = PageImage::deserialize(&block).unwrap();

        assert_eq!(copy.page_id(), 9);
        assert!(copy.header().is_leaf());
        assert_eq!(copy.header().number_of_records(), 2);
        assert_eq!(copy.payload().unwrap(), image.payload().unwrap());
        assert_eq!(copy.serialize().unwrap().as_slice(), block.as_slice());
    }

    #[test]
    fn bare_image_refuses_to_serialize() {
        let image = PageImage::bare(3);
        assert!(matches!(
            image.serialize(),
            Err(Error::InvalidPagePayload)
        ));
        assert!(matches!(image.payload(), Err(Error::InvalidPagePayload)));
    }

    #[test]
    fn deserialize_rejects_short_blocks() {
        assert!(PageImage::deserialize(&[0u8; 100]).is_err());
    }
}
