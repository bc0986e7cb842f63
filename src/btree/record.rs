//! Intra-page record format.
//!
//! A page payload is a bump-allocated arena of records linked into a
//! doubly linked list. Every record starts with a fixed 11-byte header:
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  --------------------------------------
//! 0       1     status       0 live, 1 deleted, 2 infimum, 3 supremum
//! 1       4     prev_offset  predecessor start − this record's end
//! 5       4     next_offset  successor start − this record's end
//! 9       2     length       total encoded bytes, header included
//! ```
//!
//! The link offsets are relative displacements, so a record block can be
//! copied between payload positions without touching its neighbors'
//! bytes, and navigation needs no absolute table: from a cursor holding a
//! record's end offset, the successor decodes at `end + next_offset` and
//! the predecessor at `end + prev_offset`.
//!
//! The header is followed by the key (one tag byte plus body; the
//! sentinel tags `0x00`/`0xFF` have no body) and, for user records, the
//! record body: a [`Column`] in leaf pages, a child page id in internal
//! pages. Sentinel records carry no body.
//!
//! Records are decoded into plain values; a decoded record is a snapshot,
//! and mutation means re-encoding into the page.

use zerocopy::little_endian::{I32, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::storage::PageId;
use crate::types::{Column, Key};

pub const RECORD_HEADER_SIZE: usize = 11;

/// Encoded size of a sentinel record: header plus the tag byte.
pub const SENTINEL_RECORD_SIZE: usize = RECORD_HEADER_SIZE + 1;

/// Payload offset of the infimum record.
pub const INFIMUM_OFFSET: usize = 0;
/// Payload offset of the supremum record.
pub const SUPREMUM_OFFSET: usize = SENTINEL_RECORD_SIZE;
/// Payload offset where the first user record is appended.
pub const FIRST_RECORD_OFFSET: usize = 2 * SENTINEL_RECORD_SIZE;

/// Upper bound on one encoded record. Sized so a node holding the full
/// record-count maximum still fits one page payload: splitting is
/// triggered by record count, so a page must be able to reach that count
/// with live data before it is considered full.
pub const MAX_RECORD_SIZE: usize =
    (crate::config::PAGE_PAYLOAD_SIZE - FIRST_RECORD_OFFSET) / crate::config::MAX_RECORDS_PER_PAGE;

/// Upper bound on one encoded key. An internal record is a key plus a
/// 4-byte child pointer, so keeping keys under this keeps internal
/// records within [`MAX_RECORD_SIZE`] as well; otherwise an internal
/// node filled with near-limit separators could overflow its payload
/// before reaching the record-count maximum.
pub const MAX_KEY_SIZE: usize = MAX_RECORD_SIZE - RECORD_HEADER_SIZE - 4;

const _: () = assert!(
    crate::config::MAX_RECORDS_PER_PAGE * MAX_RECORD_SIZE + FIRST_RECORD_OFFSET
        <= crate::config::PAGE_PAYLOAD_SIZE
);
const _: () = assert!(RECORD_HEADER_SIZE + MAX_KEY_SIZE + 4 <= MAX_RECORD_SIZE);

const KEY_TAG_INFIMUM: u8 = 0x00;
const KEY_TAG_SUPREMUM: u8 = 0xFF;

pub const STATUS_LIVE: u8 = 0;
pub const STATUS_DELETED: u8 = 1;
pub const STATUS_INFIMUM: u8 = 2;
pub const STATUS_SUPREMUM: u8 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordHeader {
    status: u8,
    prev_offset: I32,
    next_offset: I32,
    length: U16,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

impl RecordHeader {
    pub fn new(status: u8, length: u16) -> Self {
        Self {
            status,
            prev_offset: I32::new(0),
            next_offset: I32::new(0),
            length: U16::new(length),
        }
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn prev_offset(&self) -> i32 {
        self.prev_offset.get()
    }

    pub fn set_prev_offset(&mut self, off: i32) {
        self.prev_offset = I32::new(off);
    }

    pub fn next_offset(&self) -> i32 {
        self.next_offset.get()
    }

    pub fn set_next_offset(&mut self, off: i32) {
        self.next_offset = I32::new(off);
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }
}

/// Key position of a record: the sentinels bound every user key.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKey {
    Infimum,
    User(Key),
    Supremum,
}

impl RecordKey {
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, RecordKey::User(_))
    }

    /// The user key, or `InvalidInsertPos` when the record is a sentinel.
    pub fn user_key(&self) -> Result<&Key> {
        match self {
            RecordKey::User(key) => Ok(key),
            _ => Err(Error::InvalidInsertPos),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            RecordKey::User(key) => key.encoded_len(),
            _ => 1,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RecordKey::Infimum => out.push(KEY_TAG_INFIMUM),
            RecordKey::Supremum => out.push(KEY_TAG_SUPREMUM),
            RecordKey::User(key) => key.encode_into(out),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        match buf.first() {
            Some(&KEY_TAG_INFIMUM) => Ok((RecordKey::Infimum, 1)),
            Some(&KEY_TAG_SUPREMUM) => Ok((RecordKey::Supremum, 1)),
            Some(_) => {
                let (key, width) = Key::decode(buf)?;
                Ok((RecordKey::User(key), width))
            }
            None => Err(Error::Unknown("empty buffer for record key".into())),
        }
    }
}

/// Record body: what a record carries besides its key.
///
/// Leaf records carry a [`Column`]; internal records carry the child page
/// whose subtree minimum is the record's key. The two variants share all
/// list and navigation logic; `child_page` is the hook internal-node
/// moves use to repoint child parent links.
pub trait RecordBody: Clone + Default + std::fmt::Debug {
    /// Whether this body belongs to leaf pages.
    const LEAF: bool;

    fn encoded_len(&self) -> usize;
    fn encode_into(&self, out: &mut Vec<u8>);
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// The child page this record points at, for internal records.
    fn child_page(&self) -> Option<PageId> {
        None
    }
}

impl RecordBody for Column {
    const LEAF: bool = true;

    fn encoded_len(&self) -> usize {
        Column::encoded_len(self)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        Column::encode_into(self, out)
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Column::decode(buf)
    }
}

impl RecordBody for PageId {
    const LEAF: bool = false;

    fn encoded_len(&self) -> usize {
        4
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::Unknown("truncated child page id".into()));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[..4]);
        Ok((PageId::from_le_bytes(raw), 4))
    }

    fn child_page(&self) -> Option<PageId> {
        Some(*self)
    }
}

/// Decoded record snapshot.
#[derive(Debug, Clone)]
pub struct NodeRecord<B: RecordBody> {
    pub header: RecordHeader,
    pub key: RecordKey,
    pub body: B,
}

impl<B: RecordBody> NodeRecord<B> {
    pub fn user(key: Key, body: B) -> Self {
        let mut record = Self {
            header: RecordHeader::new(STATUS_LIVE, 0),
            key: RecordKey::User(key),
            body,
        };
        record.header = RecordHeader::new(STATUS_LIVE, record.encoded_len() as u16);
        record
    }

    fn sentinel(key: RecordKey, status: u8) -> Self {
        Self {
            header: RecordHeader::new(status, SENTINEL_RECORD_SIZE as u16),
            key,
            body: B::default(),
        }
    }

    pub fn infimum() -> Self {
        Self::sentinel(RecordKey::Infimum, STATUS_INFIMUM)
    }

    pub fn supremum() -> Self {
        Self::sentinel(RecordKey::Supremum, STATUS_SUPREMUM)
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE
            + self.key.encoded_len()
            + if self.key.is_sentinel() {
                0
            } else {
                self.body.encoded_len()
            }
    }

    /// Encodes the full record (header included) into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut block = Vec::with_capacity(self.encoded_len());
        block.extend_from_slice(self.header.as_bytes());
        self.key.encode_into(&mut block);
        if !self.key.is_sentinel() {
            self.body.encode_into(&mut block);
        }
        block
    }

    /// Decodes the record starting at `start`, returning it with its end
    /// offset.
    pub fn decode_from(payload: &[u8], start: usize) -> Result<(Self, usize)> {
        let header_end = start
            .checked_add(RECORD_HEADER_SIZE)
            .filter(|&e| e <= payload.len())
            .ok_or_else(|| Error::Unknown(format!("record header out of bounds at {start}")))?;
        let header = RecordHeader::read_from_bytes(&payload[start..header_end])
            .map_err(|e| Error::Unknown(format!("failed to read record header: {e:?}")))?;

        let end = start + header.length() as usize;
        if (header.length() as usize) < RECORD_HEADER_SIZE || end > payload.len() {
            return Err(Error::Unknown(format!(
                "record at {start} has invalid length {}",
                header.length()
            )));
        }

        let (key, key_width) = RecordKey::decode(&payload[header_end..end])?;
        let body = if key.is_sentinel() {
            B::default()
        } else {
            let (body, _) = B::decode(&payload[header_end + key_width..end])?;
            body
        };

        Ok((Self { header, key, body }, end))
    }
}

/// Position of a record within a page: the page, the record's end offset
/// in the payload, and the decoded snapshot.
#[derive(Debug, Clone)]
pub struct Cursor<B: RecordBody> {
    pub page: PageId,
    pub end: usize,
    pub record: NodeRecord<B>,
}

impl<B: RecordBody> Cursor<B> {
    /// Payload offset where the record starts.
    pub fn start(&self) -> usize {
        self.end - self.record.header.length() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Datum;

    #[test]
    fn record_header_is_11_bytes() {
        assert_eq!(std::mem::size_of::<RecordHeader>(), RECORD_HEADER_SIZE);
    }

    #[test]
    fn sentinel_records_encode_to_fixed_size() {
        let inf = NodeRecord::<Column>::infimum();
        let sup = NodeRecord::<PageId>::supremum();
        assert_eq!(inf.encode().len(), SENTINEL_RECORD_SIZE);
        assert_eq!(sup.encode().len(), SENTINEL_RECORD_SIZE);
    }

    #[test]
    fn leaf_record_round_trip() {
        let record = NodeRecord::user(
            Key::Int(5),
            Column::new(vec![Datum::Int(80), Datum::Bool(false)]),
        );
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.encoded_len());

        let mut payload = vec![0u8; 256];
        payload[40..40 + bytes.len()].copy_from_slice(&bytes);
        let (decoded, end) = NodeRecord::<Column>::decode_from(&payload, 40).unwrap();
        assert_eq!(end, 40 + bytes.len());
        assert_eq!(decoded.key, record.key);
        assert_eq!(decoded.body, record.body);
        assert_eq!(decoded.header.status(), STATUS_LIVE);
    }

    #[test]
    fn internal_record_round_trip() {
        let record = NodeRecord::user(Key::Str("john".into()), 7u32);
        let bytes = record.encode();
        let mut payload = vec![0u8; 128];
        payload[..bytes.len()].copy_from_slice(&bytes);
        let (decoded, _) = NodeRecord::<PageId>::decode_from(&payload, 0).unwrap();
        assert_eq!(decoded.body, 7);
        assert_eq!(decoded.body.child_page(), Some(7));
    }

    #[test]
    fn decode_rejects_out_of_bounds_records() {
        let payload = vec![0u8; 8];
        assert!(NodeRecord::<Column>::decode_from(&payload, 0).is_err());
    }

    #[test]
    fn cursor_start_tracks_record_length() {
        let record = NodeRecord::user(Key::Int(1), Column::new(vec![Datum::Int(2)]));
        let len = record.encoded_len();
        let cursor = Cursor {
            page: 1,
            end: 100,
            record,
        };
        assert_eq!(cursor.start(), 100 - len);
    }
}
