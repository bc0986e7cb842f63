//! Keys, values, and schemas.
//!
//! The index key is a tagged union over a closed set of types: signed
//! 64-bit integers, doubles, and strings. Two keys compare only when
//! their tags agree; comparing across tags is an [`InvalidKeyType`]
//! failure, never a panic and never an arbitrary cross-type order.
//!
//! The leaf payload is a [`Column`]: an ordered sequence of [`Datum`]
//! values (the key types plus booleans). The tree never inspects a
//! column; it only carries the bytes.
//!
//! ## Wire encoding
//!
//! Both keys and datums encode as one tag byte followed by the body:
//!
//! ```text
//! key:    0x01 int     8-byte LE two's complement
//!         0x02 double  8-byte LE IEEE 754 bits
//!         0x03 string  varint length + UTF-8 bytes
//! datum:  0x10 bool    1 byte (0/1)
//!         0x11 int     8-byte LE
//!         0x12 double  8-byte LE bits
//!         0x13 string  varint length + UTF-8 bytes
//! column: varint datum count, then each datum
//! ```
//!
//! The encoding is deterministic and self-delimiting, so decoded values
//! re-encode to identical bytes and a decoder only needs the buffer.
//!
//! Doubles order by `f64::total_cmp`, which gives a total order over the
//! full bit space (NaN sorts above infinity).
//!
//! [`InvalidKeyType`]: crate::error::Error::InvalidKeyType

use std::cmp::Ordering;

use crate::encoding::{decode_varint, encode_varint, varint_len};
use crate::error::{Error, Result};

/// Key tag bytes. `0x00` and `0xFF` are reserved for the node format's
/// infimum/supremum sentinels and are rejected here.
pub const KEY_TAG_INT: u8 = 0x01;
pub const KEY_TAG_DOUBLE: u8 = 0x02;
pub const KEY_TAG_STRING: u8 = 0x03;

const DATUM_TAG_BOOL: u8 = 0x10;
const DATUM_TAG_INT: u8 = 0x11;
const DATUM_TAG_DOUBLE: u8 = 0x12;
const DATUM_TAG_STRING: u8 = 0x13;

/// Static type of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Double,
    Str,
}

impl KeyType {
    pub fn tag(self) -> u8 {
        match self {
            KeyType::Int => KEY_TAG_INT,
            KeyType::Double => KEY_TAG_DOUBLE,
            KeyType::Str => KEY_TAG_STRING,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            KEY_TAG_INT => Ok(KeyType::Int),
            KEY_TAG_DOUBLE => Ok(KeyType::Double),
            KEY_TAG_STRING => Ok(KeyType::Str),
            _ => Err(Error::Unknown(format!("invalid key tag: {tag:#04x}"))),
        }
    }
}

/// Static type of a column field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Double,
    Str,
}

/// Index key value.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Int(i64),
    Double(f64),
    Str(String),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Int(_) => KeyType::Int,
            Key::Double(_) => KeyType::Double,
            Key::Str(_) => KeyType::Str,
        }
    }

    /// Total order between same-typed keys; `InvalidKeyType` otherwise.
    pub fn try_cmp(&self, other: &Key) -> Result<Ordering> {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => Ok(a.cmp(b)),
            (Key::Double(a), Key::Double(b)) => Ok(a.total_cmp(b)),
            (Key::Str(a), Key::Str(b)) => Ok(a.cmp(b)),
            _ => Err(Error::InvalidKeyType),
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Key::Int(_) | Key::Double(_) => 8,
            Key::Str(s) => varint_len(s.len() as u64) + s.len(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Key::Int(v) => {
                out.push(KEY_TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Key::Double(v) => {
                out.push(KEY_TAG_DOUBLE);
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Key::Str(s) => {
                out.push(KEY_TAG_STRING);
                let mut len_buf = [0u8; 9];
                let n = encode_varint(s.len() as u64, &mut len_buf);
                out.extend_from_slice(&len_buf[..n]);
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Decodes a key from the front of `buf`, returning `(key, width)`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let tag = *buf
            .first()
            .ok_or_else(|| Error::Unknown("empty buffer for key decode".into()))?;
        let body = &buf[1..];
        match tag {
            KEY_TAG_INT => {
                let raw = fixed8(body)?;
                Ok((Key::Int(i64::from_le_bytes(raw)), 9))
            }
            KEY_TAG_DOUBLE => {
                let raw = fixed8(body)?;
                Ok((Key::Double(f64::from_bits(u64::from_le_bytes(raw))), 9))
            }
            KEY_TAG_STRING => {
                let (len, width) = decode_varint(body)?;
                let (s, total) = decode_str(body, len as usize, width)?;
                Ok((Key::Str(s), 1 + total))
            }
            _ => Err(Error::Unknown(format!("invalid key tag: {tag:#04x}"))),
        }
    }
}

/// One field of a leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl Datum {
    pub fn field_type(&self) -> FieldType {
        match self {
            Datum::Bool(_) => FieldType::Bool,
            Datum::Int(_) => FieldType::Int,
            Datum::Double(_) => FieldType::Double,
            Datum::Str(_) => FieldType::Str,
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Double(_) => 8,
            Datum::Str(s) => varint_len(s.len() as u64) + s.len(),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Datum::Bool(v) => {
                out.push(DATUM_TAG_BOOL);
                out.push(*v as u8);
            }
            Datum::Int(v) => {
                out.push(DATUM_TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Datum::Double(v) => {
                out.push(DATUM_TAG_DOUBLE);
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Datum::Str(s) => {
                out.push(DATUM_TAG_STRING);
                let mut len_buf = [0u8; 9];
                let n = encode_varint(s.len() as u64, &mut len_buf);
                out.extend_from_slice(&len_buf[..n]);
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let tag = *buf
            .first()
            .ok_or_else(|| Error::Unknown("empty buffer for datum decode".into()))?;
        let body = &buf[1..];
        match tag {
            DATUM_TAG_BOOL => {
                let raw = *body
                    .first()
                    .ok_or_else(|| Error::Unknown("truncated bool datum".into()))?;
                Ok((Datum::Bool(raw != 0), 2))
            }
            DATUM_TAG_INT => {
                let raw = fixed8(body)?;
                Ok((Datum::Int(i64::from_le_bytes(raw)), 9))
            }
            DATUM_TAG_DOUBLE => {
                let raw = fixed8(body)?;
                Ok((Datum::Double(f64::from_bits(u64::from_le_bytes(raw))), 9))
            }
            DATUM_TAG_STRING => {
                let (len, width) = decode_varint(body)?;
                let (s, total) = decode_str(body, len as usize, width)?;
                Ok((Datum::Str(s), 1 + total))
            }
            _ => Err(Error::Unknown(format!("invalid datum tag: {tag:#04x}"))),
        }
    }
}

/// Ordered sequence of datums carried as the leaf record payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Column {
    datums: Vec<Datum>,
}

impl Column {
    pub fn new(datums: Vec<Datum>) -> Self {
        Self { datums }
    }

    pub fn datums(&self) -> &[Datum] {
        &self.datums
    }

    pub fn encoded_len(&self) -> usize {
        varint_len(self.datums.len() as u64)
            + self.datums.iter().map(Datum::encoded_len).sum::<usize>()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut len_buf = [0u8; 9];
        let n = encode_varint(self.datums.len() as u64, &mut len_buf);
        out.extend_from_slice(&len_buf[..n]);
        for datum in &self.datums {
            datum.encode_into(out);
        }
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (count, mut at) = decode_varint(buf)?;
        let mut datums = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (datum, width) = Datum::decode(&buf[at..])?;
            datums.push(datum);
            at += width;
        }
        Ok((Self { datums }, at))
    }
}

impl From<Vec<Datum>> for Column {
    fn from(datums: Vec<Datum>) -> Self {
        Self::new(datums)
    }
}

/// Key column description for `make_index`.
#[derive(Debug, Clone)]
pub struct KeySchema {
    pub name: String,
    pub key_type: KeyType,
}

impl KeySchema {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// Non-key field description for `make_index`.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Full record shape of a clustered index: the key plus its fields.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub key: KeySchema,
    pub fields: Vec<FieldSchema>,
}

fn fixed8(body: &[u8]) -> Result<[u8; 8]> {
    if body.len() < 8 {
        return Err(Error::Unknown("truncated 8-byte value".into()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&body[..8]);
    Ok(raw)
}

fn decode_str(body: &[u8], len: usize, width: usize) -> Result<(String, usize)> {
    let end = width + len;
    if body.len() < end {
        return Err(Error::Unknown("truncated string body".into()));
    }
    let s = std::str::from_utf8(&body[width..end])
        .map_err(|e| Error::Unknown(format!("invalid UTF-8 in string body: {e}")))?;
    Ok((s.to_owned(), end))
}
