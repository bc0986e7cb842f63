//! Deterministic binary encoding primitives.
//!
//! Every variable-length field in the record format (string bodies, datum
//! counts) is prefixed with a varint so that records are self-delimiting:
//! a decoder never needs out-of-band length information beyond the record
//! header's `length` field, and re-encoding a decoded value reproduces the
//! original bytes exactly.

mod varint;

pub use varint::{decode_varint, encode_varint, varint_len};
