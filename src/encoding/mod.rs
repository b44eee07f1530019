//! # Packed Integer Encodings
//!
//! Variable-length integer encoding used by the versioned node record layout
//! (log version 6 and later write all counts, lengths and ids packed).
//! Unsigned values use a marker-byte scheme biased toward small values;
//! signed values (the LN payload-length field, where `-1` marks a deleted
//! record) are zigzag-mapped onto the unsigned scheme.

pub mod varint;

pub use varint::{
    decode_varint, decode_varint_signed, encode_varint, push_varint, push_varint_signed,
    varint_len,
};
