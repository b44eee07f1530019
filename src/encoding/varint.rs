//! # Variable-Length Integer Encoding
//!
//! Packed integers for the node record layout: entry counts, key-suffix
//! lengths, node ids, per-entry logged sizes. The scheme spends one marker
//! byte to select a width, biased so the common small values fit in a single
//! byte:
//!
//! | Value range            | Bytes | Marker        |
//! |------------------------|-------|---------------|
//! | 0 - 240                | 1     | value itself  |
//! | 241 - 2287             | 2     | 241-248       |
//! | 2288 - 67823           | 3     | 249           |
//! | 67824 - 2^24-1         | 4     | 250           |
//! | 2^24 - 2^32-1          | 5     | 251           |
//! | 2^32 - u64::MAX        | 9     | 255           |
//!
//! Markers 252-254 are reserved. Multi-byte payloads are big-endian.
//!
//! Signed values are zigzag-mapped (`0,-1,1,-2,...` → `0,1,2,3,...`) before
//! packing, so small negative sentinels (the deleted-LN `-1` length) stay in
//! one byte.
//!
//! All functions are allocation-free and stateless; `push_*` variants append
//! to a record buffer under construction.

use eyre::{bail, ensure, Result};

/// Encoded width of `value` without encoding it.
pub fn varint_len(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else if value <= 0x00FF_FFFF {
        4
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Encodes `value` into `buf`, returning the number of bytes written.
/// `buf` must have at least `varint_len(value)` bytes remaining.
pub fn encode_varint(value: u64, buf: &mut [u8]) -> usize {
    if value <= 240 {
        buf[0] = value as u8;
        1
    } else if value <= 2287 {
        let v = value - 240;
        buf[0] = ((v >> 8) + 241) as u8;
        buf[1] = (v & 0xFF) as u8;
        2
    } else if value <= 67823 {
        let v = value - 2288;
        buf[0] = 249;
        buf[1] = (v >> 8) as u8;
        buf[2] = (v & 0xFF) as u8;
        3
    } else if value <= 0x00FF_FFFF {
        buf[0] = 250;
        buf[1] = (value >> 16) as u8;
        buf[2] = (value >> 8) as u8;
        buf[3] = value as u8;
        4
    } else if value <= 0xFFFF_FFFF {
        buf[0] = 251;
        buf[1] = (value >> 24) as u8;
        buf[2] = (value >> 16) as u8;
        buf[3] = (value >> 8) as u8;
        buf[4] = value as u8;
        5
    } else {
        buf[0] = 255;
        buf[1..9].copy_from_slice(&value.to_be_bytes());
        9
    }
}

/// Appends the encoding of `value` to `buf`.
pub fn push_varint(buf: &mut Vec<u8>, value: u64) {
    let mut scratch = [0u8; 9];
    let n = encode_varint(value, &mut scratch);
    buf.extend_from_slice(&scratch[..n]);
}

/// Zigzag-maps and appends a signed value.
pub fn push_varint_signed(buf: &mut Vec<u8>, value: i64) {
    push_varint(buf, zigzag(value));
}

/// Decodes a varint from the front of `buf`, returning (value, bytes read).
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");
    let marker = buf[0];

    match marker {
        0..=240 => Ok((u64::from(marker), 1)),
        241..=248 => {
            ensure!(buf.len() >= 2, "truncated 2-byte varint");
            let value = 240 + ((u64::from(marker) - 241) << 8) + u64::from(buf[1]);
            Ok((value, 2))
        }
        249 => {
            ensure!(buf.len() >= 3, "truncated 3-byte varint");
            let value = 2288 + (u64::from(buf[1]) << 8) + u64::from(buf[2]);
            Ok((value, 3))
        }
        250 => {
            ensure!(buf.len() >= 4, "truncated 4-byte varint");
            let value =
                (u64::from(buf[1]) << 16) | (u64::from(buf[2]) << 8) | u64::from(buf[3]);
            Ok((value, 4))
        }
        251 => {
            ensure!(buf.len() >= 5, "truncated 5-byte varint");
            let value = (u64::from(buf[1]) << 24)
                | (u64::from(buf[2]) << 16)
                | (u64::from(buf[3]) << 8)
                | u64::from(buf[4]);
            Ok((value, 5))
        }
        255 => {
            ensure!(buf.len() >= 9, "truncated 9-byte varint");
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[1..9]);
            Ok((u64::from_be_bytes(bytes), 9))
        }
        _ => bail!("invalid varint marker: {marker}"),
    }
}

/// Decodes a zigzag-mapped signed varint.
pub fn decode_varint_signed(buf: &[u8]) -> Result<(i64, usize)> {
    let (raw, n) = decode_varint(buf)?;
    Ok((unzigzag(raw), n))
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) -> usize {
        let mut buf = [0u8; 9];
        let written = encode_varint(value, &mut buf);
        assert_eq!(written, varint_len(value));
        let (decoded, read) = decode_varint(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(read, written);
        written
    }

    #[test]
    fn width_boundaries() {
        assert_eq!(round_trip(0), 1);
        assert_eq!(round_trip(240), 1);
        assert_eq!(round_trip(241), 2);
        assert_eq!(round_trip(2287), 2);
        assert_eq!(round_trip(2288), 3);
        assert_eq!(round_trip(67823), 3);
        assert_eq!(round_trip(67824), 4);
        assert_eq!(round_trip(0x00FF_FFFF), 4);
        assert_eq!(round_trip(0x0100_0000), 5);
        assert_eq!(round_trip(u64::from(u32::MAX)), 5);
        assert_eq!(round_trip(u64::from(u32::MAX) + 1), 9);
        assert_eq!(round_trip(u64::MAX), 9);
    }

    #[test]
    fn signed_sentinel_is_one_byte() {
        let mut buf = Vec::new();
        push_varint_signed(&mut buf, -1);
        assert_eq!(buf.len(), 1);
        let (value, read) = decode_varint_signed(&buf).unwrap();
        assert_eq!(value, -1);
        assert_eq!(read, 1);
    }

    #[test]
    fn signed_round_trip() {
        for value in [0i64, 1, -1, 2, -2, 1000, -1000, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            push_varint_signed(&mut buf, value);
            let (decoded, _) = decode_varint_signed(&buf).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn push_appends_to_record_buffer() {
        let mut buf = vec![0xAA];
        push_varint(&mut buf, 300);
        assert_eq!(buf.len(), 1 + varint_len(300));
        let (value, _) = decode_varint(&buf[1..]).unwrap();
        assert_eq!(value, 300);
    }

    #[test]
    fn decode_rejects_reserved_markers() {
        for marker in 252..=254u8 {
            assert!(decode_varint(&[marker, 0, 0, 0]).is_err());
        }
    }

    #[test]
    fn decode_rejects_truncation() {
        assert!(decode_varint(&[]).is_err());
        assert!(decode_varint(&[249, 0]).is_err());
        assert!(decode_varint(&[255, 1, 2, 3]).is_err());
    }
}
