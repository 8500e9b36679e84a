//! Serialization helpers producing EBML element bytes in memory.
//!
//! Rewrites assemble the metadata area as byte vectors first so that final
//! offsets are known before anything is written to disk.

use tagweave_model::{Result, TagError};

use crate::ebml::{ids, vint};

/// Minimal number of bytes for an unsigned-integer payload.
fn uint_payload_len(value: u64) -> u8 {
    let significant = 64 - value.leading_zeros() as u8;
    significant.div_ceil(8).max(1)
}

fn header(id: u64, payload_len: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    vint::write_id(&mut buf, id);
    // payload lengths here are bounded by what fits in memory
    let _ = vint::write_size(&mut buf, payload_len);
    buf
}

/// A complete master element wrapping the given payload bytes.
pub fn master(id: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = header(id, payload.len() as u64);
    buf.extend_from_slice(payload);
    buf
}

/// An unsigned-integer element with a minimal-length payload.
pub fn uint_element(id: u64, value: u64) -> Vec<u8> {
    let len = uint_payload_len(value);
    let mut buf = header(id, u64::from(len));
    for i in (0..len).rev() {
        buf.push((value >> (8 * i)) as u8);
    }
    buf
}

/// An unsigned-integer element with a fixed 8-byte payload (used where the
/// value must be patchable without resizing, e.g. seek positions).
pub fn uint_element_fixed(id: u64, value: u64) -> Vec<u8> {
    let mut buf = header(id, 8);
    buf.extend_from_slice(&value.to_be_bytes());
    buf
}

/// An 8-byte float element.
pub fn float_element(id: u64, value: f64) -> Vec<u8> {
    let mut buf = header(id, 8);
    buf.extend_from_slice(&value.to_bits().to_be_bytes());
    buf
}

/// A UTF-8 string element.
pub fn string_element(id: u64, value: &str) -> Vec<u8> {
    master(id, value.as_bytes())
}

/// A binary element.
pub fn binary_element(id: u64, data: &[u8]) -> Vec<u8> {
    master(id, data)
}

/// A Void element occupying exactly `total_size` bytes including its
/// header. Requires `total_size >= 2` (one id byte plus at least one size
/// byte).
pub fn void(total_size: u64) -> Result<Vec<u8>> {
    if total_size < 2 {
        return Err(TagError::InvalidData(format!(
            "a Void element cannot occupy {total_size} bytes"
        )));
    }
    // Find a size-field length so that 1 (id) + L + payload == total_size.
    for len in 1u8..=8 {
        let overhead = 1 + u64::from(len);
        if total_size < overhead {
            continue;
        }
        let payload = total_size - overhead;
        let all_ones = (1u64 << (7 * len)) - 1;
        if payload < all_ones {
            let mut buf = Vec::with_capacity(total_size.min(64) as usize);
            vint::write_id(&mut buf, ids::VOID);
            vint::write_size_with_length(&mut buf, payload, len)?;
            buf.resize(total_size as usize, 0);
            return Ok(buf);
        }
    }
    Err(TagError::InvalidData(format!(
        "cannot represent {total_size} bytes of padding as a Void element"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_element_uses_minimal_payload() {
        assert_eq!(uint_element(ids::TRACK_TYPE, 2), vec![0x83, 0x81, 0x02]);
        assert_eq!(
            uint_element(ids::TRACK_NUMBER, 0x1234),
            vec![0xD7, 0x82, 0x12, 0x34]
        );
        // zero still produces one payload byte
        assert_eq!(uint_element(ids::TRACK_TYPE, 0), vec![0x83, 0x81, 0x00]);
    }

    #[test]
    fn test_master_wraps_payload() {
        let inner = string_element(ids::DOC_TYPE, "matroska");
        let outer = master(ids::EBML, &inner);
        assert_eq!(&outer[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(outer[4], 0x80 | inner.len() as u8);
        assert_eq!(&outer[5..], inner.as_slice());
    }

    #[test]
    fn test_void_occupies_exact_size() {
        for size in [2u64, 3, 10, 127, 128, 129, 5000, 16386] {
            let bytes = void(size).unwrap();
            assert_eq!(bytes.len() as u64, size, "size {size}");
            assert_eq!(bytes[0], 0xEC);
        }
        assert!(void(1).is_err());
        assert!(void(0).is_err());
    }
}
