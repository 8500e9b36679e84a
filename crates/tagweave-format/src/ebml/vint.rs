//! EBML variable-length integers.
//!
//! A VINT encodes its own length in the leading-zero count of the first
//! byte: `1xxxxxxx` is one byte, `01xxxxxx xxxxxxxx` two, and so on up to
//! eight. Element ids keep the length marker as part of their value
//! (`0x1A45DFA3` is the four-byte EBML header id); size fields strip it.
//! A size whose value bits are all ones means "unknown length".

use tagweave_model::{Result, TagError};

use crate::io::ByteStream;

/// Largest definite size value an 8-byte VINT can carry. The all-ones
/// pattern one above is the unknown-length marker.
pub const MAX_SIZE_VALUE: u64 = (1 << 56) - 2;

fn vint_length(first_byte: u8) -> Result<u8> {
    if first_byte == 0 {
        return Err(TagError::InvalidData(
            "VINT longer than 8 bytes".into(),
        ));
    }
    Ok(first_byte.leading_zeros() as u8 + 1)
}

/// Reads an element id, keeping the length marker in the returned value.
pub fn read_id(stream: &mut ByteStream, max_id_length: u64) -> Result<(u64, u8)> {
    let first = stream.read_u8()?;
    let len = vint_length(first)?;
    if u64::from(len) > max_id_length {
        return Err(TagError::InvalidData(format!(
            "element id of {len} bytes exceeds the maximum id length of {max_id_length}"
        )));
    }
    let mut value = u64::from(first);
    for _ in 1..len {
        value = (value << 8) | u64::from(stream.read_u8()?);
    }
    Ok((value, len))
}

/// Reads a size field, stripping the length marker.
///
/// Returns `None` for the all-ones "unknown length" pattern.
pub fn read_size(stream: &mut ByteStream, max_size_length: u64) -> Result<(Option<u64>, u8)> {
    let first = stream.read_u8()?;
    let len = vint_length(first)?;
    if u64::from(len) > max_size_length {
        return Err(TagError::InvalidData(format!(
            "size field of {len} bytes exceeds the maximum size length of {max_size_length}"
        )));
    }
    let mut value = u64::from(first) & (0xFF >> len);
    for _ in 1..len {
        value = (value << 8) | u64::from(stream.read_u8()?);
    }
    let all_ones = (1u64 << (7 * len)) - 1;
    if value == all_ones {
        Ok((None, len))
    } else {
        Ok((Some(value), len))
    }
}

/// Number of bytes a marker-kept element id occupies.
pub fn id_length(id: u64) -> u8 {
    let significant = 64 - id.leading_zeros() as u8;
    significant.div_ceil(8).max(1)
}

/// Minimal number of bytes needed to encode `value` as a definite size.
pub fn size_length(value: u64) -> u8 {
    for len in 1u8..=8 {
        if value < (1u64 << (7 * len)) - 1 {
            return len;
        }
    }
    8
}

pub fn write_id(buf: &mut Vec<u8>, id: u64) {
    let len = id_length(id);
    for i in (0..len).rev() {
        buf.push((id >> (8 * i)) as u8);
    }
}

/// Appends `value` as a minimal-length definite size VINT.
pub fn write_size(buf: &mut Vec<u8>, value: u64) -> Result<()> {
    if value > MAX_SIZE_VALUE {
        return Err(TagError::InvalidData(format!(
            "size of {value} bytes exceeds the VINT limit"
        )));
    }
    write_size_with_length(buf, value, size_length(value))
}

/// Appends `value` as a definite size VINT of exactly `len` bytes.
pub fn write_size_with_length(buf: &mut Vec<u8>, value: u64, len: u8) -> Result<()> {
    debug_assert!((1..=8).contains(&len));
    let all_ones = (1u64 << (7 * len)) - 1;
    if value >= all_ones {
        return Err(TagError::InvalidData(format!(
            "size of {value} bytes does not fit a {len}-byte VINT"
        )));
    }
    let marked = value | (1u64 << (7 * len));
    for i in (0..len).rev() {
        buf.push((marked >> (8 * i)) as u8);
    }
    Ok(())
}

/// Appends the unknown-length marker of the given byte length.
pub fn write_unknown_size(buf: &mut Vec<u8>, len: u8) {
    debug_assert!((1..=8).contains(&len));
    buf.push(0xFF >> (len - 1));
    for _ in 1..len {
        buf.push(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn stream_with(data: &[u8]) -> (tempfile::NamedTempFile, ByteStream) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let stream = ByteStream::open(tmp.path()).unwrap();
        (tmp, stream)
    }

    #[test]
    fn test_read_known_ids() {
        let (_tmp, mut s) = stream_with(&[0x1A, 0x45, 0xDF, 0xA3, 0xEC, 0x42, 0x86]);
        assert_eq!(read_id(&mut s, 4).unwrap(), (0x1A45DFA3, 4));
        assert_eq!(read_id(&mut s, 4).unwrap(), (0xEC, 1));
        assert_eq!(read_id(&mut s, 4).unwrap(), (0x4286, 2));
    }

    #[test]
    fn test_id_length_cap_enforced() {
        let (_tmp, mut s) = stream_with(&[0x1A, 0x45, 0xDF, 0xA3]);
        assert!(matches!(
            read_id(&mut s, 2),
            Err(TagError::InvalidData(_))
        ));
    }

    #[test]
    fn test_size_round_trip_over_boundaries() {
        let mut values = vec![0u64, 1, 126, 127, 128, 0x3FFE, 0x3FFF, 0x4000];
        for shift in [21u32, 28, 35, 42, 49, 56] {
            values.push((1 << shift) / 2);
            values.push((1 << (shift - 7)) - 2);
            values.push((1 << (shift - 7)) - 1);
        }
        values.push(MAX_SIZE_VALUE);

        for value in values {
            let mut buf = Vec::new();
            write_size(&mut buf, value).unwrap();
            let (_tmp, mut s) = stream_with(&buf);
            let (decoded, len) = read_size(&mut s, 8).unwrap();
            assert_eq!(decoded, Some(value), "value {value}");
            assert_eq!(len as usize, buf.len());
        }
    }

    #[test]
    fn test_unknown_size_marker() {
        for len in 1u8..=8 {
            let mut buf = Vec::new();
            write_unknown_size(&mut buf, len);
            let (_tmp, mut s) = stream_with(&buf);
            assert_eq!(read_size(&mut s, 8).unwrap(), (None, len));
        }
    }

    #[test]
    fn test_truncated_vint_reports_truncation() {
        let (_tmp, mut s) = stream_with(&[0x41]); // declares 2 bytes, has 1
        assert!(matches!(
            read_size(&mut s, 8),
            Err(TagError::TruncatedData(_))
        ));
    }

    #[test]
    fn test_size_length_matches_written_length() {
        assert_eq!(size_length(0), 1);
        assert_eq!(size_length(126), 1);
        assert_eq!(size_length(127), 2); // 127 collides with the 1-byte unknown marker
        assert_eq!(size_length(16382), 2);
        assert_eq!(size_length(16383), 3);
        assert_eq!(size_length(MAX_SIZE_VALUE), 8);
    }
}
