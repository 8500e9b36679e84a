//! Random-access byte stream with explicit-endian primitives.
//!
//! All multi-byte reads and writes go through [`byteorder`] with the
//! endianness named at the call site; nothing assumes native byte order.
//! The stream tracks its own position so `tell()` costs no syscall.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use tagweave_model::{AbortableProgressFeedback, Result, TagError};

/// Block size for bulk copies; the abort flag is polled once per block.
pub const COPY_BLOCK_SIZE: usize = 64 * 1024;

/// Per-allocation limit when reading variable-length payloads into memory.
/// Protects against maliciously declared lengths.
pub const ALLOCATION_LIMIT: u64 = 256 * 1024 * 1024;

/// Random-access file handle with big/little-endian read/write primitives
/// and positional bookkeeping.
#[derive(Debug)]
pub struct ByteStream {
    file: File,
    pos: u64,
    len: u64,
}

fn map_eof(err: std::io::Error) -> TagError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TagError::TruncatedData("unexpected end of stream".into())
    } else {
        TagError::Io(err)
    }
}

impl ByteStream {
    /// Opens a file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, pos: 0, len })
    }

    /// Opens a file for reading and in-place writing.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, pos: 0, len })
    }

    /// Creates (or truncates) a file for writing.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            pos: 0,
            len: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos != self.pos {
            self.file.seek(SeekFrom::Start(pos))?;
            self.pos = pos;
        }
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        let pos = self.pos.checked_add(count).ok_or_else(|| {
            TagError::InvalidData("seek target exceeds the addressable range".into())
        })?;
        self.seek(pos)
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    /// Truncates or extends the file to `len` bytes.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        if self.pos > len {
            self.file.seek(SeekFrom::Start(len))?;
            self.pos = len;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    // --- reads ---

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(map_eof)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Reads `len` bytes into a fresh buffer, guarding against absurd
    /// declared lengths.
    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        if len > ALLOCATION_LIMIT {
            return Err(TagError::InvalidData(format!(
                "declared length of {len} bytes exceeds the allocation limit"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.file.read_u8().map_err(map_eof)?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let value = self.file.read_u16::<BigEndian>().map_err(map_eof)?;
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u24_be(&mut self) -> Result<u32> {
        let value = self.file.read_u24::<BigEndian>().map_err(map_eof)?;
        self.pos += 3;
        Ok(value)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let value = self.file.read_u32::<BigEndian>().map_err(map_eof)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        let value = self.file.read_u64::<BigEndian>().map_err(map_eof)?;
        self.pos += 8;
        Ok(value)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let value = self.file.read_u16::<LittleEndian>().map_err(map_eof)?;
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let value = self.file.read_u32::<LittleEndian>().map_err(map_eof)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let value = self.file.read_u64::<LittleEndian>().map_err(map_eof)?;
        self.pos += 8;
        Ok(value)
    }

    // --- writes ---

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        self.pos += buf.len() as u64;
        self.len = self.len.max(self.pos);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    pub fn write_u16_be(&mut self, value: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.write_all(&buf)
    }

    pub fn write_u24_be(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 3];
        BigEndian::write_u24(&mut buf, value);
        self.write_all(&buf)
    }

    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.write_all(&buf)
    }

    pub fn write_u64_be(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.write_all(&buf)
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_all(&buf)
    }

    /// Copies `len` bytes from the current position into `dst`, in
    /// [`COPY_BLOCK_SIZE`] blocks, polling the abort flag between blocks.
    pub fn copy_to(
        &mut self,
        dst: &mut ByteStream,
        len: u64,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        let mut buf = vec![0u8; COPY_BLOCK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            progress.try_continue()?;
            let block = remaining.min(COPY_BLOCK_SIZE as u64) as usize;
            self.read_exact(&mut buf[..block])?;
            dst.write_all(&buf[..block])?;
            remaining -= block as u64;
            if len > 0 {
                progress.update_percentage((((len - remaining) * 100) / len) as u8);
            }
        }
        Ok(())
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
    fn test_endian_primitives_and_position() {
        let (_tmp, mut s) = stream_with(&[0x12, 0x34, 0x56, 0x78, 0x9A]);
        assert_eq!(s.len(), 5);
        assert_eq!(s.read_u16_be().unwrap(), 0x1234);
        assert_eq!(s.tell(), 2);
        s.seek(1).unwrap();
        assert_eq!(s.read_u32_le().unwrap(), 0x9A785634);
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn test_short_read_is_truncated_data() {
        let (_tmp, mut s) = stream_with(&[0xFF]);
        assert!(matches!(
            s.read_u32_be(),
            Err(TagError::TruncatedData(_))
        ));
    }

    #[test]
    fn test_copy_respects_abort() {
        let data = vec![0xAB; 1024];
        let (_tmp, mut src) = stream_with(&data);
        let dir = tempfile::tempdir().unwrap();
        let mut dst = ByteStream::create(&dir.path().join("out.bin")).unwrap();

        let progress = AbortableProgressFeedback::new();
        progress.abort();
        assert!(matches!(
            src.copy_to(&mut dst, 1024, &progress),
            Err(TagError::OperationAbort)
        ));

        src.seek(0).unwrap();
        let progress = AbortableProgressFeedback::new();
        src.copy_to(&mut dst, 1024, &progress).unwrap();
        assert_eq!(dst.len(), 1024);
    }
}
