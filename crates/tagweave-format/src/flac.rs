//! FLAC metadata blocks.
//!
//! A FLAC file is `fLaC` followed by a chain of metadata blocks (1-byte
//! is-last flag + type, 24-bit big-endian length) and then the audio
//! frames. The Vorbis comment lives in a block of type 4 without signature
//! or framing byte; covers are PICTURE blocks of type 6.

use std::time::Duration;

use tagweave_model::{
    DiagLevel, Diagnostics, MediaFormat, Result, Tag, TagError, TagField, TagValue, Track,
};

use crate::io::ByteStream;
use crate::vorbis::{VorbisComment, VorbisCommentFlags, COVER_FIELD};

pub const BLOCK_STREAMINFO: u8 = 0;
pub const BLOCK_PADDING: u8 = 1;
pub const BLOCK_VORBIS_COMMENT: u8 = 4;
pub const BLOCK_PICTURE: u8 = 6;

const CONTEXT: &str = "parsing FLAC stream";

/// One metadata block located in the file.
#[derive(Debug, Clone)]
pub struct FlacBlock {
    pub block_type: u8,
    pub is_last: bool,
    /// Offset of the 4-byte block header.
    pub header_offset: u64,
    pub data_size: u64,
}

impl FlacBlock {
    pub fn data_offset(&self) -> u64 {
        self.header_offset + 4
    }

    pub fn total_size(&self) -> u64 {
        4 + self.data_size
    }
}

/// A parsed FLAC stream: block layout, the stream's single track, and its
/// Vorbis comment (if any).
#[derive(Debug, Default)]
pub struct FlacStream {
    start_offset: u64,
    blocks: Vec<FlacBlock>,
    /// Offset of the first audio frame (end of the metadata area).
    audio_offset: u64,
    /// Total bytes of PADDING blocks, headers included.
    padding: u64,
    track: Track,
    comment: Option<VorbisComment>,
}

impl FlacStream {
    /// Parses the metadata area beginning at `start_offset` (which must
    /// point at the `fLaC` magic).
    pub fn parse(stream: &mut ByteStream, start_offset: u64, diag: &mut Diagnostics) -> Result<Self> {
        stream.seek(start_offset)?;
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if &magic != b"fLaC" {
            diag.add(DiagLevel::Critical, "FLAC signature is invalid.", CONTEXT);
            return Err(TagError::InvalidData("missing fLaC signature".into()));
        }

        let mut parsed = Self {
            start_offset,
            track: Track::new(MediaFormat::Flac),
            ..Self::default()
        };

        loop {
            let header_offset = stream.tell();
            let flags = stream.read_u8()?;
            let block_type = flags & 0x7F;
            let is_last = flags & 0x80 != 0;
            let data_size = u64::from(stream.read_u24_be()?);
            if header_offset + 4 + data_size > stream.len() {
                diag.add(
                    DiagLevel::Critical,
                    format!("Metadata block at offset {header_offset} extends beyond the file."),
                    CONTEXT,
                );
                return Err(TagError::TruncatedData("metadata block truncated".into()));
            }
            let block = FlacBlock {
                block_type,
                is_last,
                header_offset,
                data_size,
            };
            tracing::debug!(block_type, data_size, is_last, "read FLAC metadata block");

            match block_type {
                BLOCK_STREAMINFO => parsed.read_stream_info(stream, &block)?,
                BLOCK_VORBIS_COMMENT => {
                    let mut comment = VorbisComment::new();
                    stream.seek(block.data_offset())?;
                    comment.parse(
                        stream,
                        block.data_size,
                        VorbisCommentFlags::new()
                            .with(VorbisCommentFlags::NO_SIGNATURE)
                            .with(VorbisCommentFlags::NO_FRAMING_BYTE),
                        diag,
                    )?;
                    parsed.comment = Some(comment);
                }
                BLOCK_PICTURE => {
                    stream.seek(block.data_offset())?;
                    let data = stream.read_bytes(block.data_size)?;
                    match picture::parse(&data) {
                        Ok(pic) => {
                            let comment = parsed.comment.get_or_insert_with(VorbisComment::new);
                            comment
                                .fields_mut()
                                .insert(TagField::new(COVER_FIELD, TagValue::Picture(pic)));
                        }
                        Err(_) => diag.add(
                            DiagLevel::Warning,
                            "Ignoring malformed PICTURE block.",
                            CONTEXT,
                        ),
                    }
                }
                BLOCK_PADDING => parsed.padding += block.total_size(),
                _ => {}
            }

            let next = block.data_offset() + block.data_size;
            parsed.blocks.push(block);
            stream.seek(next)?;
            if is_last {
                break;
            }
        }

        parsed.audio_offset = stream.tell();
        Ok(parsed)
    }

    fn read_stream_info(&mut self, stream: &mut ByteStream, block: &FlacBlock) -> Result<()> {
        if block.data_size < 34 {
            return Err(TagError::TruncatedData("STREAMINFO too small".into()));
        }
        stream.seek(block.data_offset() + 10)?;
        // 64 packed bits: sample rate (20), channels-1 (3),
        // bits-per-sample-1 (5), total samples (36)
        let packed = stream.read_u64_be()?;
        let sample_rate = (packed >> 44) as u32;
        let channels = ((packed >> 41) & 0x7) as u16 + 1;
        let bits_per_sample = ((packed >> 36) & 0x1F) as u16 + 1;
        let total_samples = packed & 0xF_FFFF_FFFF;

        self.track.sampling_frequency = sample_rate;
        self.track.channel_count = channels;
        self.track.bit_depth = bits_per_sample;
        if sample_rate > 0 {
            self.track.duration =
                Duration::from_secs_f64(total_samples as f64 / f64::from(sample_rate));
        }
        Ok(())
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn comment(&self) -> Option<&VorbisComment> {
        self.comment.as_ref()
    }

    pub fn comment_mut(&mut self) -> Option<&mut VorbisComment> {
        self.comment.as_mut()
    }

    pub fn create_comment(&mut self) -> &mut VorbisComment {
        self.comment.get_or_insert_with(VorbisComment::new)
    }

    pub fn remove_comment(&mut self) -> bool {
        self.comment.take().is_some()
    }

    pub fn padding(&self) -> u64 {
        self.padding
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn audio_offset(&self) -> u64 {
        self.audio_offset
    }

    /// Size of the whole metadata area including the `fLaC` magic.
    pub fn metadata_size(&self) -> u64 {
        self.audio_offset - self.start_offset
    }

    /// Serializes the new metadata area (magic + blocks) with exactly
    /// `padding` bytes of PADDING block (0 = no padding block; otherwise at
    /// least 4 for the block header).
    ///
    /// STREAMINFO and blocks this library does not interpret are copied
    /// verbatim from `source`; the Vorbis comment and PICTURE blocks are
    /// regenerated from the in-memory state.
    pub fn serialize_metadata(
        &self,
        source: &mut ByteStream,
        padding: u64,
        diag: &mut Diagnostics,
    ) -> Result<Vec<u8>> {
        if padding == 1 || padding == 2 || padding == 3 {
            return Err(TagError::InvalidData(
                "FLAC padding smaller than the block header".into(),
            ));
        }

        let mut parts: Vec<(u8, Vec<u8>)> = Vec::new();

        // STREAMINFO must stay first; copy every block we do not regenerate.
        for block in &self.blocks {
            match block.block_type {
                BLOCK_VORBIS_COMMENT | BLOCK_PICTURE | BLOCK_PADDING => continue,
                _ => {
                    source.seek(block.data_offset())?;
                    let data = source.read_bytes(block.data_size)?;
                    parts.push((block.block_type, data));
                }
            }
        }

        if let Some(comment) = &self.comment {
            let flags = VorbisCommentFlags::new()
                .with(VorbisCommentFlags::NO_SIGNATURE)
                .with(VorbisCommentFlags::NO_FRAMING_BYTE)
                .with(VorbisCommentFlags::NO_COVERS);
            parts.push((BLOCK_VORBIS_COMMENT, comment.make(flags, diag)?));

            for field in comment.fields().values(COVER_FIELD) {
                match &field.value {
                    TagValue::Picture(pic) => parts.push((BLOCK_PICTURE, picture::make(pic))),
                    TagValue::Binary(raw) => parts.push((BLOCK_PICTURE, raw.clone())),
                    _ => diag.add(
                        DiagLevel::Warning,
                        "Cover field does not hold picture data; omitting it.",
                        "making FLAC metadata",
                    ),
                }
            }
        }

        if padding >= 4 {
            parts.push((BLOCK_PADDING, vec![0u8; (padding - 4) as usize]));
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(b"fLaC");
        let last = parts.len().saturating_sub(1);
        for (i, (block_type, data)) in parts.iter().enumerate() {
            let mut flags = *block_type;
            if i == last {
                flags |= 0x80;
            }
            buf.push(flags);
            buf.extend_from_slice(&[
                (data.len() >> 16) as u8,
                (data.len() >> 8) as u8,
                data.len() as u8,
            ]);
            buf.extend_from_slice(data);
        }
        Ok(buf)
    }
}

/// The FLAC picture structure, shared between PICTURE metadata blocks and
/// base64 `METADATA_BLOCK_PICTURE` comment fields.
pub mod picture {
    use byteorder::{BigEndian, ReadBytesExt};
    use std::io::{Cursor, Read};

    use tagweave_model::{Picture, Result, TagError};

    fn read_prefixed(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
        let len = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| TagError::TruncatedData("picture block truncated".into()))?;
        let mut buf = vec![0u8; len as usize];
        cursor
            .read_exact(&mut buf)
            .map_err(|_| TagError::TruncatedData("picture block truncated".into()))?;
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Picture> {
        let mut cursor = Cursor::new(data);
        let picture_type = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| TagError::TruncatedData("picture block truncated".into()))?;
        let mime_type = String::from_utf8_lossy(&read_prefixed(&mut cursor)?).into_owned();
        let description = String::from_utf8_lossy(&read_prefixed(&mut cursor)?).into_owned();
        // width, height, depth, colors
        for _ in 0..4 {
            cursor
                .read_u32::<BigEndian>()
                .map_err(|_| TagError::TruncatedData("picture block truncated".into()))?;
        }
        let payload = read_prefixed(&mut cursor)?;
        Ok(Picture {
            mime_type,
            description,
            picture_type,
            data: payload,
        })
    }

    pub fn make(picture: &Picture) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + picture.data.len());
        buf.extend_from_slice(&picture.picture_type.to_be_bytes());
        buf.extend_from_slice(&(picture.mime_type.len() as u32).to_be_bytes());
        buf.extend_from_slice(picture.mime_type.as_bytes());
        buf.extend_from_slice(&(picture.description.len() as u32).to_be_bytes());
        buf.extend_from_slice(picture.description.as_bytes());
        // width, height, depth, colors are not tracked
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&(picture.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&picture.data);
        buf
    }
}
