//! Framed audio streams without an outer container (ADTS and MPEG audio).
//!
//! These files are a plain sequence of frames, optionally wrapped in a
//! leading ID3v2 tag and a trailing 128-byte ID3v1 tag. The engine
//! discovers where the audio payload ends and derives a single track from
//! the first frame header.

use std::time::Duration;

use tagweave_model::{DiagLevel, Diagnostics, MediaFormat, Result, TagError, Track};

use crate::io::ByteStream;
use crate::signature::ContainerFormat;

const CONTEXT: &str = "parsing frame stream";

/// MPEG-4 sampling frequencies by index; indices 13–15 are reserved.
const MPEG4_SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Channel counts for the MPEG-4 channel configurations 0–7.
const MPEG4_CHANNEL_COUNTS: [u16; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

/// MPEG audio sampling frequencies: `[version][index]`, version 0 = MPEG-1,
/// 1 = MPEG-2, 2 = MPEG-2.5.
const MPEG_SAMPLING_FREQUENCIES: [[u32; 3]; 3] = [
    [44100, 48000, 32000],
    [22050, 24000, 16000],
    [11025, 12000, 8000],
];

/// MPEG audio bitrates in kbit/s: `[version != 1][layer - 1][index]`.
const MPEG_BITRATES: [[[u32; 15]; 3]; 2] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

/// A parsed container-less frame stream.
#[derive(Debug)]
pub struct FrameStream {
    start_offset: u64,
    size: u64,
    track: Track,
}

impl FrameStream {
    /// Parses the stream starting at `start_offset` (past any leading
    /// ID3v2 tags).
    pub fn parse(
        stream: &mut ByteStream,
        start_offset: u64,
        format: ContainerFormat,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        if stream.len() <= start_offset {
            return Err(TagError::NoDataFound);
        }

        // Locate the end of the audio payload. A trailing ID3v1 tag claims
        // the last 128 bytes.
        let size = if stream.len() >= start_offset + 128 {
            stream.seek(stream.len() - 128)?;
            if stream.read_u24_be()? == 0x544147 {
                stream.tell() - 3 - start_offset
            } else {
                stream.tell() + 125 - start_offset
            }
        } else {
            stream.len() - start_offset
        };
        stream.seek(start_offset)?;

        let track = match format {
            ContainerFormat::Adts => Self::parse_adts_frame(stream, diag)?,
            ContainerFormat::MpegAudioFrames => Self::parse_mpeg_frame(stream, size, diag)?,
            other => {
                return Err(TagError::NotSupported(format!(
                    "{} is not a framed audio stream",
                    other.name()
                )))
            }
        };

        tracing::debug!(
            start_offset,
            size,
            format = ?track.format,
            sampling_frequency = track.sampling_frequency,
            channels = track.channel_count,
            "parsed frame stream"
        );
        Ok(Self {
            start_offset,
            size,
            track,
        })
    }

    fn parse_adts_frame(stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<Track> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        if header[0] != 0xFF || header[1] & 0xF6 != 0xF0 {
            diag.add(DiagLevel::Critical, "ADTS frame sync is invalid.", CONTEXT);
            return Err(TagError::InvalidData("no ADTS frame sync".into()));
        }

        let object_type = (header[2] >> 6) & 0x3; // profile, object type - 1
        let frequency_index = (header[2] >> 2) & 0xF;
        let channel_config = ((header[2] & 0x1) << 2) | (header[3] >> 6);

        let mut track = Track::new(MediaFormat::Aac);
        track.channel_config = channel_config;
        track.channel_count = MPEG4_CHANNEL_COUNTS
            .get(channel_config as usize)
            .copied()
            .unwrap_or(0);
        track.sampling_frequency = match MPEG4_SAMPLING_FREQUENCIES.get(frequency_index as usize) {
            Some(rate) => *rate,
            None => {
                diag.add(
                    DiagLevel::Warning,
                    format!("Sampling frequency index {frequency_index} is reserved."),
                    CONTEXT,
                );
                0
            }
        };
        tracing::debug!(object_type, frequency_index, channel_config, "ADTS first frame");
        Ok(track)
    }

    fn parse_mpeg_frame(
        stream: &mut ByteStream,
        payload_size: u64,
        diag: &mut Diagnostics,
    ) -> Result<Track> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
            diag.add(
                DiagLevel::Critical,
                "MPEG audio frame sync is invalid.",
                CONTEXT,
            );
            return Err(TagError::InvalidData("no MPEG audio frame sync".into()));
        }

        // version: 3 = MPEG-1, 2 = MPEG-2, 0 = MPEG-2.5
        let version_bits = (header[1] >> 3) & 0x3;
        let layer_bits = (header[1] >> 1) & 0x3; // 3 = layer I, 2 = II, 1 = III
        if layer_bits == 0 {
            diag.add(DiagLevel::Critical, "MPEG audio layer is reserved.", CONTEXT);
            return Err(TagError::InvalidData("reserved MPEG audio layer".into()));
        }
        let layer = 4 - layer_bits; // 1..=3

        let mut track = Track::new(match layer {
            1 => MediaFormat::MpegLayer1,
            2 => MediaFormat::MpegLayer2,
            _ => MediaFormat::MpegLayer3,
        });

        let version_row = match version_bits {
            3 => 0,
            2 => 1,
            0 => 2,
            _ => {
                diag.add(
                    DiagLevel::Warning,
                    "MPEG audio version is reserved.",
                    CONTEXT,
                );
                0
            }
        };
        let frequency_index = (header[2] >> 2) & 0x3;
        track.sampling_frequency = match frequency_index {
            3 => {
                diag.add(
                    DiagLevel::Warning,
                    "Sampling frequency index 3 is reserved.",
                    CONTEXT,
                );
                0
            }
            index => MPEG_SAMPLING_FREQUENCIES[version_row][index as usize],
        };

        let channel_mode = header[3] >> 6;
        track.channel_config = channel_mode;
        track.channel_count = if channel_mode == 3 { 1 } else { 2 };

        let bitrate_index = header[2] >> 4;
        if bitrate_index != 0 && bitrate_index != 0xF {
            let table = &MPEG_BITRATES[usize::from(version_row != 0)][(layer - 1) as usize];
            let bitrate = table[bitrate_index as usize];
            if bitrate > 0 {
                track.duration =
                    Duration::from_secs_f64(payload_size as f64 * 8.0 / f64::from(bitrate * 1000));
            }
        }
        Ok(track)
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Size of the audio payload in bytes (leading tags and the trailing
    /// ID3v1 tag excluded).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn track(&self) -> &Track {
        &self.track
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

    fn mp3_frame_header() -> [u8; 4] {
        // MPEG-1 layer III, 128 kbit/s, 44100 Hz, joint stereo
        [0xFF, 0xFB, 0x92, 0x40]
    }

    #[test]
    fn test_payload_size_with_id3v1_trailer() {
        // 2048-byte file whose last 128 bytes start with "TAG"
        let mut data = vec![0u8; 2048];
        data[..4].copy_from_slice(&mp3_frame_header());
        data[2048 - 128..2048 - 125].copy_from_slice(b"TAG");
        let (_tmp, mut stream) = stream_with(&data);

        let mut diag = Diagnostics::new();
        let parsed = FrameStream::parse(
            &mut stream,
            0,
            ContainerFormat::MpegAudioFrames,
            &mut diag,
        )
        .unwrap();
        assert_eq!(parsed.size(), 2048 - 128);
        assert_eq!(parsed.track().format, MediaFormat::MpegLayer3);
        assert_eq!(parsed.track().sampling_frequency, 44100);
        assert_eq!(parsed.track().channel_count, 2);
    }

    #[test]
    fn test_payload_size_without_id3v1_trailer() {
        let mut data = vec![0u8; 2048];
        data[..4].copy_from_slice(&mp3_frame_header());
        let (_tmp, mut stream) = stream_with(&data);

        let mut diag = Diagnostics::new();
        let parsed = FrameStream::parse(
            &mut stream,
            0,
            ContainerFormat::MpegAudioFrames,
            &mut diag,
        )
        .unwrap();
        assert_eq!(parsed.size(), 2048);
    }

    #[test]
    fn test_adts_first_frame_tables() {
        // sync 0xFFF1, AAC LC, index 4 (44100 Hz), channel config 2
        let mut data = vec![0u8; 512];
        data[0] = 0xFF;
        data[1] = 0xF1;
        data[2] = (0b01 << 6) | (4 << 2); // profile LC, frequency index 4
        data[3] = 0b10 << 6; // channel config 2
        let (_tmp, mut stream) = stream_with(&data);

        let mut diag = Diagnostics::new();
        let parsed =
            FrameStream::parse(&mut stream, 0, ContainerFormat::Adts, &mut diag).unwrap();
        assert_eq!(parsed.track().format, MediaFormat::Aac);
        assert_eq!(parsed.track().sampling_frequency, 44100);
        assert_eq!(parsed.track().channel_count, 2);
        assert_eq!(parsed.track().channel_config, 2);
    }

    #[test]
    fn test_reserved_frequency_index_yields_zero_rate() {
        let mut data = vec![0u8; 512];
        data[0] = 0xFF;
        data[1] = 0xF1;
        data[2] = (0b01 << 6) | (14 << 2); // reserved index 14
        data[3] = 0b01 << 6;
        let (_tmp, mut stream) = stream_with(&data);

        let mut diag = Diagnostics::new();
        let parsed =
            FrameStream::parse(&mut stream, 0, ContainerFormat::Adts, &mut diag).unwrap();
        assert_eq!(parsed.track().sampling_frequency, 0);
        assert_eq!(diag.level(), Some(DiagLevel::Warning));
    }

    #[test]
    fn test_bad_sync_is_critical() {
        let data = vec![0u8; 512];
        let (_tmp, mut stream) = stream_with(&data);
        let mut diag = Diagnostics::new();
        assert!(matches!(
            FrameStream::parse(&mut stream, 0, ContainerFormat::Adts, &mut diag),
            Err(TagError::InvalidData(_))
        ));
        assert!(diag.has_critical());
    }
}
