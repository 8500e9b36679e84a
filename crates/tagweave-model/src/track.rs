//! Parsed stream descriptors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broad media category of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    Subtitles,
    #[default]
    Unknown,
}

/// Codec/stream format of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaFormat {
    Aac,
    MpegLayer1,
    MpegLayer2,
    MpegLayer3,
    Vorbis,
    Opus,
    Flac,
    Pcm,
    Ac3,
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    SubRip,
    #[default]
    Unknown,
}

impl MediaFormat {
    pub fn name(&self) -> &'static str {
        match self {
            MediaFormat::Aac => "Advanced Audio Coding",
            MediaFormat::MpegLayer1 => "MPEG Audio Layer 1",
            MediaFormat::MpegLayer2 => "MPEG Audio Layer 2",
            MediaFormat::MpegLayer3 => "MPEG Audio Layer 3",
            MediaFormat::Vorbis => "Vorbis",
            MediaFormat::Opus => "Opus",
            MediaFormat::Flac => "FLAC",
            MediaFormat::Pcm => "PCM",
            MediaFormat::Ac3 => "Dolby Digital",
            MediaFormat::H264 => "AVC / H.264",
            MediaFormat::H265 => "HEVC / H.265",
            MediaFormat::Vp8 => "VP8",
            MediaFormat::Vp9 => "VP9",
            MediaFormat::Av1 => "AV1",
            MediaFormat::SubRip => "SubRip",
            MediaFormat::Unknown => "unknown",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            MediaFormat::Aac
            | MediaFormat::MpegLayer1
            | MediaFormat::MpegLayer2
            | MediaFormat::MpegLayer3
            | MediaFormat::Vorbis
            | MediaFormat::Opus
            | MediaFormat::Flac
            | MediaFormat::Pcm
            | MediaFormat::Ac3 => MediaType::Audio,
            MediaFormat::H264
            | MediaFormat::H265
            | MediaFormat::Vp8
            | MediaFormat::Vp9
            | MediaFormat::Av1 => MediaType::Video,
            MediaFormat::SubRip => MediaType::Subtitles,
            MediaFormat::Unknown => MediaType::Unknown,
        }
    }
}

/// A parsed codec/stream descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Track number or UID within the container; 0 for standalone streams.
    pub id: u64,
    pub media_type: MediaType,
    pub format: MediaFormat,
    pub name: Option<String>,
    /// ISO 639-2 language code, when declared.
    pub language: Option<String>,
    pub channel_count: u16,
    /// Raw channel configuration code from the stream header, when present.
    pub channel_config: u8,
    /// Sampling frequency in Hz; 0 when unknown.
    pub sampling_frequency: u32,
    /// Bits per sample; 0 when unknown or not applicable.
    pub bit_depth: u16,
    pub duration: Duration,
    pub default_track: bool,
    pub enabled: bool,
}

impl Track {
    pub fn new(format: MediaFormat) -> Self {
        Self {
            format,
            media_type: format.media_type(),
            enabled: true,
            ..Self::default()
        }
    }
}
