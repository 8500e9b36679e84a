//! Container format detection from leading magic bytes.

use serde::{Deserialize, Serialize};

/// Number of leading bytes the sniffer inspects.
pub const SNIFF_LEN: usize = 16;

/// EBML master document header, the first element of Matroska/WebM files.
pub const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// The container family of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerFormat {
    #[default]
    Unknown,
    /// EBML-based Matroska; refined to [`ContainerFormat::Webm`] once the
    /// doctype has been read.
    Matroska,
    Webm,
    Mp4,
    QuickTime,
    Ogg,
    Riff,
    Wave,
    Flac,
    /// Raw MPEG audio frames (MP1/MP2/MP3).
    MpegAudioFrames,
    /// Raw AAC in an ADTS frame stream.
    Adts,
    /// An ID3v2 tag at the very beginning; the actual container follows the
    /// tag and is determined by re-sniffing past it.
    Id3v2,
    Aiff,
    MonkeysAudio,
    WavPack,
}

impl ContainerFormat {
    /// Identifies the container from up to [`SNIFF_LEN`] leading bytes.
    pub fn from_signature(buf: &[u8]) -> ContainerFormat {
        if buf.len() >= 4 {
            let head = &buf[..4];
            if head == EBML_MAGIC {
                return ContainerFormat::Matroska;
            }
            if head == b"OggS" {
                return ContainerFormat::Ogg;
            }
            if head == b"fLaC" {
                return ContainerFormat::Flac;
            }
            if head == b"RIFF" {
                return if buf.len() >= 12 && &buf[8..12] == b"WAVE" {
                    ContainerFormat::Wave
                } else {
                    ContainerFormat::Riff
                };
            }
            if head == b"FORM" {
                return ContainerFormat::Aiff;
            }
            if head == b"MAC " {
                return ContainerFormat::MonkeysAudio;
            }
            if head == b"wvpk" {
                return ContainerFormat::WavPack;
            }
        }
        if buf.len() >= 8 && &buf[4..8] == b"ftyp" {
            return if buf.len() >= 12 && &buf[8..12] == b"qt  " {
                ContainerFormat::QuickTime
            } else {
                ContainerFormat::Mp4
            };
        }
        if buf.len() >= 3 && &buf[..3] == b"ID3" {
            return ContainerFormat::Id3v2;
        }
        if buf.len() >= 2 && buf[0] == 0xFF {
            // ADTS: 12 sync bits followed by the layer bits being zero.
            if buf[1] & 0xF6 == 0xF0 {
                return ContainerFormat::Adts;
            }
            // MPEG audio frame: 11 sync bits, layer bits nonzero.
            if buf[1] & 0xE0 == 0xE0 && buf[1] & 0x06 != 0 {
                return ContainerFormat::MpegAudioFrames;
            }
        }
        ContainerFormat::Unknown
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Unknown => "unknown",
            ContainerFormat::Matroska => "Matroska",
            ContainerFormat::Webm => "WebM",
            ContainerFormat::Mp4 => "MPEG-4 Part 14",
            ContainerFormat::QuickTime => "QuickTime",
            ContainerFormat::Ogg => "Ogg",
            ContainerFormat::Riff => "RIFF",
            ContainerFormat::Wave => "RIFF/WAVE",
            ContainerFormat::Flac => "FLAC",
            ContainerFormat::MpegAudioFrames => "MPEG audio frames",
            ContainerFormat::Adts => "ADTS",
            ContainerFormat::Id3v2 => "ID3v2 tag",
            ContainerFormat::Aiff => "AIFF",
            ContainerFormat::MonkeysAudio => "Monkey's Audio",
            ContainerFormat::WavPack => "WavPack",
        }
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            ContainerFormat::Unknown => "",
            ContainerFormat::Matroska => "mkv",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::QuickTime => "mov",
            ContainerFormat::Ogg => "ogg",
            ContainerFormat::Riff => "riff",
            ContainerFormat::Wave => "wav",
            ContainerFormat::Flac => "flac",
            ContainerFormat::MpegAudioFrames => "mp3",
            ContainerFormat::Adts => "aac",
            ContainerFormat::Id3v2 => "mp3",
            ContainerFormat::Aiff => "aiff",
            ContainerFormat::MonkeysAudio => "ape",
            ContainerFormat::WavPack => "wv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Matroska => "video/x-matroska",
            ContainerFormat::Webm => "video/webm",
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::QuickTime => "video/quicktime",
            ContainerFormat::Ogg => "application/ogg",
            ContainerFormat::Wave => "audio/vnd.wave",
            ContainerFormat::Flac => "audio/flac",
            ContainerFormat::MpegAudioFrames | ContainerFormat::Id3v2 => "audio/mpeg",
            ContainerFormat::Adts => "audio/aac",
            ContainerFormat::Aiff => "audio/aiff",
            ContainerFormat::MonkeysAudio => "audio/x-ape",
            ContainerFormat::WavPack => "audio/x-wavpack",
            _ => "application/octet-stream",
        }
    }
}
