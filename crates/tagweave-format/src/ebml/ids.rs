//! EBML and Matroska element ids (marker-kept form).

// EBML header
pub const EBML: u64 = 0x1A45DFA3;
pub const EBML_VERSION: u64 = 0x4286;
pub const EBML_READ_VERSION: u64 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u64 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u64 = 0x42F3;
pub const DOC_TYPE: u64 = 0x4282;
pub const DOC_TYPE_VERSION: u64 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u64 = 0x4285;

// global
pub const VOID: u64 = 0xEC;
pub const CRC32: u64 = 0xBF;

// segment
pub const SEGMENT: u64 = 0x18538067;

// level 1
pub const SEEK_HEAD: u64 = 0x114D9B74;
pub const SEGMENT_INFO: u64 = 0x1549A966;
pub const TRACKS: u64 = 0x1654AE6B;
pub const CLUSTER: u64 = 0x1F43B675;
pub const CUES: u64 = 0x1C53BB6B;
pub const CHAPTERS: u64 = 0x1043A770;
pub const ATTACHMENTS: u64 = 0x1941A469;
pub const TAGS: u64 = 0x1254C367;

// seek head
pub const SEEK: u64 = 0x4DBB;
pub const SEEK_ID: u64 = 0x53AB;
pub const SEEK_POSITION: u64 = 0x53AC;

// segment info
pub const TIMESTAMP_SCALE: u64 = 0x2AD7B1;
pub const DURATION: u64 = 0x4489;
pub const TITLE: u64 = 0x7BA9;
pub const MUXING_APP: u64 = 0x4D80;
pub const WRITING_APP: u64 = 0x5741;
pub const SEGMENT_UID: u64 = 0x73A4;
pub const DATE_UTC: u64 = 0x4461;

// tracks
pub const TRACK_ENTRY: u64 = 0xAE;
pub const TRACK_NUMBER: u64 = 0xD7;
pub const TRACK_UID: u64 = 0x73C5;
pub const TRACK_TYPE: u64 = 0x83;
pub const FLAG_ENABLED: u64 = 0xB9;
pub const FLAG_DEFAULT: u64 = 0x88;
pub const TRACK_NAME: u64 = 0x536E;
pub const TRACK_LANGUAGE: u64 = 0x22B59C;
pub const CODEC_ID: u64 = 0x86;
pub const AUDIO: u64 = 0xE1;
pub const SAMPLING_FREQUENCY: u64 = 0xB5;
pub const CHANNELS: u64 = 0x9F;
pub const BIT_DEPTH: u64 = 0x6264;
pub const VIDEO: u64 = 0xE0;
pub const PIXEL_WIDTH: u64 = 0xB0;
pub const PIXEL_HEIGHT: u64 = 0xBA;

// cues
pub const CUE_POINT: u64 = 0xBB;
pub const CUE_TIME: u64 = 0xB3;
pub const CUE_TRACK_POSITIONS: u64 = 0xB7;
pub const CUE_TRACK: u64 = 0xF7;
pub const CUE_CLUSTER_POSITION: u64 = 0xF1;
pub const CUE_RELATIVE_POSITION: u64 = 0xF0;

// chapters
pub const EDITION_ENTRY: u64 = 0x45B9;
pub const EDITION_UID: u64 = 0x45BC;
pub const CHAPTER_ATOM: u64 = 0xB6;
pub const CHAPTER_UID: u64 = 0x73C4;
pub const CHAPTER_TIME_START: u64 = 0x91;
pub const CHAPTER_TIME_END: u64 = 0x92;
pub const CHAPTER_FLAG_HIDDEN: u64 = 0x98;
pub const CHAPTER_DISPLAY: u64 = 0x80;
pub const CHAP_STRING: u64 = 0x85;
pub const CHAP_LANGUAGE: u64 = 0x437C;

// attachments
pub const ATTACHED_FILE: u64 = 0x61A7;
pub const FILE_DESCRIPTION: u64 = 0x467E;
pub const FILE_NAME: u64 = 0x466E;
pub const FILE_MIME_TYPE: u64 = 0x4660;
pub const FILE_DATA: u64 = 0x465C;
pub const FILE_UID: u64 = 0x46AE;

// tags
pub const TAG: u64 = 0x7373;
pub const TARGETS: u64 = 0x63C0;
pub const TARGET_TYPE_VALUE: u64 = 0x68CA;
pub const TARGET_TYPE: u64 = 0x63CA;
pub const TAG_TRACK_UID: u64 = 0x63C5;
pub const SIMPLE_TAG: u64 = 0x67C8;
pub const TAG_NAME: u64 = 0x45A3;
pub const TAG_LANGUAGE: u64 = 0x447A;
pub const TAG_DEFAULT: u64 = 0x4484;
pub const TAG_STRING: u64 = 0x4487;
pub const TAG_BINARY: u64 = 0x4485;

/// Human-readable name for diagnostics; `None` for ids outside the
/// vocabulary above.
pub fn name(id: u64) -> Option<&'static str> {
    Some(match id {
        EBML => "EBML",
        DOC_TYPE => "DocType",
        SEGMENT => "Segment",
        SEEK_HEAD => "SeekHead",
        SEGMENT_INFO => "Info",
        TRACKS => "Tracks",
        CLUSTER => "Cluster",
        CUES => "Cues",
        CHAPTERS => "Chapters",
        ATTACHMENTS => "Attachments",
        TAGS => "Tags",
        VOID => "Void",
        CRC32 => "CRC-32",
        _ => return None,
    })
}
