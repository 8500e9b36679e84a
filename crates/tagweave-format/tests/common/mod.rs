//! Shared fixture builders: minimal but structurally valid files are
//! assembled in memory and written to temp files.

#![allow(dead_code)]

use std::path::PathBuf;

use tagweave_format::ebml::{ids, vint, write};

pub fn ebml_header() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&write::uint_element(ids::EBML_VERSION, 1));
    payload.extend_from_slice(&write::uint_element(ids::EBML_READ_VERSION, 1));
    payload.extend_from_slice(&write::uint_element(ids::EBML_MAX_ID_LENGTH, 4));
    payload.extend_from_slice(&write::uint_element(ids::EBML_MAX_SIZE_LENGTH, 8));
    payload.extend_from_slice(&write::string_element(ids::DOC_TYPE, "matroska"));
    payload.extend_from_slice(&write::uint_element(ids::DOC_TYPE_VERSION, 4));
    payload.extend_from_slice(&write::uint_element(ids::DOC_TYPE_READ_VERSION, 2));
    write::master(ids::EBML, &payload)
}

pub fn info_element() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&write::uint_element(ids::TIMESTAMP_SCALE, 1_000_000));
    payload.extend_from_slice(&write::string_element(ids::MUXING_APP, "fixturemux"));
    payload.extend_from_slice(&write::string_element(ids::WRITING_APP, "fixturemux"));
    payload.extend_from_slice(&write::float_element(ids::DURATION, 5000.0));
    write::master(ids::SEGMENT_INFO, &payload)
}

pub fn tracks_element() -> Vec<u8> {
    let mut audio = Vec::new();
    audio.extend_from_slice(&write::float_element(ids::SAMPLING_FREQUENCY, 48000.0));
    audio.extend_from_slice(&write::uint_element(ids::CHANNELS, 2));
    audio.extend_from_slice(&write::uint_element(ids::BIT_DEPTH, 16));

    let mut entry = Vec::new();
    entry.extend_from_slice(&write::uint_element(ids::TRACK_NUMBER, 1));
    entry.extend_from_slice(&write::uint_element(ids::TRACK_UID, 0xCAFE));
    entry.extend_from_slice(&write::uint_element(ids::TRACK_TYPE, 2));
    entry.extend_from_slice(&write::uint_element(ids::FLAG_DEFAULT, 1));
    entry.extend_from_slice(&write::string_element(ids::CODEC_ID, "A_OPUS"));
    entry.extend_from_slice(&write::string_element(ids::TRACK_LANGUAGE, "eng"));
    entry.extend_from_slice(&write::master(ids::AUDIO, &audio));
    write::master(ids::TRACKS, &write::master(ids::TRACK_ENTRY, &entry))
}

pub fn simple_tag(name: &str, value: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&write::string_element(ids::TAG_NAME, name));
    payload.extend_from_slice(&write::string_element(ids::TAG_LANGUAGE, "und"));
    payload.extend_from_slice(&write::string_element(ids::TAG_STRING, value));
    write::master(ids::SIMPLE_TAG, &payload)
}

pub fn tags_element(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut tag_payload = Vec::new();
    tag_payload.extend_from_slice(&write::master(
        ids::TARGETS,
        &write::uint_element(ids::TARGET_TYPE_VALUE, 50),
    ));
    for (name, value) in fields {
        tag_payload.extend_from_slice(&simple_tag(name, value));
    }
    write::master(ids::TAGS, &write::master(ids::TAG, &tag_payload))
}

pub fn cluster_element(payload_size: usize) -> Vec<u8> {
    let mut payload = Vec::new();
    // Timestamp element followed by a SimpleBlock full of filler
    payload.extend_from_slice(&write::uint_element(0xE7, 0));
    payload.extend_from_slice(&write::binary_element(0xA3, &vec![0xAB; payload_size]));
    write::master(ids::CLUSTER, &payload)
}

pub fn chapters_element() -> Vec<u8> {
    let mut display = Vec::new();
    display.extend_from_slice(&write::string_element(ids::CHAP_STRING, "Intro"));
    display.extend_from_slice(&write::string_element(ids::CHAP_LANGUAGE, "eng"));

    let mut atom = Vec::new();
    atom.extend_from_slice(&write::uint_element(ids::CHAPTER_UID, 7));
    atom.extend_from_slice(&write::uint_element(ids::CHAPTER_TIME_START, 0));
    atom.extend_from_slice(&write::uint_element(
        ids::CHAPTER_TIME_END,
        2_000_000_000,
    ));
    atom.extend_from_slice(&write::master(ids::CHAPTER_DISPLAY, &display));

    let edition = write::master(ids::EDITION_ENTRY, &write::master(ids::CHAPTER_ATOM, &atom));
    write::master(ids::CHAPTERS, &edition)
}

pub fn attachments_element() -> Vec<u8> {
    let mut file = Vec::new();
    file.extend_from_slice(&write::string_element(ids::FILE_NAME, "cover.png"));
    file.extend_from_slice(&write::string_element(ids::FILE_MIME_TYPE, "image/png"));
    file.extend_from_slice(&write::uint_element(ids::FILE_UID, 99));
    file.extend_from_slice(&write::binary_element(
        ids::FILE_DATA,
        &[0x89, 0x50, 0x4E, 0x47],
    ));
    write::master(ids::ATTACHMENTS, &write::master(ids::ATTACHED_FILE, &file))
}

/// A SeekHead with fixed 8-byte positions (relative to the segment payload
/// start), so its size does not depend on the position values.
pub fn seek_head(entries: &[(u64, u64)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, position) in entries {
        let mut id_bytes = Vec::new();
        vint::write_id(&mut id_bytes, *id);
        let mut seek = Vec::new();
        seek.extend_from_slice(&write::binary_element(ids::SEEK_ID, &id_bytes));
        seek.extend_from_slice(&write::uint_element_fixed(ids::SEEK_POSITION, *position));
        payload.extend_from_slice(&write::master(ids::SEEK, &seek));
    }
    write::master(ids::SEEK_HEAD, &payload)
}

pub fn segment(parts: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = parts.concat();
    let mut buf = Vec::new();
    vint::write_id(&mut buf, ids::SEGMENT);
    vint::write_size(&mut buf, payload.len() as u64).unwrap();
    buf.extend_from_slice(&payload);
    buf
}

/// A complete single-segment file: EBML header + the given level-1 parts.
pub fn mkv_file(parts: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = ebml_header();
    buf.extend_from_slice(&segment(parts));
    buf
}

/// A file whose SeekHead points at a Tags element placed after the
/// Cluster. Returns the bytes.
pub fn mkv_file_with_seekhead(cluster_size: usize, fields: &[(&str, &str)]) -> Vec<u8> {
    let info = info_element();
    let tracks = tracks_element();
    let cluster = cluster_element(cluster_size);
    let tags = tags_element(fields);

    // pass 1: seekhead with dummy positions to learn its size
    let dummy = seek_head(&[(ids::SEGMENT_INFO, 0), (ids::TAGS, 0)]);
    let seek_len = dummy.len() as u64;
    let info_pos = seek_len;
    let tags_pos = seek_len + (info.len() + tracks.len() + cluster.len()) as u64;
    let head = seek_head(&[(ids::SEGMENT_INFO, info_pos), (ids::TAGS, tags_pos)]);
    assert_eq!(head.len() as u64, seek_len);

    mkv_file(&[head, info, tracks, cluster, tags])
}

pub fn write_fixture(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
