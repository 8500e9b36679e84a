//! End-to-end scenarios against MPEG audio files built in memory.

mod common;

use common::write_fixture;

use tagweave_format::{ContainerFormat, Id3v1Tag, Id3v2Tag, MediaFile};
use tagweave_model::{
    AbortableProgressFeedback, Diagnostics, KnownField, MediaFormat, ParsingStatus, Tag, TagValue,
};

fn progress() -> AbortableProgressFeedback {
    AbortableProgressFeedback::new()
}

/// MPEG-1 layer III frame header (128 kbit/s, 44100 Hz) plus filler.
fn frame_data(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[0] = 0xFF;
    data[1] = 0xFB;
    data[2] = 0x92;
    data[3] = 0x40;
    data
}

fn id3v2_bytes(title: &str, padding: u64) -> Vec<u8> {
    let mut tag = Id3v2Tag::new();
    tag.set_value(KnownField::Title, TagValue::text(title));
    tag.set_value(KnownField::Artist, TagValue::text("Fixture Artist"));
    tag.make(padding, &mut Diagnostics::new()).unwrap()
}

fn id3v1_bytes(title: &str) -> Vec<u8> {
    let mut tag = Id3v1Tag::new();
    tag.set_value(KnownField::Title, TagValue::text(title));
    tag.set_value(KnownField::TrackPosition, TagValue::Integer(5));
    tag.make(&mut Diagnostics::new()).to_vec()
}

#[test]
fn test_parse_mp3_with_both_tag_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = id3v2_bytes("Leading Title", 64);
    let media_start = bytes.len();
    bytes.extend_from_slice(&frame_data(2048));
    bytes.extend_from_slice(&id3v1_bytes("Trailing Title"));
    let path = write_fixture(&dir, "both.mp3", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();

    assert_eq!(file.container_format(), ContainerFormat::MpegAudioFrames);
    assert_eq!(file.container_offset(), media_start as u64);
    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.tracks_parsing_status(), ParsingStatus::Ok);

    assert_eq!(file.id3v2_tags().len(), 1);
    assert_eq!(
        file.id3v2_tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Leading Title"
    );
    assert_eq!(
        file.id3v1_tag()
            .unwrap()
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Trailing Title"
    );

    let tracks = file.tracks();
    assert_eq!(tracks[0].format, MediaFormat::MpegLayer3);
    assert_eq!(tracks[0].sampling_frequency, 44100);
    assert!(!diag.has_critical());
}

#[test]
fn test_equal_size_change_splices_into_padding() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = id3v2_bytes("Old!", 256);
    let media_start = bytes.len();
    bytes.extend_from_slice(&frame_data(4096));
    let path = write_fixture(&dir, "splice.mp3", &bytes);
    let before = std::fs::read(&path).unwrap();

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().max_padding = 4096;
    file.parse_everything(&mut diag).unwrap();
    file.id3v2_tags_mut()[0].set_value(KnownField::Title, TagValue::text("New!"));
    file.apply_changes(&mut diag, &progress()).unwrap();

    let after = std::fs::read(&path).unwrap();
    // same overall size, media region untouched in place
    assert_eq!(before.len(), after.len());
    assert_eq!(&before[media_start..], &after[media_start..]);

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed.id3v2_tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "New!"
    );
}

#[test]
fn test_growing_tag_rewrites_and_keeps_audio() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = id3v2_bytes("A", 0);
    bytes.extend_from_slice(&frame_data(2048));
    let path = write_fixture(&dir, "grow.mp3", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().preferred_padding = 512;
    file.settings_mut().max_padding = 1024;
    file.parse_everything(&mut diag).unwrap();
    file.id3v2_tags_mut()[0].set_value(
        KnownField::Title,
        TagValue::text("An Enormously Longer Title That Cannot Fit In Place"),
    );
    file.apply_changes(&mut diag, &progress()).unwrap();

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed.id3v2_tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "An Enormously Longer Title That Cannot Fit In Place"
    );
    // rewrite interleaved the preferred padding
    assert_eq!(reparsed.padding_size(), 512);
    // audio frames follow the new tag region unchanged
    let after = std::fs::read(&path).unwrap();
    let media_start = reparsed.container_offset() as usize;
    assert_eq!(&after[media_start..media_start + 4], &[0xFF, 0xFB, 0x92, 0x40]);
    assert_eq!(after.len() - media_start, 2048);
}

#[test]
fn test_removing_id3v1_truncates_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = frame_data(1024);
    bytes.extend_from_slice(&id3v1_bytes("Goes Away"));
    let path = write_fixture(&dir, "truncate.mp3", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    assert!(file.id3v1_tag().is_some());

    file.remove_id3v1_tag();
    file.apply_changes(&mut diag, &progress()).unwrap();

    let after = std::fs::read(&path).unwrap();
    assert_eq!(after.len(), 1024);

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert!(reparsed.id3v1_tag().is_none());
}

#[test]
fn test_adding_id3v1_appends_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "append.mp3", &frame_data(1024));

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    assert!(file.id3v1_tag().is_none());

    let tag = file.create_id3v1_tag();
    tag.set_value(KnownField::Title, TagValue::text("Fresh Trailer"));
    file.apply_changes(&mut diag, &progress()).unwrap();

    let after = std::fs::read(&path).unwrap();
    assert_eq!(after.len(), 1024 + 128);
    assert_eq!(&after[1024..1027], b"TAG");

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed
            .id3v1_tag()
            .unwrap()
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Fresh Trailer"
    );
}

#[test]
fn test_remove_all_tags_strips_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = id3v2_bytes("Doomed", 32);
    bytes.extend_from_slice(&frame_data(1024));
    bytes.extend_from_slice(&id3v1_bytes("Doomed Too"));
    let path = write_fixture(&dir, "strip.mp3", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    assert!(file.has_any_tag());

    file.remove_all_tags();
    assert!(!file.has_any_tag());
    file.apply_changes(&mut diag, &progress()).unwrap();

    // only the audio frames remain
    let after = std::fs::read(&path).unwrap();
    assert_eq!(after.len(), 1024);
    assert_eq!(&after[..2], &[0xFF, 0xFB]);
}

#[test]
fn test_id3v1_to_id3v2_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = frame_data(512);
    bytes.extend_from_slice(&id3v1_bytes("Promoted"));
    let path = write_fixture(&dir, "convert.mp3", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    assert!(file.id3v1_to_id3v2());
    assert!(file.id3v1_tag().is_none());
    assert_eq!(
        file.id3v2_tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Promoted"
    );
    assert_eq!(
        file.id3v2_tags()[0]
            .value(KnownField::TrackPosition)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "5"
    );
}
