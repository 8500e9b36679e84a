//! End-to-end scenarios against Matroska files built in memory.

mod common;

use common::*;

use tagweave_format::ebml::ids;
use tagweave_format::{Container, ContainerFormat, MediaFile};
use tagweave_model::{
    AbortableProgressFeedback, Diagnostics, ElementPosition, KnownField, ParsingStatus, Tag,
    TagError, TagValue,
};

fn progress() -> AbortableProgressFeedback {
    AbortableProgressFeedback::new()
}

#[test]
fn test_parse_everything_from_rich_file() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        chapters_element(),
        attachments_element(),
        tags_element(&[("TITLE", "Parsed Title"), ("ARTIST", "Parsed Artist")]),
        cluster_element(2048),
    ]);
    let path = write_fixture(&dir, "rich.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();

    assert_eq!(file.container_format(), ContainerFormat::Matroska);
    assert_eq!(file.container_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.tracks_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.chapters_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.attachments_parsing_status(), ParsingStatus::Ok);

    let tracks = file.tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].sampling_frequency, 48000);
    assert_eq!(tracks[0].channel_count, 2);
    assert_eq!(tracks[0].language.as_deref(), Some("eng"));
    assert_eq!(tracks[0].duration.as_secs(), 5);

    let chapters = file.chapters();
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].label(), Some("Intro"));
    assert_eq!(chapters[0].end.unwrap().as_secs(), 2);

    let attachments = file.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "cover.png");
    assert_eq!(attachments[0].mime_type, "image/png");

    let tags = file.tags();
    assert_eq!(tags.len(), 1);
    assert_eq!(
        tags[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Parsed Title"
    );
    assert!(!diag.has_critical());
}

#[test]
fn test_seekhead_locates_tags_when_scanning_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file_with_seekhead(16 * 1024, &[("TITLE", "Found Via Index")]);
    let path = write_fixture(&dir, "indexed.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    // far below the file size, so a linear scan past the clusters is
    // not an option
    file.parse_options_mut().max_full_parse_size = 64;
    file.parse_tags(&mut diag).unwrap();

    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(
        file.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Found Via Index"
    );
}

#[test]
fn test_oversized_file_without_seekhead_is_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        cluster_element(16 * 1024),
        tags_element(&[("TITLE", "Unreachable")]),
    ]);
    let path = write_fixture(&dir, "unindexed.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_options_mut().max_full_parse_size = 64;
    file.parse_everything(&mut diag).unwrap();

    // the tags facet alone degrades; everything else is unaffected
    assert_eq!(file.tags_parsing_status(), ParsingStatus::NotSupported);
    assert_eq!(file.tracks_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.container_parsing_status(), ParsingStatus::Ok);
    assert!(!diag.has_critical());
}

#[test]
fn test_full_scan_finds_trailing_tags_on_small_files() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        cluster_element(4096),
        tags_element(&[("TITLE", "After The Clusters")]),
    ]);
    let path = write_fixture(&dir, "scanned.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_tags(&mut diag).unwrap();

    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(
        file.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "After The Clusters"
    );
}

#[test]
fn test_mutate_and_rewrite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Old Title"), ("ARTIST", "Same Artist")]),
        cluster_element(2048),
    ]);
    let path = write_fixture(&dir, "roundtrip.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    for tag in file.tags_mut() {
        tag.set_value(
            KnownField::Title,
            TagValue::text("A Considerably Longer Replacement Title"),
        );
    }
    file.apply_changes(&mut diag, &progress()).unwrap();
    assert!(!diag.has_critical());

    // the same MediaFile can parse again after saving
    file.parse_everything(&mut diag).unwrap();
    assert_eq!(
        file.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "A Considerably Longer Replacement Title"
    );
    assert_eq!(
        file.tags()[0]
            .value(KnownField::Artist)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Same Artist"
    );
    // track and chapter data survives the rewrite
    assert_eq!(file.tracks()[0].sampling_frequency, 48000);

    // applying again without mutations keeps the state identical
    file.apply_changes(&mut diag, &progress()).unwrap();
    let mut reparsed = MediaFile::open(&path).unwrap();
    let mut diag2 = Diagnostics::new();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "A Considerably Longer Replacement Title"
    );
}

#[test]
fn test_splice_reuses_padding_and_leaves_media_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let tags = tags_element(&[("TITLE", "Original Name")]);
    let void = tagweave_format::ebml::write::void(1024).unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags.clone(),
        void,
        cluster_element(4096),
    ]);
    let path = write_fixture(&dir, "splice.mka", &bytes);
    let before = std::fs::read(&path).unwrap();

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().max_padding = 8192;
    file.parse_everything(&mut diag).unwrap();
    for tag in file.tags_mut() {
        tag.set_value(KnownField::Title, TagValue::text("New Name"));
    }
    file.apply_changes(&mut diag, &progress()).unwrap();

    let after = std::fs::read(&path).unwrap();
    // no rewrite happened: the file kept its size and the media region
    // (the trailing cluster bytes) is byte-identical in place
    assert_eq!(before.len(), after.len());
    let cluster_len = cluster_element(4096).len();
    assert_eq!(
        &before[before.len() - cluster_len..],
        &after[after.len() - cluster_len..]
    );

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "New Name"
    );
    assert!(!diag2.has_critical());
}

#[test]
fn test_save_file_path_leaves_source_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Source Title")]),
        cluster_element(1024),
    ]);
    let path = write_fixture(&dir, "source.mka", &bytes);
    let out_path = dir.path().join("out.mka");

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().save_file_path = Some(out_path.clone());
    file.parse_everything(&mut diag).unwrap();
    for tag in file.tags_mut() {
        tag.set_value(KnownField::Title, TagValue::text("Redirected Title"));
    }
    file.apply_changes(&mut diag, &progress()).unwrap();

    // source is byte-identical; the new path carries the change and has
    // become the working path
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    assert_eq!(file.path(), out_path.as_path());
    assert!(file.settings().save_file_path.is_none());

    let mut diag2 = Diagnostics::new();
    let mut written = MediaFile::open(&out_path).unwrap();
    written.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        written.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Redirected Title"
    );
}

#[test]
fn test_aborted_apply_leaves_file_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Untouched")]),
        cluster_element(2048),
    ]);
    let path = write_fixture(&dir, "aborted.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    for tag in file.tags_mut() {
        tag.set_value(KnownField::Title, TagValue::text("Never Written"));
    }

    let cancelled = AbortableProgressFeedback::new();
    cancelled.abort();
    let result = file.apply_changes(&mut diag, &cancelled);
    assert!(matches!(result, Err(TagError::OperationAbort)));
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_force_rewrite_writes_preferred_padding() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Padded")]),
        cluster_element(1024),
    ]);
    let path = write_fixture(&dir, "padded.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().force_rewrite = true;
    file.settings_mut().preferred_padding = 2048;
    file.settings_mut().max_padding = 8192;
    file.parse_everything(&mut diag).unwrap();
    file.apply_changes(&mut diag, &progress()).unwrap();

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(reparsed.padding_size(), 2048);
}

#[test]
fn test_unencodable_forced_padding_fails_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Kept")]),
        cluster_element(1024),
    ]);
    let path = write_fixture(&dir, "badpadding.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().force_rewrite = true;
    // a Void element needs at least two bytes; the forced value is used
    // verbatim and rejected by the writer
    file.settings_mut().preferred_padding = 1;
    file.settings_mut().max_padding = 8192;
    file.parse_everything(&mut diag).unwrap();

    let result = file.apply_changes(&mut diag, &progress());
    assert!(matches!(result, Err(TagError::InvalidData(_))));
    assert!(diag.has_critical());
    // the original file was restored from the backup untouched
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_forced_tag_position_after_data() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Movable")]),
        cluster_element(1024),
    ]);
    let path = write_fixture(&dir, "position.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().force_rewrite = true;
    file.settings_mut().tag_position = ElementPosition::AfterData;
    file.settings_mut().force_tag_position = true;
    file.parse_everything(&mut diag).unwrap();
    assert_eq!(
        file.container()
            .unwrap()
            .determine_tag_position(&mut Diagnostics::new()),
        ElementPosition::BeforeData
    );
    file.apply_changes(&mut diag, &progress()).unwrap();

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(
        reparsed
            .container()
            .unwrap()
            .determine_tag_position(&mut diag2),
        ElementPosition::AfterData
    );
    assert_eq!(
        reparsed.tags()[0]
            .value(KnownField::Title)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Movable"
    );
}

#[test]
fn test_attachment_survives_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        attachments_element(),
        tags_element(&[("TITLE", "With Attachment")]),
        cluster_element(512),
    ]);
    let path = write_fixture(&dir, "attached.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().force_rewrite = true;
    file.parse_everything(&mut diag).unwrap();
    file.apply_changes(&mut diag, &progress()).unwrap();

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    let attachments = reparsed.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "cover.png");
    assert_eq!(attachments[0].uid, 99);
}

#[test]
fn test_clear_parsing_results_allows_reparsing() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[
        info_element(),
        tracks_element(),
        tags_element(&[("TITLE", "Stable")]),
        cluster_element(256),
    ]);
    let path = write_fixture(&dir, "reparse.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();
    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);

    file.clear_parsing_results();
    assert_eq!(file.tags_parsing_status(), ParsingStatus::NotParsedYet);
    assert_eq!(file.container_format(), ContainerFormat::Unknown);

    file.parse_everything(&mut diag).unwrap();
    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(file.tags().len(), 1);
}

#[test]
fn test_unknown_format_marks_facets_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "garbage.bin", &[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_everything(&mut diag).unwrap();

    assert_eq!(file.container_format(), ContainerFormat::Unknown);
    assert_eq!(file.tags_parsing_status(), ParsingStatus::NotSupported);
    assert_eq!(file.tracks_parsing_status(), ParsingStatus::NotSupported);
    assert_eq!(file.chapters_parsing_status(), ParsingStatus::NotSupported);
    assert_eq!(
        file.attachments_parsing_status(),
        ParsingStatus::NotSupported
    );
}

#[test]
fn test_validate_index_reports_stale_entries() {
    use tagweave_format::{ByteStream, MatroskaContainer, ParseOptions};

    let dir = tempfile::tempdir().unwrap();
    let info = info_element();
    // SeekHead claims the Tags element right after the Info element, but
    // nothing is there
    let head = seek_head(&[(ids::TAGS, 4096)]);
    let bytes = mkv_file(&[head, info, tracks_element(), cluster_element(8192)]);
    let path = write_fixture(&dir, "stale.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut stream = ByteStream::open(&path).unwrap();
    let mut container = MatroskaContainer::new(0, ParseOptions::default());
    container.parse_header(&mut stream, &mut diag).unwrap();
    container.validate_index(&mut stream, &mut diag).unwrap();

    assert!(diag
        .messages()
        .iter()
        .any(|m| m.level == tagweave_model::DiagLevel::Warning
            && m.message.contains("SeekHead")));
    // stale index entries are never fatal
    assert!(!diag.has_critical());
}

#[test]
fn test_created_tag_title_and_attachment_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file(&[info_element(), tracks_element(), cluster_element(512)]);
    let path = write_fixture(&dir, "created.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.settings_mut().writing_application = Some("tagweave-tests".into());
    file.parse_everything(&mut diag).unwrap();
    assert!(file.tags().is_empty());

    let container = file.container_mut().unwrap();
    assert!(container.supports_title());
    container.set_title("Fresh Title");
    let tag = container.create_tag();
    tag.set_value(KnownField::Artist, TagValue::text("Fresh Artist"));
    let attachment = container.create_attachment();
    attachment.name = "notes.txt".into();
    attachment.mime_type = "text/plain".into();
    attachment.data = tagweave_model::AttachmentData::Buffer(b"hello".to_vec());

    file.apply_changes(&mut diag, &progress()).unwrap();

    let mut diag2 = Diagnostics::new();
    let mut reparsed = MediaFile::open(&path).unwrap();
    reparsed.parse_everything(&mut diag2).unwrap();
    assert_eq!(reparsed.container().unwrap().title(), Some("Fresh Title"));
    assert_eq!(
        reparsed.tags()[0]
            .value(KnownField::Artist)
            .unwrap()
            .to_display_string()
            .unwrap(),
        "Fresh Artist"
    );
    let attachments = reparsed.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "notes.txt");
}

#[test]
fn test_seek_entries_merge_and_validate() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mkv_file_with_seekhead(512, &[("TITLE", "Indexed")]);
    let path = write_fixture(&dir, "validate.mka", &bytes);

    let mut diag = Diagnostics::new();
    let mut file = MediaFile::open(&path).unwrap();
    file.parse_container_format(&mut diag).unwrap();

    // downcast via the concrete engine API is not exposed; instead verify
    // through behaviour: the tags facet resolves through the index even
    // with scanning disabled
    file.parse_options_mut().max_full_parse_size = 0;
    // options are captured at engine construction; reparse from scratch
    file.clear_parsing_results();
    file.parse_tags(&mut diag).unwrap();
    assert_eq!(file.tags_parsing_status(), ParsingStatus::Ok);
    assert_eq!(ids::name(ids::TAGS), Some("Tags"));
}
