//! Writing support for the Matroska engine: in-place tag splicing and the
//! end-to-end rewrite driver.
//!
//! A rewrite assembles the new metadata area in memory first so that the
//! regenerated SeekHead and Cues carry final offsets, then streams the
//! Cluster ranges over from the source in blocks.

use tagweave_model::{
    AbortableProgressFeedback, AttachmentData, DiagLevel, Diagnostics, ElementPosition,
    ParsingStatus, Result, Tag, TagError, TagField, TagValue,
};

use crate::ebml::{ids, vint, write};
use crate::io::ByteStream;
use crate::planner;
use crate::settings::SaveSettings;

use super::{LayoutEntry, MatroskaContainer};

const CONTEXT: &str = "making Matroska file";

/// The smallest in-place filler: a Void element needs two bytes.
const MIN_VOID_SIZE: u64 = 2;

/// A piece of the output file: freshly serialized bytes or a range copied
/// from the source.
enum Part {
    Bytes(Vec<u8>),
    Copy { offset: u64, len: u64 },
}

impl Part {
    fn len(&self) -> u64 {
        match self {
            Part::Bytes(bytes) => bytes.len() as u64,
            Part::Copy { len, .. } => *len,
        }
    }
}

/// Parsed Cues content, kept so cluster positions can be shifted.
struct CuePoint {
    time: Option<u64>,
    extras: Vec<u8>,
    positions: Vec<CueTrackPosition>,
}

struct CueTrackPosition {
    track: Option<u64>,
    cluster_position: Option<u64>,
    extras: Vec<u8>,
}

impl MatroskaContainer {
    pub(super) fn try_splice_impl(
        &mut self,
        stream: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool> {
        if settings.force_rewrite || self.tags_status != ParsingStatus::Ok {
            return Ok(false);
        }
        self.guard_header()?;

        // splicing cannot move elements; honour forced positions
        let current_tags = self.determine_element_position(ids::TAGS);
        if settings.force_tag_position
            && settings.tag_position != ElementPosition::Keep
            && current_tags != ElementPosition::Keep
            && settings.tag_position != current_tags
        {
            return Ok(false);
        }
        let current_index = self.determine_element_position(ids::CUES);
        if settings.force_index_position
            && settings.index_position != ElementPosition::Keep
            && current_index != ElementPosition::Keep
            && settings.index_position != current_index
        {
            return Ok(false);
        }

        let tags_entries: Vec<LayoutEntry> = self
            .layout
            .iter()
            .copied()
            .filter(|entry| entry.id == ids::TAGS)
            .collect();
        if tags_entries.len() != 1 {
            return Ok(false);
        }
        let tags_entry = tags_entries[0];

        // absorb a Void element directly following the tags
        let mut region_end = tags_entry.end;
        if let Some(void) = self
            .layout
            .iter()
            .find(|entry| entry.id == ids::VOID && entry.start == tags_entry.end)
        {
            region_end = void.end;
        }
        let region = region_end - tags_entry.start;

        let new_tags = self.serialize_tags(diag)?;
        let plan = planner::plan(Some(region), new_tags.len() as u64, MIN_VOID_SIZE, settings);
        if plan.rewrite {
            return Ok(false);
        }

        // warn about stale index entries before relying on the layout
        self.validate_index(stream, diag)?;
        progress.try_continue()?;
        progress.update_step("splicing tag information");

        stream.seek(tags_entry.start)?;
        stream.write_all(&new_tags)?;
        if plan.padding > 0 {
            let filler = write::void(plan.padding)?;
            stream.write_all(&filler)?;
        }
        stream.sync()?;
        tracing::info!(
            offset = tags_entry.start,
            new_size = new_tags.len(),
            padding = plan.padding,
            "spliced Matroska tags in place"
        );
        Ok(true)
    }

    pub(super) fn make_file_impl(
        &mut self,
        source: &mut ByteStream,
        dest: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        self.guard_header()?;
        progress.try_continue()?;
        progress.update_step("preparing rewrite");

        // a rewrite reads the whole file anyway
        self.scan_layout(source, diag, true)?;
        if self.segment_count > 1 {
            diag.add(
                DiagLevel::Critical,
                "Rewriting files with multiple segments is not implemented.",
                CONTEXT,
            );
            return Err(TagError::NotSupported("multi-segment Matroska files".into()));
        }
        let segment = self
            .segment
            .ok_or_else(|| TagError::InvalidData("no segment to rewrite".into()))?;

        let tag_position = resolve_position(
            settings.tag_position,
            self.determine_element_position(ids::TAGS),
        );
        let index_position = resolve_position(
            settings.index_position,
            self.determine_element_position(ids::CUES),
        );

        // --- assemble the parts of the new segment payload ---

        let tags_parts = if self.tags_status == ParsingStatus::Ok {
            let bytes = self.serialize_tags(diag)?;
            if bytes.is_empty() {
                Vec::new()
            } else {
                vec![Part::Bytes(bytes)]
            }
        } else {
            // the tags could not be parsed; carry them over untouched
            self.copy_parts(ids::TAGS)
        };
        let attachments_parts = if self.attachments_status == ParsingStatus::Ok {
            let bytes = self.serialize_attachments(source, diag)?;
            if bytes.is_empty() {
                Vec::new()
            } else {
                vec![Part::Bytes(bytes)]
            }
        } else {
            self.copy_parts(ids::ATTACHMENTS)
        };
        let tracks_parts = self.copy_parts(ids::TRACKS);
        let chapters_parts = self.copy_parts(ids::CHAPTERS);
        let media_parts = self.copy_parts(ids::CLUSTER);

        let first_cluster = self.first_cluster;
        let unmanaged_before: Vec<Part> = self.unmanaged_parts(first_cluster, true);
        let unmanaged_after: Vec<Part> = self.unmanaged_parts(first_cluster, false);

        let cue_points = self.read_cues(source, diag)?;

        // Seek entries with fixed 8-byte positions keep the SeekHead size
        // independent of the final offsets.
        let mut seek_ids: Vec<u64> = vec![ids::SEGMENT_INFO];
        if !tracks_parts.is_empty() {
            seek_ids.push(ids::TRACKS);
        }
        if !chapters_parts.is_empty() {
            seek_ids.push(ids::CHAPTERS);
        }
        if !tags_parts.is_empty() {
            seek_ids.push(ids::TAGS);
        }
        if !attachments_parts.is_empty() {
            seek_ids.push(ids::ATTACHMENTS);
        }
        if !cue_points.is_empty() {
            seek_ids.push(ids::CUES);
        }
        let seek_head_len = serialize_seek_head(&seek_ids.iter().map(|&id| (id, 0)).collect::<Vec<_>>())
            .len() as u64;

        let info_bytes = self.serialize_info(settings);
        let padding = planner::plan(None, 0, MIN_VOID_SIZE, settings).padding;
        // a forced padding the Void encoding cannot represent fails here,
        // before anything has been written
        let padding_bytes = if padding > 0 {
            Some(write::void(padding)?)
        } else {
            None
        };

        // --- compute offsets (relative to the segment payload start) ---

        let mut offset = seek_head_len;
        let info_offset = offset;
        offset += info_bytes.len() as u64;
        let tracks_offset = offset;
        offset += total_len(&tracks_parts);
        let chapters_offset = offset;
        offset += total_len(&chapters_parts);

        let mut tags_offset = 0;
        let mut attachments_offset = 0;
        if tag_position != ElementPosition::AfterData {
            tags_offset = offset;
            offset += total_len(&tags_parts);
            attachments_offset = offset;
            offset += total_len(&attachments_parts);
        }
        // cues before the media data only on request
        let mut cues_offset = 0;
        let cues_len = serialize_cues(&cue_points, 0).len() as u64;
        if index_position == ElementPosition::BeforeData && !cue_points.is_empty() {
            cues_offset = offset;
            offset += cues_len;
        }
        offset += total_len(&unmanaged_before);
        if let Some(bytes) = &padding_bytes {
            offset += bytes.len() as u64;
        }

        let media_offset = offset;
        offset += total_len(&media_parts);

        if index_position != ElementPosition::BeforeData && !cue_points.is_empty() {
            cues_offset = offset;
            offset += cues_len;
        }
        if tag_position == ElementPosition::AfterData {
            tags_offset = offset;
            offset += total_len(&tags_parts);
            attachments_offset = offset;
            offset += total_len(&attachments_parts);
        }
        offset += total_len(&unmanaged_after);
        let segment_payload_len = offset;

        // shift for the cluster positions recorded in the Cues
        let old_media_rel = first_cluster.map(|start| start - segment.data_offset);
        let delta = match old_media_rel {
            Some(old) => media_offset as i64 - old as i64,
            None => 0,
        };

        // --- final SeekHead and Cues with real offsets ---

        let seek_entries: Vec<(u64, u64)> = seek_ids
            .iter()
            .map(|&id| {
                let target = match id {
                    ids::SEGMENT_INFO => info_offset,
                    ids::TRACKS => tracks_offset,
                    ids::CHAPTERS => chapters_offset,
                    ids::TAGS => tags_offset,
                    ids::ATTACHMENTS => attachments_offset,
                    ids::CUES => cues_offset,
                    _ => 0,
                };
                (id, target)
            })
            .collect();
        let seek_head_bytes = serialize_seek_head(&seek_entries);
        debug_assert_eq!(seek_head_bytes.len() as u64, seek_head_len);
        let cues_bytes = serialize_cues(&cue_points, delta);

        // --- write everything out ---

        progress.update_step("writing file");
        dest.write_all(&self.serialize_ebml_header())?;
        let mut segment_header = Vec::new();
        vint::write_id(&mut segment_header, ids::SEGMENT);
        vint::write_size(&mut segment_header, segment_payload_len)?;
        dest.write_all(&segment_header)?;

        let mut write_parts = |dest: &mut ByteStream, parts: &[Part]| -> Result<()> {
            for part in parts {
                progress.try_continue()?;
                match part {
                    Part::Bytes(bytes) => dest.write_all(bytes)?,
                    Part::Copy { offset, len } => {
                        source.seek(*offset)?;
                        source.copy_to(dest, *len, progress)?;
                    }
                }
            }
            Ok(())
        };

        dest.write_all(&seek_head_bytes)?;
        dest.write_all(&info_bytes)?;
        write_parts(dest, &tracks_parts)?;
        write_parts(dest, &chapters_parts)?;
        if tag_position != ElementPosition::AfterData {
            write_parts(dest, &tags_parts)?;
            write_parts(dest, &attachments_parts)?;
        }
        if index_position == ElementPosition::BeforeData && !cue_points.is_empty() {
            dest.write_all(&cues_bytes)?;
        }
        write_parts(dest, &unmanaged_before)?;
        if let Some(bytes) = &padding_bytes {
            dest.write_all(bytes)?;
        }
        write_parts(dest, &media_parts)?;
        if index_position != ElementPosition::BeforeData && !cue_points.is_empty() {
            dest.write_all(&cues_bytes)?;
        }
        if tag_position == ElementPosition::AfterData {
            write_parts(dest, &tags_parts)?;
            write_parts(dest, &attachments_parts)?;
        }
        write_parts(dest, &unmanaged_after)?;
        dest.sync()?;

        tracing::info!(
            segment_payload_len,
            tag_position = tag_position.as_str(),
            index_position = index_position.as_str(),
            padding,
            "rewrote Matroska file"
        );
        Ok(())
    }

    /// Copy parts for every layout entry with the given id, coalescing
    /// adjacent ranges.
    fn copy_parts(&self, id: u64) -> Vec<Part> {
        let mut parts: Vec<Part> = Vec::new();
        for entry in self.layout.iter().filter(|entry| entry.id == id) {
            if let Some(Part::Copy { offset, len }) = parts.last_mut() {
                if *offset + *len == entry.start {
                    *len += entry.len();
                    continue;
                }
            }
            parts.push(Part::Copy {
                offset: entry.start,
                len: entry.len(),
            });
        }
        parts
    }

    /// Level-1 elements this engine neither regenerates nor drops, located
    /// before (or after) the first Cluster.
    fn unmanaged_parts(&self, first_cluster: Option<u64>, before: bool) -> Vec<Part> {
        const MANAGED: [u64; 9] = [
            ids::SEEK_HEAD,
            ids::SEGMENT_INFO,
            ids::TRACKS,
            ids::CLUSTER,
            ids::CUES,
            ids::CHAPTERS,
            ids::ATTACHMENTS,
            ids::TAGS,
            ids::VOID,
        ];
        self.layout
            .iter()
            .filter(|entry| !MANAGED.contains(&entry.id) && entry.id != ids::CRC32)
            .filter(|entry| match first_cluster {
                Some(cluster) => (entry.start < cluster) == before,
                None => before,
            })
            .map(|entry| Part::Copy {
                offset: entry.start,
                len: entry.len(),
            })
            .collect()
    }

    fn serialize_ebml_header(&self) -> Vec<u8> {
        let doc_type = if self.doc_type.is_empty() {
            "matroska"
        } else {
            &self.doc_type
        };
        let mut payload = Vec::new();
        payload.extend_from_slice(&write::uint_element(ids::EBML_VERSION, 1));
        payload.extend_from_slice(&write::uint_element(ids::EBML_READ_VERSION, 1));
        payload.extend_from_slice(&write::uint_element(
            ids::EBML_MAX_ID_LENGTH,
            self.max_id_length,
        ));
        payload.extend_from_slice(&write::uint_element(
            ids::EBML_MAX_SIZE_LENGTH,
            self.max_size_length,
        ));
        payload.extend_from_slice(&write::string_element(ids::DOC_TYPE, doc_type));
        payload.extend_from_slice(&write::uint_element(
            ids::DOC_TYPE_VERSION,
            self.doc_type_version,
        ));
        payload.extend_from_slice(&write::uint_element(
            ids::DOC_TYPE_READ_VERSION,
            self.doc_type_version.min(2),
        ));
        write::master(ids::EBML, &payload)
    }

    fn serialize_info(&self, settings: &SaveSettings) -> Vec<u8> {
        let writing_app = settings
            .writing_application
            .as_deref()
            .unwrap_or(&self.writing_app);
        let mut payload = Vec::new();
        payload.extend_from_slice(&write::uint_element(
            ids::TIMESTAMP_SCALE,
            self.timestamp_scale,
        ));
        payload.extend_from_slice(&write::string_element(ids::MUXING_APP, &self.muxing_app));
        payload.extend_from_slice(&write::string_element(ids::WRITING_APP, writing_app));
        if let Some(duration) = self.duration_raw {
            payload.extend_from_slice(&write::float_element(ids::DURATION, duration));
        }
        if let Some(title) = &self.title {
            payload.extend_from_slice(&write::string_element(ids::TITLE, title));
        }
        payload.extend_from_slice(&self.info_extra);
        write::master(ids::SEGMENT_INFO, &payload)
    }

    /// Serializes all tags as a `Tags` element; empty when no tag has any
    /// serializable content.
    pub(super) fn serialize_tags(&self, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        for tag in &self.tags {
            let mut tag_payload = Vec::new();
            let target = tag.target();
            let mut targets_payload = Vec::new();
            if target.level > 0 {
                targets_payload
                    .extend_from_slice(&write::uint_element(ids::TARGET_TYPE_VALUE, target.level));
            }
            for uid in &target.track_uids {
                targets_payload.extend_from_slice(&write::uint_element(ids::TAG_TRACK_UID, *uid));
            }
            tag_payload.extend_from_slice(&write::master(ids::TARGETS, &targets_payload));

            let mut any_field = false;
            for field in tag.fields() {
                if let Some(bytes) = make_simple_tag(field, diag) {
                    tag_payload.extend_from_slice(&bytes);
                    any_field = true;
                }
            }
            if any_field {
                payload.extend_from_slice(&write::master(ids::TAG, &tag_payload));
            }
        }
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        Ok(write::master(ids::TAGS, &payload))
    }

    fn serialize_attachments(
        &self,
        source: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        for (index, attachment) in self.attachments.iter().enumerate() {
            if attachment.ignored || attachment.is_empty() {
                continue;
            }
            let mut file_payload = Vec::new();
            if !attachment.description.is_empty() {
                file_payload.extend_from_slice(&write::string_element(
                    ids::FILE_DESCRIPTION,
                    &attachment.description,
                ));
            }
            file_payload
                .extend_from_slice(&write::string_element(ids::FILE_NAME, &attachment.name));
            file_payload.extend_from_slice(&write::string_element(
                ids::FILE_MIME_TYPE,
                &attachment.mime_type,
            ));
            let uid = if attachment.uid != 0 {
                attachment.uid
            } else {
                index as u64 + 1
            };
            file_payload.extend_from_slice(&write::uint_element(ids::FILE_UID, uid));
            let data = match &attachment.data {
                AttachmentData::Buffer(data) => data.clone(),
                AttachmentData::FileRange { offset, size } => {
                    source.seek(*offset)?;
                    source.read_bytes(*size)?
                }
            };
            file_payload.extend_from_slice(&write::binary_element(ids::FILE_DATA, &data));
            payload.extend_from_slice(&write::master(ids::ATTACHED_FILE, &file_payload));
        }
        if payload.is_empty() {
            diag.add(
                DiagLevel::Debug,
                "No attachments to write.",
                CONTEXT,
            );
            return Ok(Vec::new());
        }
        Ok(write::master(ids::ATTACHMENTS, &payload))
    }

    /// Parses the Cues into a shiftable structure. Unreadable cues degrade
    /// to a warning and are dropped.
    fn read_cues(
        &mut self,
        source: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<Vec<CuePoint>> {
        use crate::ebml::element::ElementTree;

        let ranges: Vec<LayoutEntry> = self
            .layout
            .iter()
            .copied()
            .filter(|entry| entry.id == ids::CUES)
            .collect();
        let mut points = Vec::new();
        for range in ranges {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(root) = tree.read_root(source, range.start, range.end)? else {
                continue;
            };
            let children = match tree.parse_children(source, root) {
                Ok(children) => children,
                Err(err) => {
                    diag.add(
                        DiagLevel::Warning,
                        format!("Cannot read the Cues ({err}); dropping the index."),
                        CONTEXT,
                    );
                    return Ok(Vec::new());
                }
            };
            for point_idx in children {
                if tree.node(point_idx).id != ids::CUE_POINT {
                    continue;
                }
                let mut point = CuePoint {
                    time: None,
                    extras: Vec::new(),
                    positions: Vec::new(),
                };
                for child in tree.parse_children(source, point_idx)? {
                    match tree.node(child).id {
                        ids::CUE_TIME => point.time = Some(tree.read_uint(source, child)?),
                        ids::CUE_TRACK_POSITIONS => {
                            let mut position = CueTrackPosition {
                                track: None,
                                cluster_position: None,
                                extras: Vec::new(),
                            };
                            for grandchild in tree.parse_children(source, child)? {
                                match tree.node(grandchild).id {
                                    ids::CUE_TRACK => {
                                        position.track =
                                            Some(tree.read_uint(source, grandchild)?);
                                    }
                                    ids::CUE_CLUSTER_POSITION => {
                                        position.cluster_position =
                                            Some(tree.read_uint(source, grandchild)?);
                                    }
                                    _ => {
                                        let raw = tree.read_raw(source, grandchild)?;
                                        position.extras.extend_from_slice(&raw);
                                    }
                                }
                            }
                            point.positions.push(position);
                        }
                        _ => {
                            let raw = tree.read_raw(source, child)?;
                            point.extras.extend_from_slice(&raw);
                        }
                    }
                }
                points.push(point);
            }
        }
        Ok(points)
    }
}

fn resolve_position(requested: ElementPosition, current: ElementPosition) -> ElementPosition {
    match requested {
        ElementPosition::Keep => match current {
            ElementPosition::Keep => ElementPosition::BeforeData,
            position => position,
        },
        position => position,
    }
}

fn total_len(parts: &[Part]) -> u64 {
    parts.iter().map(Part::len).sum()
}

/// SeekHead with fixed 8-byte positions so the size is offset-independent.
fn serialize_seek_head(entries: &[(u64, u64)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, position) in entries {
        let mut id_bytes = Vec::new();
        vint::write_id(&mut id_bytes, *id);
        let mut seek_payload = Vec::new();
        seek_payload.extend_from_slice(&write::binary_element(ids::SEEK_ID, &id_bytes));
        seek_payload.extend_from_slice(&write::uint_element_fixed(ids::SEEK_POSITION, *position));
        payload.extend_from_slice(&write::master(ids::SEEK, &seek_payload));
    }
    write::master(ids::SEEK_HEAD, &payload)
}

/// Cues with every cluster position shifted by `delta`. Positions are
/// written as fixed 8-byte integers so the output size does not depend on
/// the shift.
fn serialize_cues(points: &[CuePoint], delta: i64) -> Vec<u8> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut payload = Vec::new();
    for point in points {
        let mut point_payload = Vec::new();
        if let Some(time) = point.time {
            point_payload.extend_from_slice(&write::uint_element_fixed(ids::CUE_TIME, time));
        }
        for position in &point.positions {
            let mut pos_payload = Vec::new();
            if let Some(track) = position.track {
                pos_payload.extend_from_slice(&write::uint_element_fixed(ids::CUE_TRACK, track));
            }
            if let Some(cluster_position) = position.cluster_position {
                let shifted = cluster_position.saturating_add_signed(delta);
                pos_payload.extend_from_slice(&write::uint_element_fixed(
                    ids::CUE_CLUSTER_POSITION,
                    shifted,
                ));
            }
            pos_payload.extend_from_slice(&position.extras);
            point_payload
                .extend_from_slice(&write::master(ids::CUE_TRACK_POSITIONS, &pos_payload));
        }
        point_payload.extend_from_slice(&point.extras);
        payload.extend_from_slice(&write::master(ids::CUE_POINT, &point_payload));
    }
    write::master(ids::CUES, &payload)
}

/// One SimpleTag element for a field; `None` when the field has nothing
/// serializable.
fn make_simple_tag(field: &TagField, diag: &mut Diagnostics) -> Option<Vec<u8>> {
    if field.id.is_empty() || (field.value.is_empty() && field.nested.is_empty()) {
        return None;
    }
    let mut payload = Vec::new();
    payload.extend_from_slice(&write::string_element(ids::TAG_NAME, &field.id));
    payload.extend_from_slice(&write::string_element(
        ids::TAG_LANGUAGE,
        field.type_info.as_deref().unwrap_or("und"),
    ));
    match &field.value {
        TagValue::Empty => {}
        TagValue::Binary(data) => {
            payload.extend_from_slice(&write::binary_element(ids::TAG_BINARY, data));
        }
        TagValue::Picture(picture) => {
            payload.extend_from_slice(&write::binary_element(ids::TAG_BINARY, &picture.data));
        }
        value => match value.to_display_string() {
            Ok(text) => {
                payload.extend_from_slice(&write::string_element(ids::TAG_STRING, &text));
            }
            Err(_) => {
                diag.add(
                    DiagLevel::Warning,
                    format!(
                        "Value of simple tag \"{}\" cannot be rendered; omitting it.",
                        field.id
                    ),
                    CONTEXT,
                );
                return None;
            }
        },
    }
    for nested in &field.nested {
        if let Some(bytes) = make_simple_tag(nested, diag) {
            payload.extend_from_slice(&bytes);
        }
    }
    Some(write::master(ids::SIMPLE_TAG, &payload))
}
