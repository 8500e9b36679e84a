//! The Matroska/WebM container engine.
//!
//! The engine walks the EBML element tree lazily: the header walk reads the
//! EBML header, segment info and every SeekHead, and pauses at the first
//! Cluster. Facet parsing (tags, tracks, chapters, attachments) first
//! consults the recorded layout, then the merged SeekHead index, and only
//! falls back to a linear scan past the clusters when the file is small
//! enough (or a full parse is forced).

mod tag;
mod write;

pub use tag::MatroskaTag;

use std::time::Duration;

use tagweave_model::{
    AbortableProgressFeedback, Attachment, AttachmentData, Chapter, ChapterLabel, DiagLevel,
    Diagnostics, ElementPosition, MediaFormat, ParsingStatus, Result, Tag, TagError, TagField,
    TagTarget, TagValue, Track,
};

use crate::container::{Container, Facet};
use crate::ebml::element::{ElementIdx, ElementTree};
use crate::ebml::{ids, vint, DEFAULT_MAX_ID_LENGTH, DEFAULT_MAX_SIZE_LENGTH};
use crate::io::ByteStream;
use crate::settings::{ParseOptions, SaveSettings};

const CONTEXT_HEADER: &str = "parsing Matroska header";
const CONTEXT_TAGS: &str = "parsing Matroska tags";
const CONTEXT_TRACKS: &str = "parsing Matroska tracks";
const CONTEXT_CHAPTERS: &str = "parsing Matroska chapters";
const CONTEXT_ATTACHMENTS: &str = "parsing Matroska attachments";
const CONTEXT_INDEX: &str = "validating Matroska seek index";

/// Ids that may occur as level-1 children of a Segment.
const LEVEL1_IDS: [u64; 8] = [
    ids::SEEK_HEAD,
    ids::SEGMENT_INFO,
    ids::TRACKS,
    ids::CLUSTER,
    ids::CUES,
    ids::CHAPTERS,
    ids::ATTACHMENTS,
    ids::TAGS,
];

/// Payload range of the first Segment element.
#[derive(Debug, Clone, Copy)]
struct SegmentRange {
    data_offset: u64,
    data_end: u64,
}

/// One level-1 element as recorded by the layout scan.
#[derive(Debug, Clone, Copy)]
struct LayoutEntry {
    id: u64,
    start: u64,
    end: u64,
}

impl LayoutEntry {
    fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// A SeekHead entry: element id mapped to its absolute file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    pub id: u64,
    pub offset: u64,
}

/// Matroska container engine.
#[derive(Debug)]
pub struct MatroskaContainer {
    start_offset: u64,
    options: ParseOptions,

    doc_type: String,
    doc_type_version: u64,
    max_id_length: u64,
    max_size_length: u64,

    timestamp_scale: u64,
    duration_raw: Option<f64>,
    title: Option<String>,
    muxing_app: String,
    writing_app: String,
    /// Raw bytes of Info children this engine does not model (segment UID,
    /// creation date, ...), preserved verbatim on rewrite.
    info_extra: Vec<u8>,
    info_parsed: bool,

    segment: Option<SegmentRange>,
    segment_count: usize,
    seek_info: Vec<SeekEntry>,

    layout: Vec<LayoutEntry>,
    scan_pos: u64,
    layout_complete: bool,
    first_cluster: Option<u64>,
    padding: u64,

    header_status: ParsingStatus,
    tags_status: ParsingStatus,
    tracks_status: ParsingStatus,
    chapters_status: ParsingStatus,
    attachments_status: ParsingStatus,

    tags: Vec<MatroskaTag>,
    tracks: Vec<Track>,
    chapters: Vec<Chapter>,
    attachments: Vec<Attachment>,
}

impl MatroskaContainer {
    pub fn new(start_offset: u64, options: ParseOptions) -> Self {
        Self {
            start_offset,
            options,
            doc_type: String::new(),
            doc_type_version: 1,
            max_id_length: DEFAULT_MAX_ID_LENGTH,
            max_size_length: DEFAULT_MAX_SIZE_LENGTH,
            timestamp_scale: 1_000_000,
            duration_raw: None,
            title: None,
            muxing_app: String::new(),
            writing_app: String::new(),
            info_extra: Vec::new(),
            info_parsed: false,
            segment: None,
            segment_count: 0,
            seek_info: Vec::new(),
            layout: Vec::new(),
            scan_pos: 0,
            layout_complete: false,
            first_cluster: None,
            padding: 0,
            header_status: ParsingStatus::NotParsedYet,
            tags_status: ParsingStatus::NotParsedYet,
            tracks_status: ParsingStatus::NotParsedYet,
            chapters_status: ParsingStatus::NotParsedYet,
            attachments_status: ParsingStatus::NotParsedYet,
            tags: Vec::new(),
            tracks: Vec::new(),
            chapters: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Whether the doctype declares a WebM file.
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    pub fn max_id_length(&self) -> u64 {
        self.max_id_length
    }

    pub fn max_size_length(&self) -> u64 {
        self.max_size_length
    }

    pub fn seek_info(&self) -> &[SeekEntry] {
        &self.seek_info
    }

    /// Total padding (Void elements) observed before the first Cluster.
    pub fn padding(&self) -> u64 {
        self.padding
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_raw
            .map(|raw| Duration::from_nanos((raw * self.timestamp_scale as f64) as u64))
    }

    /// Cross-checks every SeekHead entry against the element actually
    /// present at the target offset. Mismatches are reported as warnings
    /// and are non-fatal.
    pub fn validate_index(&self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        for entry in &self.seek_info {
            stream.seek(entry.offset)?;
            match vint::read_id(stream, self.max_id_length) {
                Ok((actual, _)) if actual == entry.id => {}
                Ok((actual, _)) => diag.add(
                    DiagLevel::Warning,
                    format!(
                        "SeekHead claims element 0x{:X} at offset {}, but 0x{actual:X} is present.",
                        entry.id, entry.offset
                    ),
                    CONTEXT_INDEX,
                ),
                Err(_) => diag.add(
                    DiagLevel::Warning,
                    format!(
                        "SeekHead points to offset {} where no element can be read.",
                        entry.offset
                    ),
                    CONTEXT_INDEX,
                ),
            }
        }
        Ok(())
    }

    /// Position of the level-1 element `id` relative to the Cluster region.
    pub fn determine_element_position(&self, id: u64) -> ElementPosition {
        let Some(first_cluster) = self.first_cluster else {
            return ElementPosition::Keep;
        };
        match self.layout.iter().find(|entry| entry.id == id) {
            Some(entry) if entry.start < first_cluster => ElementPosition::BeforeData,
            Some(_) => ElementPosition::AfterData,
            None => match self.seek_info.iter().find(|entry| entry.id == id) {
                Some(entry) if entry.offset < first_cluster => ElementPosition::BeforeData,
                Some(_) => ElementPosition::AfterData,
                None => ElementPosition::Keep,
            },
        }
    }

    // ---------------------------------------------------------------
    // header walk
    // ---------------------------------------------------------------

    fn parse_header_inner(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let file_end = stream.len();
        let mut tree = ElementTree::new(DEFAULT_MAX_ID_LENGTH, DEFAULT_MAX_SIZE_LENGTH);
        let Some(root) = tree.read_root(stream, self.start_offset, file_end)? else {
            return Err(TagError::NoDataFound);
        };
        if tree.node(root).id != ids::EBML {
            diag.add(
                DiagLevel::Critical,
                "File does not start with an EBML header.",
                CONTEXT_HEADER,
            );
            return Err(TagError::InvalidData("missing EBML header".into()));
        }
        self.read_ebml_header(stream, &mut tree, root, diag)?;

        // top-level walk: locate the Segment(s)
        let mut pos = tree.node(root).data_end;
        let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
        while let Some(idx) = tree.read_root(stream, pos, file_end)? {
            let node = tree.node(idx).clone();
            match node.id {
                ids::SEGMENT => {
                    self.segment_count += 1;
                    if self.segment.is_none() {
                        self.segment = Some(SegmentRange {
                            data_offset: node.data_offset(),
                            data_end: node.data_end,
                        });
                    }
                }
                ids::VOID | ids::CRC32 => {}
                other => diag.add(
                    DiagLevel::Information,
                    format!("Skipping unexpected top-level element 0x{other:X}."),
                    CONTEXT_HEADER,
                ),
            }
            pos = node.data_end;
        }
        let Some(segment) = self.segment else {
            diag.add(DiagLevel::Critical, "No Segment element found.", CONTEXT_HEADER);
            return Err(TagError::NoDataFound);
        };
        self.scan_pos = segment.data_offset;

        // level-1 walk up to the first Cluster (or the very end when a full
        // parse is forced)
        self.scan_layout(stream, diag, self.options.force_full_parse)?;
        tracing::info!(
            doc_type = %self.doc_type,
            segments = self.segment_count,
            seek_entries = self.seek_info.len(),
            "parsed Matroska header"
        );
        Ok(ParsingStatus::Ok)
    }

    fn read_ebml_header(
        &mut self,
        stream: &mut ByteStream,
        tree: &mut ElementTree,
        root: ElementIdx,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        for child in tree.parse_children(stream, root)? {
            match tree.node(child).id {
                ids::DOC_TYPE => self.doc_type = tree.read_string(stream, child)?,
                ids::DOC_TYPE_VERSION => self.doc_type_version = tree.read_uint(stream, child)?,
                ids::EBML_MAX_ID_LENGTH => self.max_id_length = tree.read_uint(stream, child)?,
                ids::EBML_MAX_SIZE_LENGTH => {
                    self.max_size_length = tree.read_uint(stream, child)?
                }
                _ => {}
            }
        }
        if !(1..=8).contains(&self.max_id_length) || !(1..=8).contains(&self.max_size_length) {
            diag.add(
                DiagLevel::Critical,
                format!(
                    "EBML header declares unusable length limits (id {}, size {}).",
                    self.max_id_length, self.max_size_length
                ),
                CONTEXT_HEADER,
            );
            return Err(TagError::InvalidData("unusable EBML length limits".into()));
        }
        Ok(())
    }

    /// Continues the level-1 scan from where it last stopped. With
    /// `through_clusters` the scan runs to the end of the Segment;
    /// otherwise it pauses after recording the first Cluster.
    fn scan_layout(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
        through_clusters: bool,
    ) -> Result<()> {
        if self.layout_complete {
            return Ok(());
        }
        let Some(segment) = self.segment else {
            return Ok(());
        };
        let mut pos = self.scan_pos;
        while pos < segment.data_end {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(idx) = tree.read_root(stream, pos, segment.data_end)? else {
                break;
            };
            let node = tree.node(idx).clone();
            let end = if node.data_size.is_none() && node.id == ids::CLUSTER {
                self.resolve_unknown_cluster_end(stream, node.data_offset(), segment.data_end)?
            } else {
                node.data_end
            };

            match node.id {
                ids::SEEK_HEAD => self.parse_seek_head(stream, &mut tree, idx, diag)?,
                ids::SEGMENT_INFO if !self.info_parsed => {
                    self.parse_segment_info(stream, &mut tree, idx)?;
                    self.info_parsed = true;
                }
                ids::VOID if self.first_cluster.is_none() => {
                    self.padding += end - node.start_offset;
                }
                ids::CLUSTER if self.first_cluster.is_none() => {
                    self.first_cluster = Some(node.start_offset);
                }
                id if !LEVEL1_IDS.contains(&id)
                    && id != ids::VOID
                    && id != ids::CRC32
                    && id != ids::SEGMENT_INFO =>
                {
                    diag.add(
                        DiagLevel::Information,
                        format!("Skipping unknown level-1 element 0x{id:X} at offset {pos}."),
                        CONTEXT_HEADER,
                    );
                }
                _ => {}
            }

            self.layout.push(LayoutEntry {
                id: node.id,
                start: node.start_offset,
                end,
            });
            pos = end;
            self.scan_pos = pos;
            if node.id == ids::CLUSTER && !through_clusters {
                return Ok(());
            }
        }
        self.layout_complete = true;
        Ok(())
    }

    /// Finds where an unknown-length Cluster ends: at the next element
    /// whose id is a known level-1 id, or at the Segment end.
    fn resolve_unknown_cluster_end(
        &self,
        stream: &mut ByteStream,
        mut pos: u64,
        bound: u64,
    ) -> Result<u64> {
        while pos < bound {
            stream.seek(pos)?;
            let Ok((id, id_len)) = vint::read_id(stream, self.max_id_length) else {
                return Ok(bound);
            };
            if LEVEL1_IDS.contains(&id) {
                return Ok(pos);
            }
            let Ok((size, size_len)) = vint::read_size(stream, self.max_size_length) else {
                return Ok(bound);
            };
            let Some(size) = size else {
                return Ok(bound);
            };
            pos += u64::from(id_len) + u64::from(size_len) + size;
        }
        Ok(bound)
    }

    fn parse_seek_head(
        &mut self,
        stream: &mut ByteStream,
        tree: &mut ElementTree,
        head: ElementIdx,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let Some(segment) = self.segment else {
            return Ok(());
        };
        for seek in tree.parse_children(stream, head)? {
            if tree.node(seek).id != ids::SEEK {
                continue;
            }
            let mut id = None;
            let mut position = None;
            for child in tree.parse_children(stream, seek)? {
                match tree.node(child).id {
                    ids::SEEK_ID => id = Some(tree.read_uint(stream, child)?),
                    ids::SEEK_POSITION => position = Some(tree.read_uint(stream, child)?),
                    _ => {}
                }
            }
            let (Some(id), Some(position)) = (id, position) else {
                diag.add(
                    DiagLevel::Warning,
                    "Incomplete Seek entry; skipping it.",
                    CONTEXT_HEADER,
                );
                continue;
            };
            let offset = segment.data_offset + position;
            match self.seek_info.iter().find(|entry| entry.id == id) {
                // the first structurally valid entry for an id wins
                Some(existing) if existing.offset != offset => diag.add(
                    DiagLevel::Warning,
                    format!(
                        "SeekHeads disagree about element 0x{id:X} ({} vs {offset}); keeping the first entry.",
                        existing.offset
                    ),
                    CONTEXT_HEADER,
                ),
                Some(_) => {}
                None => self.seek_info.push(SeekEntry { id, offset }),
            }
        }
        Ok(())
    }

    fn parse_segment_info(
        &mut self,
        stream: &mut ByteStream,
        tree: &mut ElementTree,
        info: ElementIdx,
    ) -> Result<()> {
        for child in tree.parse_children(stream, info)? {
            match tree.node(child).id {
                ids::TIMESTAMP_SCALE => {
                    let scale = tree.read_uint(stream, child)?;
                    if scale > 0 {
                        self.timestamp_scale = scale;
                    }
                }
                ids::DURATION => self.duration_raw = Some(tree.read_float(stream, child)?),
                ids::TITLE => self.title = Some(tree.read_string(stream, child)?),
                ids::MUXING_APP => self.muxing_app = tree.read_string(stream, child)?,
                ids::WRITING_APP => self.writing_app = tree.read_string(stream, child)?,
                ids::CRC32 | ids::VOID => {}
                _ => {
                    let raw = tree.read_raw(stream, child)?;
                    self.info_extra.extend_from_slice(&raw);
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // facet location
    // ---------------------------------------------------------------

    /// Locates every level-1 element with the given id. Returns `None`
    /// when the element could not be searched for exhaustively (no index
    /// and the file exceeds the full-parse bound).
    fn locate_facet(
        &mut self,
        stream: &mut ByteStream,
        id: u64,
        diag: &mut Diagnostics,
    ) -> Result<Option<Vec<LayoutEntry>>> {
        let found: Vec<LayoutEntry> = self
            .layout
            .iter()
            .copied()
            .filter(|entry| entry.id == id)
            .collect();
        if !found.is_empty() || self.layout_complete {
            return Ok(Some(found));
        }

        // jump via the SeekHead index
        if let Some(entry) = self.seek_info.iter().find(|entry| entry.id == id).copied() {
            let segment = self.segment.expect("segment exists when seek info does");
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            if let Some(idx) = tree.read_root(stream, entry.offset, segment.data_end)? {
                let node = tree.node(idx);
                if node.id == id {
                    return Ok(Some(vec![LayoutEntry {
                        id,
                        start: node.start_offset,
                        end: node.data_end,
                    }]));
                }
                diag.add(
                    DiagLevel::Warning,
                    format!(
                        "SeekHead entry for element 0x{id:X} points at element 0x{:X}; ignoring it.",
                        node.id
                    ),
                    CONTEXT_HEADER,
                );
            }
        }

        // linear scan past the clusters, when permitted
        if self.options.force_full_parse || stream.len() <= self.options.max_full_parse_size {
            self.scan_layout(stream, diag, true)?;
            return Ok(Some(
                self.layout
                    .iter()
                    .copied()
                    .filter(|entry| entry.id == id)
                    .collect(),
            ));
        }
        Ok(None)
    }

    fn not_supported_diag(diag: &mut Diagnostics, what: &str, context: &'static str) {
        diag.add(
            DiagLevel::Information,
            format!(
                "No SeekHead entry points to the {what} and the file is too large for a full scan; \
                 the {what} cannot be located."
            ),
            context,
        );
    }

    // ---------------------------------------------------------------
    // facet content
    // ---------------------------------------------------------------

    fn parse_tags_inner(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let Some(ranges) = self.locate_facet(stream, ids::TAGS, diag)? else {
            Self::not_supported_diag(diag, "tag information", CONTEXT_TAGS);
            return Ok(ParsingStatus::NotSupported);
        };
        for range in ranges {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(root) = tree.read_root(stream, range.start, range.end)? else {
                continue;
            };
            for child in tree.parse_children(stream, root)? {
                if tree.node(child).id == ids::TAG {
                    let tag = parse_tag_element(&mut tree, stream, child, diag)?;
                    self.tags.push(tag);
                }
            }
        }
        tracing::debug!(count = self.tags.len(), "parsed Matroska tags");
        Ok(ParsingStatus::Ok)
    }

    fn parse_tracks_inner(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let Some(ranges) = self.locate_facet(stream, ids::TRACKS, diag)? else {
            Self::not_supported_diag(diag, "track information", CONTEXT_TRACKS);
            return Ok(ParsingStatus::NotSupported);
        };
        let duration = self.duration();
        for range in ranges {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(root) = tree.read_root(stream, range.start, range.end)? else {
                continue;
            };
            for child in tree.parse_children(stream, root)? {
                if tree.node(child).id == ids::TRACK_ENTRY {
                    let mut track = parse_track_entry(&mut tree, stream, child, diag)?;
                    if let Some(duration) = duration {
                        track.duration = duration;
                    }
                    self.tracks.push(track);
                }
            }
        }
        tracing::debug!(count = self.tracks.len(), "parsed Matroska tracks");
        Ok(ParsingStatus::Ok)
    }

    fn parse_chapters_inner(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let Some(ranges) = self.locate_facet(stream, ids::CHAPTERS, diag)? else {
            Self::not_supported_diag(diag, "chapter information", CONTEXT_CHAPTERS);
            return Ok(ParsingStatus::NotSupported);
        };
        for range in ranges {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(root) = tree.read_root(stream, range.start, range.end)? else {
                continue;
            };
            for edition in tree.parse_children(stream, root)? {
                if tree.node(edition).id != ids::EDITION_ENTRY {
                    continue;
                }
                for child in tree.parse_children(stream, edition)? {
                    if tree.node(child).id == ids::CHAPTER_ATOM {
                        let chapter = parse_chapter_atom(&mut tree, stream, child, 0, diag)?;
                        self.chapters.push(chapter);
                    }
                }
            }
        }
        tracing::debug!(count = self.chapters.len(), "parsed Matroska chapters");
        Ok(ParsingStatus::Ok)
    }

    fn parse_attachments_inner(
        &mut self,
        stream: &mut ByteStream,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let Some(ranges) = self.locate_facet(stream, ids::ATTACHMENTS, diag)? else {
            Self::not_supported_diag(diag, "attachments", CONTEXT_ATTACHMENTS);
            return Ok(ParsingStatus::NotSupported);
        };
        for range in ranges {
            let mut tree = ElementTree::new(self.max_id_length, self.max_size_length);
            let Some(root) = tree.read_root(stream, range.start, range.end)? else {
                continue;
            };
            for child in tree.parse_children(stream, root)? {
                if tree.node(child).id == ids::ATTACHED_FILE {
                    let attachment = parse_attached_file(&mut tree, stream, child)?;
                    self.attachments.push(attachment);
                }
            }
        }
        tracing::debug!(count = self.attachments.len(), "parsed Matroska attachments");
        Ok(ParsingStatus::Ok)
    }

    fn guard_header(&self) -> Result<()> {
        if self.header_status != ParsingStatus::Ok {
            return Err(TagError::InvalidData(
                "the container header has not been parsed successfully".into(),
            ));
        }
        Ok(())
    }

    fn run_facet(
        status: &mut ParsingStatus,
        context: &'static str,
        diag: &mut Diagnostics,
        outcome: Result<ParsingStatus>,
    ) -> Result<()> {
        match outcome {
            Ok(new_status) => {
                *status = new_status;
                Ok(())
            }
            Err(err) => {
                *status = ParsingStatus::CriticalFailure;
                diag.add(DiagLevel::Critical, err.to_string(), context);
                Err(err)
            }
        }
    }
}

impl Container for MatroskaContainer {
    fn parse_header(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        if self.header_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        let outcome = self.parse_header_inner(stream, diag);
        let mut status = self.header_status;
        let result = Self::run_facet(&mut status, CONTEXT_HEADER, diag, outcome);
        self.header_status = status;
        result
    }

    fn parse_tags(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        if self.tags_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.guard_header()?;
        let outcome = self.parse_tags_inner(stream, diag);
        let mut status = self.tags_status;
        let result = Self::run_facet(&mut status, CONTEXT_TAGS, diag, outcome);
        self.tags_status = status;
        result
    }

    fn parse_tracks(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        if self.tracks_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.guard_header()?;
        let outcome = self.parse_tracks_inner(stream, diag);
        let mut status = self.tracks_status;
        let result = Self::run_facet(&mut status, CONTEXT_TRACKS, diag, outcome);
        self.tracks_status = status;
        result
    }

    fn parse_chapters(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        if self.chapters_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.guard_header()?;
        let outcome = self.parse_chapters_inner(stream, diag);
        let mut status = self.chapters_status;
        let result = Self::run_facet(&mut status, CONTEXT_CHAPTERS, diag, outcome);
        self.chapters_status = status;
        result
    }

    fn parse_attachments(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()> {
        if self.attachments_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.guard_header()?;
        let outcome = self.parse_attachments_inner(stream, diag);
        let mut status = self.attachments_status;
        let result = Self::run_facet(&mut status, CONTEXT_ATTACHMENTS, diag, outcome);
        self.attachments_status = status;
        result
    }

    fn parsing_status(&self, facet: Facet) -> ParsingStatus {
        match facet {
            Facet::Header => self.header_status,
            Facet::Tags => self.tags_status,
            Facet::Tracks => self.tracks_status,
            Facet::Chapters => self.chapters_status,
            Facet::Attachments => self.attachments_status,
        }
    }

    fn tags(&self) -> Vec<&dyn Tag> {
        self.tags.iter().map(|tag| tag as &dyn Tag).collect()
    }

    fn tags_mut(&mut self) -> Vec<&mut dyn Tag> {
        self.tags.iter_mut().map(|tag| tag as &mut dyn Tag).collect()
    }

    fn create_tag(&mut self) -> &mut dyn Tag {
        self.tags.push(MatroskaTag::new());
        self.tags.last_mut().expect("just pushed")
    }

    fn remove_all_tags(&mut self) {
        self.tags.clear();
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    fn attachment(&self, index: usize) -> Option<&Attachment> {
        self.attachments.get(index)
    }

    fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    fn create_attachment(&mut self) -> &mut Attachment {
        self.attachments.push(Attachment::default());
        self.attachments.last_mut().expect("just pushed")
    }

    fn supports_title(&self) -> bool {
        true
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn set_title(&mut self, title: &str) -> bool {
        self.title = Some(title.to_owned());
        true
    }

    fn segment_count(&self) -> usize {
        self.segment_count
    }

    fn detected_padding(&self) -> u64 {
        self.padding
    }

    fn determine_tag_position(&self, _diag: &mut Diagnostics) -> ElementPosition {
        self.determine_element_position(ids::TAGS)
    }

    fn determine_index_position(&self, _diag: &mut Diagnostics) -> ElementPosition {
        self.determine_element_position(ids::CUES)
    }

    fn try_splice(
        &mut self,
        stream: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool> {
        self.try_splice_impl(stream, settings, diag, progress)
    }

    fn make_file(
        &mut self,
        source: &mut ByteStream,
        dest: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        self.make_file_impl(source, dest, settings, diag, progress)
    }

    fn reset(&mut self) {
        let start_offset = self.start_offset;
        let options = self.options;
        *self = Self::new(start_offset, options);
    }
}

// -------------------------------------------------------------------
// free parsing helpers
// -------------------------------------------------------------------

fn parse_tag_element(
    tree: &mut ElementTree,
    stream: &mut ByteStream,
    tag_idx: ElementIdx,
    diag: &mut Diagnostics,
) -> Result<MatroskaTag> {
    let mut target = TagTarget::default();
    let mut tag = MatroskaTag::new();
    for child in tree.parse_children(stream, tag_idx)? {
        match tree.node(child).id {
            ids::TARGETS => {
                for entry in tree.parse_children(stream, child)? {
                    match tree.node(entry).id {
                        ids::TARGET_TYPE_VALUE => {
                            target.level = tree.read_uint(stream, entry)?;
                        }
                        ids::TAG_TRACK_UID => {
                            target.track_uids.push(tree.read_uint(stream, entry)?);
                        }
                        _ => {}
                    }
                }
            }
            ids::SIMPLE_TAG => {
                let field = parse_simple_tag(tree, stream, child, 0, diag)?;
                tag.fields_mut().insert(field);
            }
            _ => {}
        }
    }
    tag.set_target(target);
    Ok(tag)
}

fn parse_simple_tag(
    tree: &mut ElementTree,
    stream: &mut ByteStream,
    simple_idx: ElementIdx,
    depth: usize,
    diag: &mut Diagnostics,
) -> Result<TagField> {
    let mut field = TagField::default();
    for child in tree.parse_children(stream, simple_idx)? {
        match tree.node(child).id {
            ids::TAG_NAME => field.id = tree.read_string(stream, child)?,
            ids::TAG_STRING => {
                field.value = TagValue::text(tree.read_string(stream, child)?);
            }
            ids::TAG_BINARY => {
                if matches!(field.value, TagValue::Empty) {
                    field.value = TagValue::Binary(tree.read_binary(stream, child)?);
                }
            }
            ids::TAG_LANGUAGE => {
                let language = tree.read_string(stream, child)?;
                if !language.is_empty() && language != "und" {
                    field.type_info = Some(language);
                }
            }
            ids::SIMPLE_TAG => {
                if depth >= 8 {
                    diag.add(
                        DiagLevel::Warning,
                        "Simple tags nested deeper than 8 levels; ignoring the excess.",
                        CONTEXT_TAGS,
                    );
                    continue;
                }
                let nested = parse_simple_tag(tree, stream, child, depth + 1, diag)?;
                field.nested.push(nested);
            }
            _ => {}
        }
    }
    Ok(field)
}

fn parse_track_entry(
    tree: &mut ElementTree,
    stream: &mut ByteStream,
    entry_idx: ElementIdx,
    diag: &mut Diagnostics,
) -> Result<Track> {
    let mut track = Track {
        enabled: true,
        ..Track::default()
    };
    for child in tree.parse_children(stream, entry_idx)? {
        match tree.node(child).id {
            ids::TRACK_NUMBER => track.id = tree.read_uint(stream, child)?,
            ids::TRACK_TYPE => {
                track.media_type = match tree.read_uint(stream, child)? {
                    1 => tagweave_model::MediaType::Video,
                    2 => tagweave_model::MediaType::Audio,
                    17 => tagweave_model::MediaType::Subtitles,
                    other => {
                        diag.add(
                            DiagLevel::Debug,
                            format!("Track type {other} is not interpreted."),
                            CONTEXT_TRACKS,
                        );
                        tagweave_model::MediaType::Unknown
                    }
                };
            }
            ids::CODEC_ID => {
                let codec = tree.read_string(stream, child)?;
                track.format = codec_id_to_format(&codec);
            }
            ids::TRACK_NAME => track.name = Some(tree.read_string(stream, child)?),
            ids::TRACK_LANGUAGE => {
                let language = tree.read_string(stream, child)?;
                if !language.is_empty() {
                    track.language = Some(language);
                }
            }
            ids::FLAG_DEFAULT => track.default_track = tree.read_uint(stream, child)? != 0,
            ids::FLAG_ENABLED => track.enabled = tree.read_uint(stream, child)? != 0,
            ids::AUDIO => {
                for audio_child in tree.parse_children(stream, child)? {
                    match tree.node(audio_child).id {
                        ids::SAMPLING_FREQUENCY => {
                            track.sampling_frequency =
                                tree.read_float(stream, audio_child)? as u32;
                        }
                        ids::CHANNELS => {
                            track.channel_count = tree.read_uint(stream, audio_child)? as u16;
                        }
                        ids::BIT_DEPTH => {
                            track.bit_depth = tree.read_uint(stream, audio_child)? as u16;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(track)
}

fn parse_chapter_atom(
    tree: &mut ElementTree,
    stream: &mut ByteStream,
    atom_idx: ElementIdx,
    depth: usize,
    diag: &mut Diagnostics,
) -> Result<Chapter> {
    let mut chapter = Chapter::default();
    for child in tree.parse_children(stream, atom_idx)? {
        match tree.node(child).id {
            ids::CHAPTER_UID => chapter.uid = tree.read_uint(stream, child)?,
            // chapter times are plain nanoseconds, not timestamp-scaled
            ids::CHAPTER_TIME_START => {
                chapter.start = Duration::from_nanos(tree.read_uint(stream, child)?);
            }
            ids::CHAPTER_TIME_END => {
                chapter.end = Some(Duration::from_nanos(tree.read_uint(stream, child)?));
            }
            ids::CHAPTER_FLAG_HIDDEN => chapter.hidden = tree.read_uint(stream, child)? != 0,
            ids::CHAPTER_DISPLAY => {
                let mut text = String::new();
                let mut language = String::from("und");
                for display_child in tree.parse_children(stream, child)? {
                    match tree.node(display_child).id {
                        ids::CHAP_STRING => text = tree.read_string(stream, display_child)?,
                        ids::CHAP_LANGUAGE => {
                            language = tree.read_string(stream, display_child)?
                        }
                        _ => {}
                    }
                }
                chapter.labels.push(ChapterLabel { text, language });
            }
            ids::CHAPTER_ATOM => {
                if depth >= 8 {
                    diag.add(
                        DiagLevel::Warning,
                        "Chapters nested deeper than 8 levels; ignoring the excess.",
                        CONTEXT_CHAPTERS,
                    );
                    continue;
                }
                let nested = parse_chapter_atom(tree, stream, child, depth + 1, diag)?;
                chapter.nested.push(nested);
            }
            _ => {}
        }
    }
    Ok(chapter)
}

fn parse_attached_file(
    tree: &mut ElementTree,
    stream: &mut ByteStream,
    file_idx: ElementIdx,
) -> Result<Attachment> {
    let mut attachment = Attachment::default();
    for child in tree.parse_children(stream, file_idx)? {
        let node = tree.node(child).clone();
        match node.id {
            ids::FILE_NAME => attachment.name = tree.read_string(stream, child)?,
            ids::FILE_MIME_TYPE => attachment.mime_type = tree.read_string(stream, child)?,
            ids::FILE_DESCRIPTION => attachment.description = tree.read_string(stream, child)?,
            ids::FILE_UID => attachment.uid = tree.read_uint(stream, child)?,
            ids::FILE_DATA => {
                attachment.data = AttachmentData::FileRange {
                    offset: node.data_offset(),
                    size: node.payload_len(),
                };
            }
            _ => {}
        }
    }
    Ok(attachment)
}

/// Maps a Matroska codec id string onto the format enumeration.
fn codec_id_to_format(codec: &str) -> MediaFormat {
    if codec.starts_with("A_AAC") {
        return MediaFormat::Aac;
    }
    if codec.starts_with("A_PCM") {
        return MediaFormat::Pcm;
    }
    match codec {
        "A_MPEG/L1" => MediaFormat::MpegLayer1,
        "A_MPEG/L2" => MediaFormat::MpegLayer2,
        "A_MPEG/L3" => MediaFormat::MpegLayer3,
        "A_VORBIS" => MediaFormat::Vorbis,
        "A_OPUS" => MediaFormat::Opus,
        "A_FLAC" => MediaFormat::Flac,
        "A_AC3" => MediaFormat::Ac3,
        "V_MPEG4/ISO/AVC" => MediaFormat::H264,
        "V_MPEGH/ISO/HEVC" => MediaFormat::H265,
        "V_VP8" => MediaFormat::Vp8,
        "V_VP9" => MediaFormat::Vp9,
        "V_AV1" => MediaFormat::Av1,
        "S_TEXT/UTF8" => MediaFormat::SubRip,
        _ => MediaFormat::Unknown,
    }
}
