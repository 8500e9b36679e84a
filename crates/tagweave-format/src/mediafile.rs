//! The top-level orchestrator.
//!
//! A [`MediaFile`] owns the byte stream, identifies the container from its
//! leading bytes, dispatches to the matching engine, tracks per-facet
//! parsing status, and drives the save path: splice in place when the
//! padding policy allows it, otherwise rewrite through a backup so the
//! original file survives any failure.

use std::path::{Path, PathBuf};

use tagweave_model::{
    AbortableProgressFeedback, Attachment, Chapter, DiagLevel, Diagnostics, KnownField,
    ParsingStatus, Result, Tag, TagError, TagValue, Track,
};

use crate::container::{Container, Facet};
use crate::flac::FlacStream;
use crate::framestream::FrameStream;
use crate::id3::{Id3v1Tag, Id3v2Tag};
use crate::io::ByteStream;
use crate::matroska::MatroskaContainer;
use crate::planner;
use crate::settings::{ParseOptions, SaveSettings};
use crate::signature::{ContainerFormat, SNIFF_LEN};
use crate::vorbis::VorbisComment;

const CONTEXT_FORMAT: &str = "parsing container format";
const CONTEXT_TRACKS: &str = "parsing tracks";
const CONTEXT_TAGS: &str = "parsing tags";
const CONTEXT_CHAPTERS: &str = "parsing chapters";
const CONTEXT_ATTACHMENTS: &str = "parsing attachments";
const CONTEXT_SAVE: &str = "applying changes";

/// A media file opened for metadata inspection and editing.
pub struct MediaFile {
    path: PathBuf,
    stream: ByteStream,

    container_format: ContainerFormat,
    container_offset: u64,
    container: Option<Box<dyn Container>>,
    frame_stream: Option<FrameStream>,
    flac: Option<FlacStream>,
    single_track: Option<Track>,

    id3v1: Option<Id3v1Tag>,
    /// Whether an ID3v1 tag was actually present in the file (as opposed
    /// to one created by the caller).
    id3v1_present: bool,
    id3v2: Vec<Id3v2Tag>,

    container_status: ParsingStatus,
    tracks_status: ParsingStatus,
    tags_status: ParsingStatus,
    chapters_status: ParsingStatus,
    attachments_status: ParsingStatus,

    parse_options: ParseOptions,
    settings: SaveSettings,
}

impl MediaFile {
    /// Opens the file at `path` for reading. Nothing is parsed yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stream = ByteStream::open(&path)?;
        tracing::info!(path = %path.display(), size = stream.len(), "opened media file");
        Ok(Self {
            path,
            stream,
            container_format: ContainerFormat::Unknown,
            container_offset: 0,
            container: None,
            frame_stream: None,
            flac: None,
            single_track: None,
            id3v1: None,
            id3v1_present: false,
            id3v2: Vec::new(),
            container_status: ParsingStatus::NotParsedYet,
            tracks_status: ParsingStatus::NotParsedYet,
            tags_status: ParsingStatus::NotParsedYet,
            chapters_status: ParsingStatus::NotParsedYet,
            attachments_status: ParsingStatus::NotParsedYet,
            parse_options: ParseOptions::default(),
            settings: SaveSettings::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.stream.len()
    }

    pub fn container_format(&self) -> ContainerFormat {
        self.container_format
    }

    /// Offset where the actual container data begins (after any leading
    /// ID3v2 tags).
    pub fn container_offset(&self) -> u64 {
        self.container_offset
    }

    pub fn container(&self) -> Option<&dyn Container> {
        self.container.as_deref()
    }

    pub fn container_mut(&mut self) -> Option<&mut (dyn Container + 'static)> {
        self.container.as_deref_mut()
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.parse_options
    }

    pub fn parse_options_mut(&mut self) -> &mut ParseOptions {
        &mut self.parse_options
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SaveSettings {
        &mut self.settings
    }

    // ---------------------------------------------------------------
    // status accessors
    // ---------------------------------------------------------------

    pub fn container_parsing_status(&self) -> ParsingStatus {
        self.container_status
    }

    pub fn tracks_parsing_status(&self) -> ParsingStatus {
        self.tracks_status
    }

    pub fn tags_parsing_status(&self) -> ParsingStatus {
        self.tags_status
    }

    pub fn chapters_parsing_status(&self) -> ParsingStatus {
        self.chapters_status
    }

    pub fn attachments_parsing_status(&self) -> ParsingStatus {
        self.attachments_status
    }

    /// Padding detected around the tag regions while parsing.
    pub fn padding_size(&self) -> u64 {
        let mut padding = 0;
        if let Some(container) = &self.container {
            padding += container.detected_padding();
        }
        if let Some(flac) = &self.flac {
            padding += flac.padding();
        }
        padding += self.id3v2.iter().map(Id3v2Tag::padding).sum::<u64>();
        padding
    }

    // ---------------------------------------------------------------
    // parsing
    // ---------------------------------------------------------------

    /// Identifies the container format from the leading bytes, skipping
    /// (and collecting) ID3v2 tags, and instantiates the matching engine.
    pub fn parse_container_format(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.container_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        match self.parse_container_format_inner(diag) {
            Ok(status) => {
                self.container_status = status;
                Ok(())
            }
            Err(err) => {
                self.container_status = ParsingStatus::CriticalFailure;
                diag.add(DiagLevel::Critical, err.to_string(), CONTEXT_FORMAT);
                Err(err)
            }
        }
    }

    fn parse_container_format_inner(
        &mut self,
        diag: &mut Diagnostics,
    ) -> Result<ParsingStatus> {
        let mut offset = 0u64;
        loop {
            if offset >= self.stream.len() {
                break;
            }
            let len = (self.stream.len() - offset).min(SNIFF_LEN as u64);
            self.stream.seek(offset)?;
            let mut buf = [0u8; SNIFF_LEN];
            self.stream.read_exact(&mut buf[..len as usize])?;
            let format = ContainerFormat::from_signature(&buf[..len as usize]);

            if format == ContainerFormat::Id3v2 {
                // skip the tag by its declared length and sniff again
                self.stream.seek(offset)?;
                let tag = Id3v2Tag::parse(&mut self.stream, diag)?;
                offset += tag.parsed_size();
                self.id3v2.push(tag);
                continue;
            }
            self.container_format = format;
            break;
        }
        self.container_offset = offset;

        match self.container_format {
            ContainerFormat::Matroska => {
                let mut container =
                    Box::new(MatroskaContainer::new(offset, self.parse_options));
                match container.parse_header(&mut self.stream, diag) {
                    Ok(()) => {
                        if container.is_webm() {
                            self.container_format = ContainerFormat::Webm;
                        }
                        self.container = Some(container);
                    }
                    Err(_) => {
                        // diagnostics already carry the details
                        self.container = Some(container);
                        return Ok(ParsingStatus::CriticalFailure);
                    }
                }
            }
            ContainerFormat::Unknown => {
                diag.add(
                    DiagLevel::Warning,
                    "The container format could not be recognized.",
                    CONTEXT_FORMAT,
                );
                self.tracks_status = ParsingStatus::NotSupported;
                self.tags_status = ParsingStatus::NotSupported;
                self.chapters_status = ParsingStatus::NotSupported;
                self.attachments_status = ParsingStatus::NotSupported;
            }
            // container-less formats and formats without an engine are
            // handled facet by facet
            _ => {}
        }
        tracing::info!(
            format = self.container_format.name(),
            offset = self.container_offset,
            leading_id3v2 = self.id3v2.len(),
            "identified container format"
        );
        Ok(ParsingStatus::Ok)
    }

    pub fn parse_tracks(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.tracks_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.parse_container_format(diag)?;
        self.tracks_status = match self.parse_tracks_inner(diag) {
            Ok(status) => status,
            Err(err) => {
                diag.add(DiagLevel::Critical, err.to_string(), CONTEXT_TRACKS);
                ParsingStatus::CriticalFailure
            }
        };
        Ok(())
    }

    fn parse_tracks_inner(&mut self, diag: &mut Diagnostics) -> Result<ParsingStatus> {
        match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                let _ = container.parse_tracks(&mut self.stream, diag);
                Ok(container.parsing_status(Facet::Tracks))
            }
            ContainerFormat::Adts | ContainerFormat::MpegAudioFrames => {
                let parsed = FrameStream::parse(
                    &mut self.stream,
                    self.container_offset,
                    self.container_format,
                    diag,
                )?;
                self.single_track = Some(parsed.track().clone());
                self.frame_stream = Some(parsed);
                Ok(ParsingStatus::Ok)
            }
            ContainerFormat::Flac => {
                self.ensure_flac(diag)?;
                self.single_track = self.flac.as_ref().map(|flac| flac.track().clone());
                Ok(ParsingStatus::Ok)
            }
            other => {
                diag.add(
                    DiagLevel::Information,
                    format!("Parsing tracks of {} files is not supported.", other.name()),
                    CONTEXT_TRACKS,
                );
                Ok(ParsingStatus::NotSupported)
            }
        }
    }

    pub fn parse_tags(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.tags_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.parse_container_format(diag)?;
        self.tags_status = match self.parse_tags_inner(diag) {
            Ok(status) => status,
            Err(err) => {
                diag.add(DiagLevel::Critical, err.to_string(), CONTEXT_TAGS);
                ParsingStatus::CriticalFailure
            }
        };
        Ok(())
    }

    fn parse_tags_inner(&mut self, diag: &mut Diagnostics) -> Result<ParsingStatus> {
        match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                let _ = container.parse_tags(&mut self.stream, diag);
                Ok(container.parsing_status(Facet::Tags))
            }
            ContainerFormat::Adts | ContainerFormat::MpegAudioFrames => {
                // leading ID3v2 tags were collected while sniffing; look
                // for the trailing ID3v1 tag
                self.parse_trailing_id3v1(diag)?;
                Ok(ParsingStatus::Ok)
            }
            ContainerFormat::Flac => {
                self.ensure_flac(diag)?;
                Ok(ParsingStatus::Ok)
            }
            other => {
                diag.add(
                    DiagLevel::Information,
                    format!("Parsing tags of {} files is not supported.", other.name()),
                    CONTEXT_TAGS,
                );
                Ok(ParsingStatus::NotSupported)
            }
        }
    }

    fn parse_trailing_id3v1(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.stream.len() >= self.container_offset + 128 {
            self.stream.seek(self.stream.len() - 128)?;
            let mut magic = [0u8; 3];
            self.stream.read_exact(&mut magic)?;
            if &magic == b"TAG" {
                self.stream.seek(self.stream.len() - 128)?;
                self.id3v1 = Some(Id3v1Tag::parse(&mut self.stream, diag)?);
                self.id3v1_present = true;
            }
        }
        Ok(())
    }

    pub fn parse_chapters(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.chapters_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.parse_container_format(diag)?;
        self.chapters_status = match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                let _ = container.parse_chapters(&mut self.stream, diag);
                container.parsing_status(Facet::Chapters)
            }
            other => {
                diag.add(
                    DiagLevel::Information,
                    format!("{} files have no chapter information.", other.name()),
                    CONTEXT_CHAPTERS,
                );
                ParsingStatus::NotSupported
            }
        };
        Ok(())
    }

    pub fn parse_attachments(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.attachments_status != ParsingStatus::NotParsedYet {
            return Ok(());
        }
        self.parse_container_format(diag)?;
        self.attachments_status = match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                let _ = container.parse_attachments(&mut self.stream, diag);
                container.parsing_status(Facet::Attachments)
            }
            other => {
                diag.add(
                    DiagLevel::Information,
                    format!("{} files have no attachments.", other.name()),
                    CONTEXT_ATTACHMENTS,
                );
                ParsingStatus::NotSupported
            }
        };
        Ok(())
    }

    /// Parses every facet. Individual failures are recorded per facet and
    /// do not abort the remaining facets.
    pub fn parse_everything(&mut self, diag: &mut Diagnostics) -> Result<()> {
        let _ = self.parse_container_format(diag);
        let _ = self.parse_tracks(diag);
        let _ = self.parse_tags(diag);
        let _ = self.parse_chapters(diag);
        let _ = self.parse_attachments(diag);
        Ok(())
    }

    /// Drops every parsing result; all facets return to
    /// [`ParsingStatus::NotParsedYet`] and the next parse re-reads the
    /// file. Behaviour settings are kept.
    pub fn clear_parsing_results(&mut self) {
        self.container_format = ContainerFormat::Unknown;
        self.container_offset = 0;
        self.container = None;
        self.frame_stream = None;
        self.flac = None;
        self.single_track = None;
        self.id3v1 = None;
        self.id3v1_present = false;
        self.id3v2.clear();
        self.container_status = ParsingStatus::NotParsedYet;
        self.tracks_status = ParsingStatus::NotParsedYet;
        self.tags_status = ParsingStatus::NotParsedYet;
        self.chapters_status = ParsingStatus::NotParsedYet;
        self.attachments_status = ParsingStatus::NotParsedYet;
    }

    fn ensure_flac(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.flac.is_none() {
            self.flac = Some(FlacStream::parse(
                &mut self.stream,
                self.container_offset,
                diag,
            )?);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // parsed-data accessors
    // ---------------------------------------------------------------

    pub fn tracks(&self) -> Vec<&Track> {
        if let Some(track) = &self.single_track {
            return vec![track];
        }
        match &self.container {
            Some(container) => container.tracks().iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks().len()
    }

    pub fn chapters(&self) -> Vec<&Chapter> {
        match &self.container {
            Some(container) => (0..container.chapter_count())
                .filter_map(|i| container.chapter(i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn attachments(&self) -> Vec<&Attachment> {
        match &self.container {
            Some(container) => (0..container.attachment_count())
                .filter_map(|i| container.attachment(i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn id3v1_tag(&self) -> Option<&Id3v1Tag> {
        self.id3v1.as_ref()
    }

    pub fn id3v1_tag_mut(&mut self) -> Option<&mut Id3v1Tag> {
        self.id3v1.as_mut()
    }

    pub fn id3v2_tags(&self) -> &[Id3v2Tag] {
        &self.id3v2
    }

    pub fn id3v2_tags_mut(&mut self) -> &mut [Id3v2Tag] {
        &mut self.id3v2
    }

    /// The Vorbis comment of a FLAC file, when parsed.
    pub fn vorbis_comment(&self) -> Option<&VorbisComment> {
        self.flac.as_ref().and_then(FlacStream::comment)
    }

    pub fn vorbis_comment_mut(&mut self) -> Option<&mut VorbisComment> {
        self.flac.as_mut().and_then(FlacStream::comment_mut)
    }

    /// All tags of the file, across formats.
    pub fn tags(&self) -> Vec<&dyn Tag> {
        let mut tags: Vec<&dyn Tag> = Vec::new();
        if let Some(container) = &self.container {
            tags.extend(container.tags());
        }
        for tag in &self.id3v2 {
            tags.push(tag);
        }
        if let Some(tag) = &self.id3v1 {
            tags.push(tag);
        }
        if let Some(comment) = self.vorbis_comment() {
            tags.push(comment);
        }
        tags
    }

    pub fn tags_mut(&mut self) -> Vec<&mut dyn Tag> {
        let mut tags: Vec<&mut dyn Tag> = Vec::new();
        if let Some(container) = self.container.as_deref_mut() {
            tags.extend(container.tags_mut());
        }
        for tag in &mut self.id3v2 {
            tags.push(tag);
        }
        if let Some(tag) = &mut self.id3v1 {
            tags.push(tag);
        }
        if let Some(comment) = self.flac.as_mut().and_then(FlacStream::comment_mut) {
            tags.push(comment);
        }
        tags
    }

    pub fn has_any_tag(&self) -> bool {
        !self.tags().is_empty()
    }

    // ---------------------------------------------------------------
    // tag management
    // ---------------------------------------------------------------

    pub fn create_id3v1_tag(&mut self) -> &mut Id3v1Tag {
        self.id3v1.get_or_insert_with(Id3v1Tag::new)
    }

    pub fn remove_id3v1_tag(&mut self) -> bool {
        self.id3v1.take().is_some()
    }

    pub fn create_id3v2_tag(&mut self) -> &mut Id3v2Tag {
        if self.id3v2.is_empty() {
            self.id3v2.push(Id3v2Tag::new());
        }
        self.id3v2.last_mut().expect("at least one tag")
    }

    pub fn remove_all_id3v2_tags(&mut self) {
        self.id3v2.clear();
    }

    /// Removes every tag of every kind; the next [`MediaFile::apply_changes`]
    /// writes the file without metadata.
    pub fn remove_all_tags(&mut self) {
        self.id3v1 = None;
        self.id3v2.clear();
        if let Some(container) = self.container.as_deref_mut() {
            container.remove_all_tags();
        }
        if let Some(flac) = self.flac.as_mut() {
            flac.remove_comment();
        }
    }

    /// Creates a Vorbis comment on a FLAC file.
    pub fn create_vorbis_comment(&mut self) -> Option<&mut VorbisComment> {
        self.flac.as_mut().map(FlacStream::create_comment)
    }

    pub fn remove_vorbis_comment(&mut self) -> bool {
        self.flac
            .as_mut()
            .map(FlacStream::remove_comment)
            .unwrap_or(false)
    }

    /// Copies the ID3v1 values into an ID3v2 tag (created when absent) and
    /// drops the ID3v1 tag.
    pub fn id3v1_to_id3v2(&mut self) -> bool {
        let Some(v1) = self.id3v1.take() else {
            return false;
        };
        // id3v1_present stays as-is so saving truncates the on-disk tag
        let v2 = self.create_id3v2_tag();
        for field in KNOWN_ID3V1_FIELDS {
            if let Some(value) = v1.value(*field) {
                v2.set_value(*field, value.clone());
            }
        }
        true
    }

    /// Creates an ID3v1 tag from the first ID3v2 tag's values.
    pub fn id3v2_to_id3v1(&mut self) -> bool {
        let Some(v2) = self.id3v2.first() else {
            return false;
        };
        let values: Vec<(KnownField, TagValue)> = KNOWN_ID3V1_FIELDS
            .iter()
            .filter_map(|field| v2.value(*field).map(|value| (*field, value.clone())))
            .collect();
        let v1 = self.create_id3v1_tag();
        for (field, value) in values {
            v1.set_value(field, value);
        }
        true
    }

    // ---------------------------------------------------------------
    // applying changes
    // ---------------------------------------------------------------

    /// Serializes the current tag state back to disk.
    ///
    /// With `save_file_path` set, the output goes there and the source is
    /// never written; otherwise the file is spliced in place when the
    /// padding policy allows it and rewritten through a backup otherwise.
    /// On failure the file at the original path is left byte-identical.
    pub fn apply_changes(
        &mut self,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        if self.container_status != ParsingStatus::Ok {
            return Err(TagError::InvalidData(
                "the container format has not been parsed yet".into(),
            ));
        }
        self.parse_everything(diag)?;
        self.validate_positions()?;
        progress.try_continue()?;

        if let Some(save_path) = self.settings.save_file_path.clone() {
            if save_path == self.path {
                return Err(TagError::InvalidData(
                    "the save file path equals the current path".into(),
                ));
            }
            let mut dest = ByteStream::create(&save_path)?;
            match self.rewrite_into(&mut dest, diag, progress) {
                Ok(()) => {
                    drop(dest);
                    self.path = save_path;
                    self.settings.save_file_path = None;
                    self.stream = ByteStream::open(&self.path)?;
                    self.clear_parsing_results();
                    tracing::info!(path = %self.path.display(), "changes written to new path");
                    Ok(())
                }
                Err(err) => {
                    drop(dest);
                    let _ = std::fs::remove_file(&save_path);
                    diag.add(DiagLevel::Critical, err.to_string(), CONTEXT_SAVE);
                    Err(err)
                }
            }
        } else {
            self.apply_in_place(diag, progress)
        }
    }

    /// Fails early when a forced tag/index position cannot be honoured by
    /// the current format.
    fn validate_positions(&self) -> Result<()> {
        use tagweave_model::ElementPosition;
        match self.container_format {
            ContainerFormat::Adts | ContainerFormat::MpegAudioFrames | ContainerFormat::Flac => {
                if self.settings.force_tag_position
                    && self.settings.tag_position == ElementPosition::AfterData
                {
                    return Err(TagError::NotSupported(format!(
                        "{} stores its tags before the media data",
                        self.container_format.name()
                    )));
                }
                if self.settings.force_index_position
                    && self.settings.index_position == ElementPosition::AfterData
                {
                    return Err(TagError::NotSupported(format!(
                        "{} has no relocatable index",
                        self.container_format.name()
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_in_place(
        &mut self,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        // attempt a splice first
        if !self.settings.force_rewrite {
            self.stream = ByteStream::open_rw(&self.path)?;
            let spliced = self.try_splice(diag, progress)?;
            if spliced {
                self.stream = ByteStream::open(&self.path)?;
                self.clear_parsing_results();
                tracing::info!(path = %self.path.display(), "changes spliced in place");
                return Ok(());
            }
        }

        // full rewrite through a backup
        let backup = backup_path(&self.path, self.settings.backup_directory.as_deref());
        std::fs::rename(&self.path, &backup)?;
        // the open handle follows the rename and keeps reading the backup
        let result = (|| -> Result<()> {
            let mut dest = ByteStream::create(&self.path)?;
            self.rewrite_into(&mut dest, diag, progress)
        })();
        match result {
            Ok(()) => {
                if self.settings.backup_directory.is_none() {
                    let _ = std::fs::remove_file(&backup);
                }
                self.stream = ByteStream::open(&self.path)?;
                self.clear_parsing_results();
                tracing::info!(path = %self.path.display(), "file rewritten");
                Ok(())
            }
            Err(err) => {
                // restore the original over any partial output
                let _ = std::fs::remove_file(&self.path);
                std::fs::rename(&backup, &self.path)?;
                self.stream = ByteStream::open(&self.path)?;
                diag.add(DiagLevel::Critical, err.to_string(), CONTEXT_SAVE);
                Err(err)
            }
        }
    }

    fn try_splice(
        &mut self,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool> {
        match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                container.try_splice(&mut self.stream, &self.settings, diag, progress)
            }
            ContainerFormat::Adts | ContainerFormat::MpegAudioFrames => {
                self.try_splice_mp3(diag, progress)
            }
            ContainerFormat::Flac => self.try_splice_flac(diag, progress),
            other => Err(TagError::NotSupported(format!(
                "writing {} files",
                other.name()
            ))),
        }
    }

    fn rewrite_into(
        &mut self,
        dest: &mut ByteStream,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        match self.container_format {
            ContainerFormat::Matroska | ContainerFormat::Webm => {
                let container = self.container.as_mut().expect("engine exists");
                container.make_file(&mut self.stream, dest, &self.settings, diag, progress)
            }
            ContainerFormat::Adts | ContainerFormat::MpegAudioFrames => {
                self.make_mp3_file(dest, diag, progress)
            }
            ContainerFormat::Flac => self.make_flac_file(dest, diag, progress),
            other => Err(TagError::NotSupported(format!(
                "writing {} files",
                other.name()
            ))),
        }
    }

    // --- MP3/ADTS ---

    /// Serializes all ID3v2 tags, giving `padding` to the last one.
    fn serialize_id3v2(&self, padding: u64, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for (index, tag) in self.id3v2.iter().enumerate() {
            let tag_padding = if index + 1 == self.id3v2.len() {
                padding
            } else {
                0
            };
            buf.extend_from_slice(&tag.make(tag_padding, diag)?);
        }
        Ok(buf)
    }

    fn try_splice_mp3(
        &mut self,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool> {
        let region = self.container_offset;
        // removing every leading tag leaves no header to declare padding
        if self.id3v2.is_empty() && region > 0 {
            return Ok(false);
        }
        let base = self.serialize_id3v2(0, diag)?;
        let plan = planner::plan(Some(region), base.len() as u64, 1, &self.settings);
        if plan.rewrite {
            return Ok(false);
        }
        progress.try_continue()?;
        progress.update_step("splicing tag information");

        if !self.id3v2.is_empty() {
            let with_padding = self.serialize_id3v2(plan.padding, diag)?;
            self.stream.seek(0)?;
            self.stream.write_all(&with_padding)?;
        }
        self.write_trailing_id3v1(diag)?;
        self.stream.sync()?;
        Ok(true)
    }

    /// Overwrites, appends or truncates the trailing 128-byte ID3v1 tag in
    /// place.
    fn write_trailing_id3v1(&mut self, diag: &mut Diagnostics) -> Result<()> {
        match (&self.id3v1, self.id3v1_present) {
            (Some(tag), true) => {
                let bytes = tag.make(diag);
                self.stream.seek(self.stream.len() - 128)?;
                self.stream.write_all(&bytes)?;
            }
            (Some(tag), false) => {
                let bytes = tag.make(diag);
                self.stream.seek(self.stream.len())?;
                self.stream.write_all(&bytes)?;
                self.id3v1_present = true;
            }
            (None, true) => {
                let len = self.stream.len();
                self.stream.set_len(len - 128)?;
                self.id3v1_present = false;
            }
            (None, false) => {}
        }
        Ok(())
    }

    fn make_mp3_file(
        &mut self,
        dest: &mut ByteStream,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        progress.update_step("writing file");
        let padding = if self.id3v2.is_empty() {
            0
        } else {
            planner::plan(None, 0, 1, &self.settings).padding
        };
        let leading = self.serialize_id3v2(padding, diag)?;
        dest.write_all(&leading)?;

        let media_len = match &self.frame_stream {
            Some(parsed) => parsed.size(),
            None => {
                let trailer = if self.id3v1_present { 128 } else { 0 };
                self.stream.len() - self.container_offset - trailer
            }
        };
        self.stream.seek(self.container_offset)?;
        self.stream.copy_to(dest, media_len, progress)?;

        if let Some(tag) = &self.id3v1 {
            let bytes = tag.make(diag);
            dest.write_all(&bytes)?;
        }
        dest.sync()?;
        Ok(())
    }

    // --- FLAC ---

    fn try_splice_flac(
        &mut self,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool> {
        // leading ID3v2 tags cannot be resized in place together with the
        // block chain; leave that to the rewrite path
        if !self.id3v2.is_empty() {
            return Ok(false);
        }
        let Some(flac) = self.flac.as_ref() else {
            return Ok(false);
        };
        let region = flac.metadata_size();
        let base = flac.serialize_metadata(&mut self.stream, 0, diag)?;
        let plan = planner::plan(Some(region), base.len() as u64, 4, &self.settings);
        if plan.rewrite {
            return Ok(false);
        }
        progress.try_continue()?;
        progress.update_step("splicing tag information");

        let flac = self.flac.as_ref().expect("checked above");
        let with_padding = flac.serialize_metadata(&mut self.stream, plan.padding, diag)?;
        let start = flac.start_offset();
        self.stream.seek(start)?;
        self.stream.write_all(&with_padding)?;
        self.stream.sync()?;
        Ok(true)
    }

    fn make_flac_file(
        &mut self,
        dest: &mut ByteStream,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()> {
        progress.update_step("writing file");
        let Some(flac) = self.flac.as_ref() else {
            return Err(TagError::InvalidData("FLAC stream was not parsed".into()));
        };
        let leading = self.serialize_id3v2(0, diag)?;
        dest.write_all(&leading)?;

        let padding = {
            let plan = planner::plan(None, 0, 4, &self.settings);
            plan.padding
        };
        let metadata = flac.serialize_metadata(&mut self.stream, padding, diag)?;
        dest.write_all(&metadata)?;

        let audio_offset = flac.audio_offset();
        let audio_len = self.stream.len() - audio_offset;
        self.stream.seek(audio_offset)?;
        self.stream.copy_to(dest, audio_len, progress)?;
        dest.sync()?;
        Ok(())
    }
}

/// Known fields representable in an ID3v1 tag.
const KNOWN_ID3V1_FIELDS: &[KnownField] = &[
    KnownField::Title,
    KnownField::Artist,
    KnownField::Album,
    KnownField::RecordDate,
    KnownField::Comment,
    KnownField::TrackPosition,
    KnownField::Genre,
];

/// Picks a non-existing backup path next to `path` (or inside `dir`).
fn backup_path(path: &Path, dir: Option<&Path>) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    let base_dir = dir
        .map(Path::to_path_buf)
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let mut candidate = base_dir.join(format!("{file_name}.bak"));
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = base_dir.join(format!("{file_name}.bak{counter}"));
        counter += 1;
    }
    candidate
}
