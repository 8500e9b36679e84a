//! The capability interface every concrete container engine implements.

use tagweave_model::{
    AbortableProgressFeedback, Attachment, Chapter, Diagnostics, ElementPosition, ParsingStatus,
    Result, Tag, Track,
};

use crate::io::ByteStream;
use crate::settings::SaveSettings;

/// One independently parsed aspect of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Header,
    Tracks,
    Tags,
    Chapters,
    Attachments,
}

/// Abstract container interface.
///
/// Each `parse_*` method is idempotent: a second call returns immediately
/// with the cached status unless [`Container::reset`] ran in between.
/// Failures are facet-local; the per-facet [`ParsingStatus`] records the
/// outcome. Concrete engines are chosen at runtime from the signature
/// sniff and used through `Box<dyn Container>`.
pub trait Container {
    fn parse_header(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()>;
    fn parse_tags(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()>;
    fn parse_tracks(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()>;
    fn parse_chapters(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()>;
    fn parse_attachments(&mut self, stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<()>;

    fn parsing_status(&self, facet: Facet) -> ParsingStatus;

    fn tags(&self) -> Vec<&dyn Tag>;
    fn tags_mut(&mut self) -> Vec<&mut dyn Tag>;
    /// Appends a fresh, empty tag and returns it.
    fn create_tag(&mut self) -> &mut dyn Tag;
    /// Removes all tags.
    fn remove_all_tags(&mut self);

    fn tracks(&self) -> &[Track];

    fn chapter(&self, index: usize) -> Option<&Chapter>;
    fn chapter_count(&self) -> usize;

    fn attachment(&self, index: usize) -> Option<&Attachment>;
    fn attachment_count(&self) -> usize;
    /// Appends a fresh attachment and returns it.
    fn create_attachment(&mut self) -> &mut Attachment;

    fn supports_title(&self) -> bool {
        false
    }
    fn title(&self) -> Option<&str> {
        None
    }
    fn set_title(&mut self, _title: &str) -> bool {
        false
    }

    fn segment_count(&self) -> usize {
        1
    }

    /// Padding detected while parsing (filler elements before the media
    /// data).
    fn detected_padding(&self) -> u64 {
        0
    }

    /// Where the existing tag region sits relative to the media data.
    fn determine_tag_position(&self, diag: &mut Diagnostics) -> ElementPosition;
    /// Where the existing index region sits relative to the media data.
    fn determine_index_position(&self, diag: &mut Diagnostics) -> ElementPosition;

    /// Attempts to apply the current tag state by overwriting only the tag
    /// region of `stream` (opened read-write). Returns `Ok(false)` without
    /// mutating anything when a full rewrite is required.
    fn try_splice(
        &mut self,
        stream: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<bool>;

    /// Rewrites the file end-to-end from `source` into `dest`, applying the
    /// current tag state and the padding/position policy.
    fn make_file(
        &mut self,
        source: &mut ByteStream,
        dest: &mut ByteStream,
        settings: &SaveSettings,
        diag: &mut Diagnostics,
        progress: &AbortableProgressFeedback,
    ) -> Result<()>;

    /// Drops all parsed structural state; every facet returns to
    /// [`ParsingStatus::NotParsedYet`].
    fn reset(&mut self);
}
