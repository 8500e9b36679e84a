//! The abstract tag interface shared by all concrete tag formats.

use serde::{Deserialize, Serialize};

use crate::field::{FieldMap, TagField};
use crate::value::TagValue;

/// Portable, format-independent enumeration of common metadata fields.
///
/// Concrete tags translate between these and their native identifiers via
/// [`Tag::field_id`] / [`Tag::known_field`]; fields a format cannot express
/// simply have no mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownField {
    Title,
    Album,
    Artist,
    AlbumArtist,
    Comment,
    Composer,
    Description,
    Encoder,
    EncoderSettings,
    Genre,
    Grouping,
    Language,
    Lyricist,
    Lyrics,
    Performers,
    RecordDate,
    RecordLabel,
    TrackPosition,
    DiskPosition,
    PartNumber,
    Cover,
    Vendor,
}

/// Identifies the concrete format of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagType {
    Unspecified,
    MatroskaTag,
    Id3v1,
    Id3v2,
    VorbisComment,
}

impl TagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::Unspecified => "unspecified tag",
            TagType::MatroskaTag => "Matroska tag",
            TagType::Id3v1 => "ID3v1 tag",
            TagType::Id3v2 => "ID3v2 tag",
            TagType::VorbisComment => "Vorbis comment",
        }
    }
}

/// What a tag applies to.
///
/// Matroska tags can target a particular track or edition at a certain
/// hierarchy level; other formats always use the default (whole file)
/// target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagTarget {
    /// Target type value (Matroska: 50 = album/movie, 30 = track, ...).
    /// Zero means unspecified.
    pub level: u64,
    /// UIDs of the tracks the tag applies to; empty = whole file.
    pub track_uids: Vec<u64>,
}

impl TagTarget {
    pub fn is_empty(&self) -> bool {
        self.level == 0 && self.track_uids.is_empty()
    }
}

static EMPTY_TARGET: TagTarget = TagTarget {
    level: 0,
    track_uids: Vec::new(),
};

/// Abstract interface of a parsed tag.
///
/// A tag owns a multimap from format-specific identifiers to fields plus a
/// translation between identifiers and [`KnownField`]s. The default method
/// implementations route known-field access through that translation;
/// formats with out-of-band storage (e.g. the Vorbis vendor string)
/// override [`Tag::value`] and [`Tag::set_value`].
pub trait Tag {
    fn tag_type(&self) -> TagType;

    /// The native identifier for a known field, or `None` when the format
    /// cannot express it.
    fn field_id(&self, field: KnownField) -> Option<&'static str>;

    /// The known field for a native identifier (matched case-insensitively),
    /// or `None` for format-specific extras.
    fn known_field(&self, id: &str) -> Option<KnownField>;

    fn fields(&self) -> &FieldMap;

    fn fields_mut(&mut self) -> &mut FieldMap;

    fn target(&self) -> &TagTarget {
        &EMPTY_TARGET
    }

    fn supports_field(&self, field: KnownField) -> bool {
        self.field_id(field).is_some()
    }

    /// The first value stored for a known field, if any.
    fn value(&self, field: KnownField) -> Option<&TagValue> {
        let id = self.field_id(field)?;
        self.fields().get(id).map(|f| &f.value)
    }

    /// Replaces every entry of a known field with the given value.
    ///
    /// An empty value removes the field. Returns `false` when the format
    /// cannot express the field.
    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        let Some(id) = self.field_id(field) else {
            return false;
        };
        self.fields_mut().remove(id);
        if !value.is_empty() {
            self.fields_mut().insert(TagField::new(id, value));
        }
        true
    }
}
