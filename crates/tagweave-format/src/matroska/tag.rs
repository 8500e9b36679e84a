//! Matroska tags: `Tags` elements holding nested simple tags.

use tagweave_model::{FieldMap, KnownField, Tag, TagTarget, TagType};

/// A single Matroska `Tag` element: a target plus a map of simple tags.
#[derive(Debug, Clone, Default)]
pub struct MatroskaTag {
    fields: FieldMap,
    target: TagTarget,
}

impl MatroskaTag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(target: TagTarget) -> Self {
        Self {
            fields: FieldMap::new(),
            target,
        }
    }

    pub fn set_target(&mut self, target: TagTarget) {
        self.target = target;
    }
}

impl Tag for MatroskaTag {
    fn tag_type(&self) -> TagType {
        TagType::MatroskaTag
    }

    fn field_id(&self, field: KnownField) -> Option<&'static str> {
        // Simple-tag names as commonly written by muxers and taggers.
        Some(match field {
            KnownField::Title => "TITLE",
            KnownField::Album => "ALBUM",
            KnownField::Artist => "ARTIST",
            KnownField::AlbumArtist => "ALBUM_ARTIST",
            KnownField::Comment => "COMMENT",
            KnownField::Composer => "COMPOSER",
            KnownField::Description => "DESCRIPTION",
            KnownField::Encoder => "ENCODER",
            KnownField::EncoderSettings => "ENCODER_SETTINGS",
            KnownField::Genre => "GENRE",
            KnownField::Grouping => "GROUPING",
            KnownField::Language => "LANGUAGE",
            KnownField::Lyricist => "LYRICIST",
            KnownField::Lyrics => "LYRICS",
            KnownField::Performers => "LEAD_PERFORMER",
            KnownField::RecordDate => "DATE_RELEASED",
            KnownField::RecordLabel => "LABEL",
            KnownField::TrackPosition => "PART_NUMBER",
            KnownField::PartNumber => "PART_NUMBER",
            _ => return None,
        })
    }

    fn known_field(&self, id: &str) -> Option<KnownField> {
        let table: &[(&str, KnownField)] = &[
            ("TITLE", KnownField::Title),
            ("ALBUM", KnownField::Album),
            ("ARTIST", KnownField::Artist),
            ("ALBUM_ARTIST", KnownField::AlbumArtist),
            ("COMMENT", KnownField::Comment),
            ("COMPOSER", KnownField::Composer),
            ("DESCRIPTION", KnownField::Description),
            ("ENCODER", KnownField::Encoder),
            ("ENCODER_SETTINGS", KnownField::EncoderSettings),
            ("GENRE", KnownField::Genre),
            ("GROUPING", KnownField::Grouping),
            ("LANGUAGE", KnownField::Language),
            ("LYRICIST", KnownField::Lyricist),
            ("LYRICS", KnownField::Lyrics),
            ("LEAD_PERFORMER", KnownField::Performers),
            ("DATE_RELEASED", KnownField::RecordDate),
            ("DATE_RECORDED", KnownField::RecordDate),
            ("LABEL", KnownField::RecordLabel),
            ("PART_NUMBER", KnownField::TrackPosition),
        ];
        table
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(id))
            .map(|(_, field)| *field)
    }

    fn fields(&self) -> &FieldMap {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    fn target(&self) -> &TagTarget {
        &self.target
    }
}
