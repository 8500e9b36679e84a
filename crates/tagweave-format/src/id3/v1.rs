//! ID3v1: the fixed 128-byte tag at the very end of MPEG audio files.

use encoding_rs::WINDOWS_1252;

use tagweave_model::{
    DiagLevel, Diagnostics, FieldMap, KnownField, Result, Tag, TagError, TagField, TagType,
    TagValue, TextEncoding,
};

use crate::io::ByteStream;

const CONTEXT: &str = "parsing ID3v1 tag";

/// Standard ID3v1 genres, indexed by the genre byte.
pub const GENRES: [&str; 80] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "Alternative Rock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer",
    "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock",
];

/// An ID3v1/ID3v1.1 tag.
#[derive(Debug, Clone, Default)]
pub struct Id3v1Tag {
    fields: FieldMap,
}

fn decode(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = WINDOWS_1252.decode(&bytes[..end]).0;
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn encode_into(target: &mut [u8], value: &str, id: &str, diag: &mut Diagnostics) {
    let encoded = WINDOWS_1252.encode(value).0;
    if encoded.len() > target.len() {
        diag.add(
            DiagLevel::Warning,
            format!(
                "Value of field \"{id}\" exceeds {} bytes and gets truncated.",
                target.len()
            ),
            "making ID3v1 tag",
        );
    }
    let len = encoded.len().min(target.len());
    target[..len].copy_from_slice(&encoded[..len]);
}

impl Id3v1Tag {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, id: &'static str, value: Option<String>) {
        if let Some(value) = value {
            self.fields.insert(TagField::new(
                id,
                TagValue::Text {
                    value,
                    encoding: TextEncoding::Latin1,
                },
            ));
        }
    }

    /// Parses the 128-byte tag from the current stream position (the caller
    /// seeks to `len - 128` first).
    pub fn parse(stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<Self> {
        let mut buf = [0u8; 128];
        stream.read_exact(&mut buf)?;
        if &buf[..3] != b"TAG" {
            diag.add(DiagLevel::Critical, "Signature is invalid.", CONTEXT);
            return Err(TagError::InvalidData("missing TAG signature".into()));
        }

        let mut tag = Self::new();
        tag.put("TITLE", decode(&buf[3..33]));
        tag.put("ARTIST", decode(&buf[33..63]));
        tag.put("ALBUM", decode(&buf[63..93]));
        tag.put("YEAR", decode(&buf[93..97]));

        // ID3v1.1: a zero byte before the last comment byte turns that byte
        // into the track number.
        if buf[125] == 0 && buf[126] != 0 {
            tag.put("COMMENT", decode(&buf[97..125]));
            tag.fields
                .insert(TagField::new("TRACKNUMBER", TagValue::Integer(i64::from(buf[126]))));
        } else {
            tag.put("COMMENT", decode(&buf[97..127]));
        }

        let genre = buf[127];
        if let Some(name) = GENRES.get(genre as usize) {
            tag.put("GENRE", Some((*name).to_owned()));
        } else if genre != 255 {
            diag.add(
                DiagLevel::Information,
                format!("Genre index {genre} is unknown."),
                CONTEXT,
            );
        }
        Ok(tag)
    }

    /// Serializes the tag to its fixed 128-byte form, truncating oversize
    /// values with a warning.
    pub fn make(&self, diag: &mut Diagnostics) -> [u8; 128] {
        let mut buf = [0u8; 128];
        buf[..3].copy_from_slice(b"TAG");

        let text = |field: KnownField| -> Option<String> {
            self.value(field)
                .and_then(|value| value.to_display_string().ok())
        };
        if let Some(value) = text(KnownField::Title) {
            encode_into(&mut buf[3..33], &value, "TITLE", diag);
        }
        if let Some(value) = text(KnownField::Artist) {
            encode_into(&mut buf[33..63], &value, "ARTIST", diag);
        }
        if let Some(value) = text(KnownField::Album) {
            encode_into(&mut buf[63..93], &value, "ALBUM", diag);
        }
        if let Some(value) = text(KnownField::RecordDate) {
            encode_into(&mut buf[93..97], &value, "YEAR", diag);
        }

        let track = self
            .value(KnownField::TrackPosition)
            .and_then(|value| value.to_integer().ok())
            .filter(|track| (1..=255).contains(track));
        if let Some(value) = text(KnownField::Comment) {
            let comment_len = if track.is_some() { 28 } else { 30 };
            encode_into(&mut buf[97..97 + comment_len], &value, "COMMENT", diag);
        }
        if let Some(track) = track {
            buf[125] = 0;
            buf[126] = track as u8;
        }

        buf[127] = match text(KnownField::Genre) {
            Some(name) => GENRES
                .iter()
                .position(|g| g.eq_ignore_ascii_case(&name))
                .map(|index| index as u8)
                .unwrap_or(255),
            None => 255,
        };
        buf
    }
}

impl Tag for Id3v1Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v1
    }

    fn field_id(&self, field: KnownField) -> Option<&'static str> {
        Some(match field {
            KnownField::Title => "TITLE",
            KnownField::Artist => "ARTIST",
            KnownField::Album => "ALBUM",
            KnownField::RecordDate => "YEAR",
            KnownField::Comment => "COMMENT",
            KnownField::TrackPosition => "TRACKNUMBER",
            KnownField::Genre => "GENRE",
            _ => return None,
        })
    }

    fn known_field(&self, id: &str) -> Option<KnownField> {
        let table: &[(&str, KnownField)] = &[
            ("TITLE", KnownField::Title),
            ("ARTIST", KnownField::Artist),
            ("ALBUM", KnownField::Album),
            ("YEAR", KnownField::RecordDate),
            ("COMMENT", KnownField::Comment),
            ("TRACKNUMBER", KnownField::TrackPosition),
            ("GENRE", KnownField::Genre),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn stream_with(data: &[u8]) -> (tempfile::NamedTempFile, ByteStream) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let stream = ByteStream::open(tmp.path()).unwrap();
        (tmp, stream)
    }

    #[test]
    fn test_round_trip_with_track_number() {
        let mut tag = Id3v1Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("Some Title"));
        tag.set_value(KnownField::Artist, TagValue::text("Some Artist"));
        tag.set_value(KnownField::RecordDate, TagValue::text("1999"));
        tag.set_value(KnownField::TrackPosition, TagValue::Integer(7));
        tag.set_value(KnownField::Genre, TagValue::text("Jazz"));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(&mut diag);
        assert_eq!(&bytes[..3], b"TAG");
        assert_eq!(bytes[126], 7);
        assert_eq!(bytes[127], 8); // Jazz

        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v1Tag::parse(&mut stream, &mut diag).unwrap();
        assert_eq!(
            reparsed
                .value(KnownField::Title)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "Some Title"
        );
        assert_eq!(
            reparsed
                .value(KnownField::TrackPosition)
                .unwrap()
                .to_integer()
                .unwrap(),
            7
        );
        assert_eq!(
            reparsed
                .value(KnownField::Genre)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "Jazz"
        );
    }

    #[test]
    fn test_oversize_title_is_truncated_with_warning() {
        let mut tag = Id3v1Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("x".repeat(40)));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(&mut diag);
        assert_eq!(diag.level(), Some(DiagLevel::Warning));

        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v1Tag::parse(&mut stream, &mut diag).unwrap();
        assert_eq!(
            reparsed
                .value(KnownField::Title)
                .unwrap()
                .to_display_string()
                .unwrap()
                .len(),
            30
        );
    }

    #[test]
    fn test_missing_signature_is_invalid() {
        let (_tmp, mut stream) = stream_with(&[0u8; 128]);
        let mut diag = Diagnostics::new();
        assert!(matches!(
            Id3v1Tag::parse(&mut stream, &mut diag),
            Err(TagError::InvalidData(_))
        ));
    }
}
