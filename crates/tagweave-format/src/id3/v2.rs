//! ID3v2 tags (versions 2.2, 2.3 and 2.4).
//!
//! The tag payload is read into memory as a whole (tag sizes are bounded
//! by the 28-bit synchsafe header field), optionally de-unsynchronized,
//! and the frames are walked from the buffer. Frames this library does not
//! interpret are kept as opaque binary fields and re-emitted verbatim.

use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};

use tagweave_model::{
    DiagLevel, Diagnostics, FieldMap, KnownField, Picture, Result, Tag, TagError, TagField,
    TagType, TagValue, TextEncoding,
};

use crate::io::ByteStream;

const CONTEXT: &str = "parsing ID3v2 tag";
const HEADER_SIZE: u64 = 10;
const FOOTER_SIZE: u64 = 10;

/// Packs a 28-bit value into four 7-bit synchsafe bytes.
pub fn to_synchsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

pub fn from_synchsafe(bytes: [u8; 4]) -> u32 {
    (u32::from(bytes[0] & 0x7F) << 21)
        | (u32::from(bytes[1] & 0x7F) << 14)
        | (u32::from(bytes[2] & 0x7F) << 7)
        | u32::from(bytes[3] & 0x7F)
}

/// An ID3v2 tag.
#[derive(Debug, Clone)]
pub struct Id3v2Tag {
    major_version: u8,
    revision: u8,
    fields: FieldMap,
    /// Padding observed after the last frame when the tag was parsed.
    padding: u64,
    /// Total on-disk size (header + payload + footer) when parsed.
    parsed_size: u64,
}

impl Default for Id3v2Tag {
    fn default() -> Self {
        Self {
            major_version: 4,
            revision: 0,
            fields: FieldMap::new(),
            padding: 0,
            parsed_size: 0,
        }
    }
}

impl Id3v2Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn major_version(&self) -> u8 {
        self.major_version
    }

    pub fn padding(&self) -> u64 {
        self.padding
    }

    /// Total size the tag occupied on disk, header and padding included.
    pub fn parsed_size(&self) -> u64 {
        self.parsed_size
    }

    /// Parses a tag from the current stream position (at the `ID3` magic).
    pub fn parse(stream: &mut ByteStream, diag: &mut Diagnostics) -> Result<Self> {
        let mut header = [0u8; 10];
        stream.read_exact(&mut header)?;
        if &header[..3] != b"ID3" {
            diag.add(DiagLevel::Critical, "Signature is invalid.", CONTEXT);
            return Err(TagError::InvalidData("missing ID3 signature".into()));
        }
        let major_version = header[3];
        let revision = header[4];
        if !(2..=4).contains(&major_version) {
            diag.add(
                DiagLevel::Critical,
                format!("ID3v2.{major_version} is not supported."),
                CONTEXT,
            );
            return Err(TagError::NotSupported(format!(
                "ID3v2.{major_version} tags"
            )));
        }
        let flags = header[5];
        let unsynchronized = flags & 0x80 != 0;
        let has_extended_header = flags & 0x40 != 0;
        let has_footer = flags & 0x10 != 0;
        let size = u64::from(from_synchsafe([header[6], header[7], header[8], header[9]]));

        let mut data = stream.read_bytes(size)?;
        if unsynchronized {
            undo_unsynchronization(&mut data);
        }

        let mut pos = 0usize;
        if has_extended_header && major_version >= 3 {
            if data.len() < 4 {
                return Err(TagError::TruncatedData("extended header truncated".into()));
            }
            let declared = if major_version >= 4 {
                from_synchsafe([data[0], data[1], data[2], data[3]]) as usize
            } else {
                // v2.3 counts the size field itself separately
                u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize + 4
            };
            pos = declared.min(data.len());
        }

        let mut tag = Self {
            major_version,
            revision,
            fields: FieldMap::new(),
            padding: 0,
            parsed_size: HEADER_SIZE + size + if has_footer { FOOTER_SIZE } else { 0 },
        };
        tag.parse_frames(&data, pos, diag);
        tracing::debug!(
            version = major_version,
            fields = tag.fields.len(),
            padding = tag.padding,
            "parsed ID3v2 tag"
        );
        Ok(tag)
    }

    fn parse_frames(&mut self, data: &[u8], mut pos: usize, diag: &mut Diagnostics) {
        let id_len = if self.major_version == 2 { 3 } else { 4 };
        let frame_header_len = if self.major_version == 2 { 6 } else { 10 };

        while pos + frame_header_len <= data.len() {
            if data[pos] == 0 {
                // zero byte where a frame id should start: the padding area
                self.padding = (data.len() - pos) as u64;
                break;
            }
            let raw_id = &data[pos..pos + id_len];
            if !raw_id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
                diag.add(
                    DiagLevel::Warning,
                    format!("Invalid frame id at offset {pos}; stopping the frame scan."),
                    CONTEXT,
                );
                break;
            }
            let id = upgrade_frame_id(raw_id);

            let frame_size = match self.major_version {
                2 => u32::from_be_bytes([0, data[pos + 3], data[pos + 4], data[pos + 5]]) as usize,
                3 => u32::from_be_bytes([
                    data[pos + 4],
                    data[pos + 5],
                    data[pos + 6],
                    data[pos + 7],
                ]) as usize,
                _ => from_synchsafe([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                    as usize,
            };
            let frame_start = pos + frame_header_len;
            let frame_end = frame_start + frame_size;
            if frame_end > data.len() {
                diag.add(
                    DiagLevel::Critical,
                    format!("Frame \"{id}\" exceeds the tag; the tag is truncated."),
                    CONTEXT,
                );
                break;
            }
            let body = &data[frame_start..frame_end];

            match self.decode_frame(&id, body, diag) {
                Some(field) => self.fields.insert(field),
                None => diag.add(
                    DiagLevel::Warning,
                    format!("Frame \"{id}\" is malformed; skipping it."),
                    CONTEXT,
                ),
            }
            pos = frame_end;
        }
    }

    fn decode_frame(&self, id: &str, body: &[u8], _diag: &mut Diagnostics) -> Option<TagField> {
        if id == "COMM" || id == "USLT" {
            if body.len() < 4 {
                return None;
            }
            let encoding = body[0];
            let language = String::from_utf8_lossy(&body[1..4]).into_owned();
            let wide = matches!(encoding, 1 | 2);
            let (_descriptor, text) = split_terminated(&body[4..], wide);
            let value = decode_text(encoding, text)?;
            return Some(
                TagField::new(id, text_value(encoding, value)).with_type_info(language),
            );
        }
        if id == "APIC" {
            return decode_picture_frame(body).map(|pic| TagField::new(id, TagValue::Picture(pic)));
        }
        if id.starts_with('T') && id != "TXXX" {
            if body.is_empty() {
                return None;
            }
            let encoding = body[0];
            let value = decode_text(encoding, &body[1..])?;
            return Some(TagField::new(id, text_value(encoding, value)));
        }
        // opaque frame, re-emitted verbatim
        Some(TagField::new(id, TagValue::Binary(body.to_vec())))
    }

    /// Serializes the tag with `padding` zero bytes appended inside the
    /// declared tag size.
    pub fn make(&self, padding: u64, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        // 2.2 is read-only; everything below 2.3 is written as 2.3
        let version = self.major_version.max(3);
        let mut frames: Vec<u8> = Vec::new();
        for field in &self.fields {
            match self.make_frame(version, field, diag) {
                Some(frame) => frames.extend_from_slice(&frame),
                None => diag.add(
                    DiagLevel::Warning,
                    format!(
                        "Field \"{}\" cannot be serialized; omitting it.",
                        field.id
                    ),
                    "making ID3v2 tag",
                ),
            }
        }

        let payload_size = frames.len() as u64 + padding;
        if payload_size > u64::from(u32::MAX >> 4) {
            return Err(TagError::InvalidData("ID3v2 tag exceeds 256 MiB".into()));
        }
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize + payload_size as usize);
        buf.extend_from_slice(b"ID3");
        buf.push(version);
        buf.push(self.revision);
        buf.push(0); // no unsynchronisation, no extended header, no footer
        buf.extend_from_slice(&to_synchsafe(payload_size as u32));
        buf.extend_from_slice(&frames);
        buf.resize(buf.len() + padding as usize, 0);
        Ok(buf)
    }

    fn make_frame(&self, version: u8, field: &TagField, diag: &mut Diagnostics) -> Option<Vec<u8>> {
        if field.id.len() != 4 || !field.id.is_ascii() {
            return None;
        }

        let body: Vec<u8> = match &field.value {
            TagValue::Binary(raw) => raw.clone(),
            TagValue::Picture(pic) => {
                let mut body = vec![0u8]; // Latin-1 descriptor encoding
                body.extend_from_slice(pic.mime_type.as_bytes());
                body.push(0);
                body.push(pic.picture_type as u8);
                body.extend_from_slice(&WINDOWS_1252.encode(&pic.description).0);
                body.push(0);
                body.extend_from_slice(&pic.data);
                body
            }
            value => {
                let text = value.to_display_string().ok()?;
                let mut body = Vec::with_capacity(text.len() + 8);
                if field.id == "COMM" || field.id == "USLT" {
                    let language = field.type_info.as_deref().unwrap_or("und");
                    let mut lang_bytes = [b'u', b'n', b'd'];
                    for (target, byte) in lang_bytes.iter_mut().zip(language.bytes()) {
                        *target = byte;
                    }
                    encode_text(version, &text, &mut body, true);
                    // splice the language between encoding byte and descriptor
                    body.splice(1..1, lang_bytes);
                } else {
                    encode_text(version, &text, &mut body, false);
                }
                body
            }
        };

        if body.len() > (u32::MAX >> 4) as usize {
            diag.add(
                DiagLevel::Warning,
                format!("Frame \"{}\" is too large; omitting it.", field.id),
                "making ID3v2 tag",
            );
            return None;
        }

        let mut frame = Vec::with_capacity(10 + body.len());
        frame.extend_from_slice(field.id.as_bytes());
        if version >= 4 {
            frame.extend_from_slice(&to_synchsafe(body.len() as u32));
        } else {
            frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        }
        frame.extend_from_slice(&[0, 0]); // frame flags
        frame.extend_from_slice(&body);
        Some(frame)
    }
}

/// Writes encoding byte plus encoded text; for COMM/USLT style frames an
/// empty descriptor terminator precedes the text.
fn encode_text(version: u8, text: &str, body: &mut Vec<u8>, with_descriptor: bool) {
    if version >= 4 {
        body.push(3); // UTF-8
        if with_descriptor {
            body.push(0);
        }
        body.extend_from_slice(text.as_bytes());
    } else if text.is_ascii() {
        body.push(0); // Latin-1
        if with_descriptor {
            body.push(0);
        }
        body.extend_from_slice(text.as_bytes());
    } else {
        body.push(1); // UTF-16 with BOM
        if with_descriptor {
            body.extend_from_slice(&[0xFF, 0xFE, 0, 0]);
        }
        body.extend_from_slice(&[0xFF, 0xFE]);
        for unit in text.encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

fn text_value(encoding_byte: u8, value: String) -> TagValue {
    let encoding = match encoding_byte {
        0 => TextEncoding::Latin1,
        1 => TextEncoding::Utf16LittleEndian,
        2 => TextEncoding::Utf16BigEndian,
        _ => TextEncoding::Utf8,
    };
    TagValue::Text { value, encoding }
}

fn decode_text(encoding: u8, bytes: &[u8]) -> Option<String> {
    let text = match encoding {
        0 => WINDOWS_1252.decode(bytes).0.into_owned(),
        1 => {
            if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
                UTF_16BE.decode(&bytes[2..]).0.into_owned()
            } else if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
                UTF_16LE.decode(&bytes[2..]).0.into_owned()
            } else {
                UTF_16LE.decode(bytes).0.into_owned()
            }
        }
        2 => UTF_16BE.decode(bytes).0.into_owned(),
        3 => String::from_utf8_lossy(bytes).into_owned(),
        _ => return None,
    };
    Some(text.trim_end_matches('\0').to_owned())
}

/// Splits a buffer at the encoding-appropriate NUL terminator.
fn split_terminated(data: &[u8], wide: bool) -> (&[u8], &[u8]) {
    if wide {
        let mut i = 0;
        while i + 1 < data.len() {
            if data[i] == 0 && data[i + 1] == 0 {
                return (&data[..i], &data[i + 2..]);
            }
            i += 2;
        }
        (data, &[])
    } else {
        match data.iter().position(|&b| b == 0) {
            Some(i) => (&data[..i], &data[i + 1..]),
            None => (data, &[]),
        }
    }
}

fn decode_picture_frame(body: &[u8]) -> Option<Picture> {
    if body.len() < 4 {
        return None;
    }
    let encoding = body[0];
    let (mime_bytes, rest) = split_terminated(&body[1..], false);
    if rest.is_empty() {
        return None;
    }
    let picture_type = rest[0];
    let (description_bytes, data) = split_terminated(&rest[1..], matches!(encoding, 1 | 2));
    Some(Picture {
        mime_type: String::from_utf8_lossy(mime_bytes).into_owned(),
        description: decode_text(encoding, description_bytes)?,
        picture_type: u32::from(picture_type),
        data: data.to_vec(),
    })
}

/// Removes the 0x00 bytes an unsynchronized tag inserts after every 0xFF.
fn undo_unsynchronization(data: &mut Vec<u8>) {
    let mut read = 0;
    let mut write = 0;
    while read < data.len() {
        data[write] = data[read];
        if data[read] == 0xFF && read + 1 < data.len() && data[read + 1] == 0 {
            read += 1;
        }
        read += 1;
        write += 1;
    }
    data.truncate(write);
}

/// Maps 3-character ID3v2.2 frame ids to their ID3v2.3 equivalents.
fn upgrade_frame_id(raw: &[u8]) -> String {
    if raw.len() == 4 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let upgraded = match raw {
        b"TT2" => "TIT2",
        b"TAL" => "TALB",
        b"TP1" => "TPE1",
        b"TP2" => "TPE2",
        b"TCM" => "TCOM",
        b"TCO" => "TCON",
        b"TYE" => "TYER",
        b"TRK" => "TRCK",
        b"TPA" => "TPOS",
        b"TEN" => "TENC",
        b"TLA" => "TLAN",
        b"COM" => "COMM",
        b"ULT" => "USLT",
        b"PIC" => "APIC",
        _ => return String::from_utf8_lossy(raw).into_owned(),
    };
    upgraded.to_owned()
}

impl Tag for Id3v2Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v2
    }

    fn field_id(&self, field: KnownField) -> Option<&'static str> {
        Some(match field {
            KnownField::Title => "TIT2",
            KnownField::Album => "TALB",
            KnownField::Artist => "TPE1",
            KnownField::AlbumArtist => "TPE2",
            KnownField::Comment => "COMM",
            KnownField::Composer => "TCOM",
            KnownField::Description => "TIT3",
            KnownField::Encoder => "TENC",
            KnownField::EncoderSettings => "TSSE",
            KnownField::Genre => "TCON",
            KnownField::Grouping => "TIT1",
            KnownField::Language => "TLAN",
            KnownField::Lyricist => "TEXT",
            KnownField::Lyrics => "USLT",
            KnownField::RecordDate => {
                if self.major_version >= 4 {
                    "TDRC"
                } else {
                    "TYER"
                }
            }
            KnownField::RecordLabel => "TPUB",
            KnownField::TrackPosition => "TRCK",
            KnownField::DiskPosition => "TPOS",
            KnownField::Cover => "APIC",
            _ => return None,
        })
    }

    fn known_field(&self, id: &str) -> Option<KnownField> {
        let table: &[(&str, KnownField)] = &[
            ("TIT2", KnownField::Title),
            ("TALB", KnownField::Album),
            ("TPE1", KnownField::Artist),
            ("TPE2", KnownField::AlbumArtist),
            ("COMM", KnownField::Comment),
            ("TCOM", KnownField::Composer),
            ("TIT3", KnownField::Description),
            ("TENC", KnownField::Encoder),
            ("TSSE", KnownField::EncoderSettings),
            ("TCON", KnownField::Genre),
            ("TIT1", KnownField::Grouping),
            ("TLAN", KnownField::Language),
            ("TEXT", KnownField::Lyricist),
            ("USLT", KnownField::Lyrics),
            ("TDRC", KnownField::RecordDate),
            ("TYER", KnownField::RecordDate),
            ("TPUB", KnownField::RecordLabel),
            ("TRCK", KnownField::TrackPosition),
            ("TPOS", KnownField::DiskPosition),
            ("APIC", KnownField::Cover),
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

    fn value(&self, field: KnownField) -> Option<&TagValue> {
        if field == KnownField::RecordDate {
            // accept both the v2.3 and v2.4 identifier on read
            return self
                .fields
                .get("TDRC")
                .or_else(|| self.fields.get("TYER"))
                .map(|f| &f.value);
        }
        let id = self.field_id(field)?;
        self.fields.get(id).map(|f| &f.value)
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
    fn test_synchsafe_round_trip() {
        for value in [0u32, 1, 0x7F, 0x80, 0x3FFF, 0x1F_FFFF, 0xFFF_FFFF] {
            assert_eq!(from_synchsafe(to_synchsafe(value)), value);
        }
    }

    #[test]
    fn test_round_trip_v4_with_padding() {
        let mut tag = Id3v2Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("Tïtle"));
        tag.set_value(KnownField::Artist, TagValue::text("Artist"));
        tag.set_value(KnownField::TrackPosition, TagValue::text("3/12"));
        tag.set_value(KnownField::Lyrics, TagValue::text("la la"));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(256, &mut diag).unwrap();
        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();

        assert_eq!(reparsed.major_version(), 4);
        assert_eq!(reparsed.padding(), 256);
        assert_eq!(reparsed.parsed_size(), bytes.len() as u64);
        assert_eq!(
            reparsed
                .value(KnownField::Title)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "Tïtle"
        );
        assert_eq!(
            reparsed
                .value(KnownField::Lyrics)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "la la"
        );
        assert!(!diag.has_critical());
    }

    #[test]
    fn test_v3_frames_use_plain_sizes_and_utf16() {
        let mut tag = Id3v2Tag {
            major_version: 3,
            ..Id3v2Tag::new()
        };
        tag.set_value(KnownField::Title, TagValue::text("Grüße"));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(0, &mut diag).unwrap();
        assert_eq!(bytes[3], 3);

        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();
        assert_eq!(
            reparsed
                .value(KnownField::Title)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "Grüße"
        );
    }

    #[test]
    fn test_v22_ids_are_upgraded() {
        // hand-built v2.2 tag with a TT2 frame ("Hi", Latin-1)
        let body = [0u8, b'H', b'i'];
        let mut data = Vec::new();
        data.extend_from_slice(b"ID3");
        data.push(2);
        data.push(0);
        data.push(0);
        let frame_len = 6 + body.len();
        data.extend_from_slice(&to_synchsafe(frame_len as u32));
        data.extend_from_slice(b"TT2");
        data.extend_from_slice(&[0, 0, body.len() as u8]);
        data.extend_from_slice(&body);

        let (_tmp, mut stream) = stream_with(&data);
        let mut diag = Diagnostics::new();
        let tag = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();
        assert!(tag.fields().contains("TIT2"));
        assert_eq!(
            tag.value(KnownField::Title)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "Hi"
        );
    }

    #[test]
    fn test_unknown_frames_survive_round_trip() {
        let mut tag = Id3v2Tag::new();
        tag.fields_mut().insert(TagField::new(
            "PRIV",
            TagValue::Binary(vec![1, 2, 3, 4, 5]),
        ));
        tag.set_value(KnownField::Title, TagValue::text("t"));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(0, &mut diag).unwrap();
        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();
        assert_eq!(
            reparsed.fields().get("PRIV").unwrap().value,
            TagValue::Binary(vec![1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn test_apic_round_trip() {
        let picture = Picture {
            mime_type: "image/jpeg".into(),
            description: "cover".into(),
            picture_type: 3,
            data: vec![0xDE, 0xAD],
        };
        let mut tag = Id3v2Tag::new();
        tag.set_value(KnownField::Cover, TagValue::Picture(picture.clone()));

        let mut diag = Diagnostics::new();
        let bytes = tag.make(0, &mut diag).unwrap();
        let (_tmp, mut stream) = stream_with(&bytes);
        let reparsed = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();
        match &reparsed.value(KnownField::Cover).unwrap() {
            TagValue::Picture(pic) => {
                assert_eq!(pic.mime_type, picture.mime_type);
                assert_eq!(pic.data, picture.data);
                assert_eq!(pic.picture_type, 3);
            }
            other => panic!("expected picture, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_frame_is_critical() {
        let mut tag = Id3v2Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("whole"));
        let mut diag = Diagnostics::new();
        let mut bytes = tag.make(0, &mut diag).unwrap();
        // declare a frame size reaching beyond the tag
        let len = bytes.len();
        bytes[len - 1] = 0xFF;
        bytes[14..18].copy_from_slice(&to_synchsafe(500));

        let (_tmp, mut stream) = stream_with(&bytes);
        let mut diag = Diagnostics::new();
        let tag = Id3v2Tag::parse(&mut stream, &mut diag).unwrap();
        assert!(diag.has_critical());
        assert!(tag.fields().is_empty());
    }
}
