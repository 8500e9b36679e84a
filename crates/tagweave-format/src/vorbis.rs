//! Vorbis comments.
//!
//! The comment block is shared by several hosts: Ogg Vorbis/Opus packets
//! carry it with a leading packet-type signature and a trailing framing
//! byte, FLAC embeds it bare inside a metadata block. The flag set below
//! covers that cross-product.

use tagweave_model::{
    DiagLevel, Diagnostics, FieldMap, KnownField, Result, Tag, TagError, TagField, TagType,
    TagValue, TextEncoding,
};

use crate::flac::picture;
use crate::io::ByteStream;

const CONTEXT_PARSE: &str = "parsing Vorbis comment";
const CONTEXT_MAKE: &str = "making Vorbis comment";

/// Identifier of cover-art fields inside a Vorbis comment.
pub const COVER_FIELD: &str = "METADATA_BLOCK_PICTURE";

/// Parse/make options for the different comment hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VorbisCommentFlags(u8);

impl VorbisCommentFlags {
    /// No `\x03vorbis` signature (FLAC).
    pub const NO_SIGNATURE: u8 = 1 << 0;
    /// No trailing framing byte (FLAC).
    pub const NO_FRAMING_BYTE: u8 = 1 << 1;
    /// Skip cover fields when serializing (covers are stored as separate
    /// picture blocks by some hosts).
    pub const NO_COVERS: u8 = 1 << 2;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: u8) -> Self {
        self.0 |= flag;
        self
    }

    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// A parsed Vorbis comment.
#[derive(Debug, Clone, Default)]
pub struct VorbisComment {
    vendor: TagValue,
    fields: FieldMap,
    /// Bytes the comment occupied in the stream when parsed.
    size: u64,
}

impl VorbisComment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vendor(&self) -> &TagValue {
        &self.vendor
    }

    pub fn set_vendor(&mut self, vendor: TagValue) {
        self.vendor = vendor;
    }

    /// Size in bytes the comment occupied when it was parsed.
    pub fn parsed_size(&self) -> u64 {
        self.size
    }

    /// Parses a comment from the current stream position.
    ///
    /// `max_size` bounds how many bytes the comment may occupy (the
    /// enclosing packet or block size). Truncation is a critical error;
    /// individual malformed fields only produce warnings and are skipped.
    pub fn parse(
        &mut self,
        stream: &mut ByteStream,
        max_size: u64,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let start = stream.tell();
        let result = self.parse_inner(stream, max_size, flags, diag);
        self.size = stream.tell() - start;
        if let Err(TagError::TruncatedData(_)) = &result {
            diag.add(DiagLevel::Critical, "Vorbis comment is truncated.", CONTEXT_PARSE);
        }
        result
    }

    fn parse_inner(
        &mut self,
        stream: &mut ByteStream,
        max_size: u64,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let mut remaining = max_size;

        if !flags.has(VorbisCommentFlags::NO_SIGNATURE) {
            take(&mut remaining, 7)?;
            let mut sig = [0u8; 7];
            stream.read_exact(&mut sig)?;
            // one byte of packet-type discriminator, then "vorbis"
            if !(0x03..=0x05).contains(&sig[0]) || &sig[1..] != b"vorbis" {
                diag.add(DiagLevel::Critical, "Signature is invalid.", CONTEXT_PARSE);
                return Err(TagError::InvalidData(
                    "Vorbis comment signature is invalid".into(),
                ));
            }
        }

        // vendor string (length-prefixed)
        take(&mut remaining, 4)?;
        let vendor_len = u64::from(stream.read_u32_le()?);
        if vendor_len > remaining {
            diag.add(
                DiagLevel::Critical,
                "Vendor information is truncated.",
                CONTEXT_PARSE,
            );
            return Err(TagError::TruncatedData("vendor exceeds the comment".into()));
        }
        remaining -= vendor_len;
        let vendor_bytes = stream.read_bytes(vendor_len)?;
        self.vendor = match String::from_utf8(vendor_bytes) {
            Ok(vendor) => TagValue::Text {
                value: vendor,
                encoding: TextEncoding::Utf8,
            },
            Err(err) => {
                diag.add(
                    DiagLevel::Warning,
                    "Vendor string is not valid UTF-8; replacing invalid sequences.",
                    CONTEXT_PARSE,
                );
                TagValue::Text {
                    value: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    encoding: TextEncoding::Utf8,
                }
            }
        };

        // fields
        take(&mut remaining, 4)?;
        let field_count = stream.read_u32_le()?;
        tracing::debug!(field_count, vendor = ?self.vendor, "reading Vorbis comment fields");
        for _ in 0..field_count {
            if let Some(field) = Self::parse_field(stream, &mut remaining, flags, diag)? {
                self.fields.insert(field);
            }
        }

        if !flags.has(VorbisCommentFlags::NO_FRAMING_BYTE) {
            take(&mut remaining, 1)?;
            stream.read_u8()?;
        }

        self.normalize_date_fields();
        Ok(())
    }

    fn parse_field(
        stream: &mut ByteStream,
        remaining: &mut u64,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<Option<TagField>> {
        take(remaining, 4)?;
        let len = u64::from(stream.read_u32_le()?);
        if len > *remaining {
            return Err(TagError::TruncatedData("field exceeds the comment".into()));
        }
        *remaining -= len;
        let bytes = stream.read_bytes(len)?;

        let Some(eq) = bytes.iter().position(|&b| b == b'=') else {
            diag.add(
                DiagLevel::Warning,
                "Field without '=' separator; skipping it.",
                CONTEXT_PARSE,
            );
            return Ok(None);
        };
        let key_bytes = &bytes[..eq];
        if key_bytes.is_empty() || !key_bytes.iter().all(|b| (0x20..=0x7D).contains(b)) {
            diag.add(
                DiagLevel::Warning,
                "Field identifier contains invalid characters; skipping the field.",
                CONTEXT_PARSE,
            );
            return Ok(None);
        }
        let key = String::from_utf8_lossy(key_bytes).into_owned();
        let value_bytes = &bytes[eq + 1..];

        if key.eq_ignore_ascii_case(COVER_FIELD) {
            if flags.has(VorbisCommentFlags::NO_COVERS) {
                return Ok(None);
            }
            use base64::prelude::*;
            let decoded = match BASE64_STANDARD.decode(value_bytes) {
                Ok(decoded) => decoded,
                Err(_) => {
                    diag.add(
                        DiagLevel::Warning,
                        "Cover field is not valid base64; skipping it.",
                        CONTEXT_PARSE,
                    );
                    return Ok(None);
                }
            };
            return match picture::parse(&decoded) {
                Ok(pic) => Ok(Some(TagField::new(key, TagValue::Picture(pic)))),
                Err(_) => {
                    diag.add(
                        DiagLevel::Warning,
                        "Cover field does not contain a valid picture block; skipping it.",
                        CONTEXT_PARSE,
                    );
                    Ok(None)
                }
            };
        }

        let value = String::from_utf8_lossy(value_bytes).into_owned();
        Ok(Some(TagField::new(key, TagValue::text(value))))
    }

    /// Moves `YEAR` fields under `DATE` when no `DATE` field exists.
    ///
    /// `DATE` is the official identifier; `YEAR` appears in some files and
    /// is read the way established players read it.
    fn normalize_date_fields(&mut self) {
        if self.fields.contains("DATE") {
            return;
        }
        let years = self.fields.remove("YEAR");
        for mut field in years {
            field.id = "DATE".into();
            self.fields.insert(field);
        }
    }

    /// Serializes the comment.
    ///
    /// Fields with empty values are skipped; fields whose value cannot be
    /// rendered produce a warning and are omitted. The field count is
    /// back-patched once the surviving fields are known.
    pub fn make(&self, flags: VorbisCommentFlags, diag: &mut Diagnostics) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if !flags.has(VorbisCommentFlags::NO_SIGNATURE) {
            buf.push(0x03);
            buf.extend_from_slice(b"vorbis");
        }

        let vendor = match self.vendor.to_display_string() {
            Ok(vendor) => vendor,
            Err(_) => {
                diag.add(
                    DiagLevel::Warning,
                    "Cannot convert the assigned vendor to a string.",
                    CONTEXT_MAKE,
                );
                String::new()
            }
        };
        buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        buf.extend_from_slice(vendor.as_bytes());

        let count_offset = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut written = 0u32;
        for field in &self.fields {
            if field.value.is_empty() {
                continue;
            }
            if Self::make_field(&mut buf, field, flags, diag)? {
                written += 1;
            }
        }
        buf[count_offset..count_offset + 4].copy_from_slice(&written.to_le_bytes());

        if !flags.has(VorbisCommentFlags::NO_FRAMING_BYTE) {
            buf.push(0x01);
        }
        Ok(buf)
    }

    fn make_field(
        buf: &mut Vec<u8>,
        field: &TagField,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> Result<bool> {
        if !field.id.is_ascii() || field.id.contains('=') {
            diag.add(
                DiagLevel::Warning,
                format!("Field identifier \"{}\" is invalid; omitting the field.", field.id),
                CONTEXT_MAKE,
            );
            return Ok(false);
        }

        let value: Vec<u8> = match &field.value {
            TagValue::Picture(pic) => {
                if flags.has(VorbisCommentFlags::NO_COVERS) {
                    return Ok(false);
                }
                use base64::prelude::*;
                BASE64_STANDARD.encode(picture::make(pic)).into_bytes()
            }
            other => match other.to_display_string() {
                Ok(text) => text.into_bytes(),
                Err(_) => {
                    diag.add(
                        DiagLevel::Warning,
                        format!(
                            "Value of field \"{}\" cannot be rendered; omitting the field.",
                            field.id
                        ),
                        CONTEXT_MAKE,
                    );
                    return Ok(false);
                }
            },
        };

        let len = field.id.len() + 1 + value.len();
        buf.extend_from_slice(&(len as u32).to_le_bytes());
        buf.extend_from_slice(field.id.as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(&value);
        Ok(true)
    }
}

impl Tag for VorbisComment {
    fn tag_type(&self) -> TagType {
        TagType::VorbisComment
    }

    fn field_id(&self, field: KnownField) -> Option<&'static str> {
        Some(match field {
            KnownField::Title => "TITLE",
            KnownField::Album => "ALBUM",
            KnownField::Artist => "ARTIST",
            KnownField::AlbumArtist => "ALBUMARTIST",
            KnownField::Comment => "COMMENT",
            KnownField::Composer => "COMPOSER",
            KnownField::Description => "DESCRIPTION",
            KnownField::Encoder => "ENCODER",
            KnownField::EncoderSettings => "ENCODER_OPTIONS",
            KnownField::Genre => "GENRE",
            KnownField::Grouping => "GROUPING",
            KnownField::Language => "LANGUAGE",
            KnownField::Lyricist => "LYRICIST",
            KnownField::Lyrics => "LYRICS",
            KnownField::Performers => "PERFORMER",
            KnownField::RecordDate => "DATE",
            KnownField::RecordLabel => "LABEL",
            KnownField::TrackPosition => "TRACKNUMBER",
            KnownField::DiskPosition => "DISCNUMBER",
            KnownField::PartNumber => "PARTNUMBER",
            KnownField::Cover => COVER_FIELD,
            KnownField::Vendor => return None,
        })
    }

    fn known_field(&self, id: &str) -> Option<KnownField> {
        let table: &[(&str, KnownField)] = &[
            ("TITLE", KnownField::Title),
            ("ALBUM", KnownField::Album),
            ("ARTIST", KnownField::Artist),
            ("ALBUMARTIST", KnownField::AlbumArtist),
            ("COMMENT", KnownField::Comment),
            ("COMPOSER", KnownField::Composer),
            ("DESCRIPTION", KnownField::Description),
            ("ENCODER", KnownField::Encoder),
            ("ENCODER_OPTIONS", KnownField::EncoderSettings),
            ("GENRE", KnownField::Genre),
            ("GROUPING", KnownField::Grouping),
            ("LANGUAGE", KnownField::Language),
            ("LYRICIST", KnownField::Lyricist),
            ("LYRICS", KnownField::Lyrics),
            ("PERFORMER", KnownField::Performers),
            ("DATE", KnownField::RecordDate),
            ("YEAR", KnownField::RecordDate),
            ("LABEL", KnownField::RecordLabel),
            ("TRACKNUMBER", KnownField::TrackPosition),
            ("DISCNUMBER", KnownField::DiskPosition),
            ("PARTNUMBER", KnownField::PartNumber),
            (COVER_FIELD, KnownField::Cover),
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
        if field == KnownField::Vendor {
            if self.vendor.is_empty() {
                return None;
            }
            return Some(&self.vendor);
        }
        let id = self.field_id(field)?;
        self.fields.get(id).map(|f| &f.value)
    }

    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        if field == KnownField::Vendor {
            self.vendor = value;
            return true;
        }
        let Some(id) = self.field_id(field) else {
            return false;
        };
        self.fields.remove(id);
        if !value.is_empty() {
            self.fields.insert(TagField::new(id, value));
        }
        true
    }

    fn supports_field(&self, field: KnownField) -> bool {
        field == KnownField::Vendor || self.field_id(field).is_some()
    }
}

fn take(remaining: &mut u64, count: u64) -> Result<()> {
    if *remaining < count {
        return Err(TagError::TruncatedData(
            "Vorbis comment ends prematurely".into(),
        ));
    }
    *remaining -= count;
    Ok(())
}
