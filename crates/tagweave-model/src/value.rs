//! Typed values carried by tag fields.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagError};

/// Character encoding of a textual tag value as stored in the file.
///
/// Values are always held as Rust strings in memory; the encoding records
/// how the text was (or should be) serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    Latin1,
    #[default]
    Utf8,
    Utf16LittleEndian,
    Utf16BigEndian,
}

/// An embedded picture, e.g. a cover image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Picture {
    pub mime_type: String,
    pub description: String,
    /// Picture type code as defined by the hosting format (3 = front cover).
    pub picture_type: u32,
    pub data: Vec<u8>,
}

/// The value of a single tag field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TagValue {
    #[default]
    Empty,
    Text {
        value: String,
        encoding: TextEncoding,
    },
    Integer(i64),
    Binary(Vec<u8>),
    Picture(Picture),
}

impl TagValue {
    /// Convenience constructor for UTF-8 text.
    pub fn text(value: impl Into<String>) -> Self {
        TagValue::Text {
            value: value.into(),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TagValue::Empty => true,
            TagValue::Text { value, .. } => value.is_empty(),
            TagValue::Integer(_) => false,
            TagValue::Binary(data) => data.is_empty(),
            TagValue::Picture(picture) => picture.data.is_empty(),
        }
    }

    /// Renders the value as display text.
    ///
    /// Binary and picture values have no textual representation and yield a
    /// [`TagError::Conversion`].
    pub fn to_display_string(&self) -> Result<String> {
        match self {
            TagValue::Empty => Ok(String::new()),
            TagValue::Text { value, .. } => Ok(value.clone()),
            TagValue::Integer(value) => Ok(value.to_string()),
            TagValue::Binary(_) => Err(TagError::Conversion(
                "binary value has no textual representation".into(),
            )),
            TagValue::Picture(_) => Err(TagError::Conversion(
                "picture value has no textual representation".into(),
            )),
        }
    }

    /// Interprets the value as an integer, parsing text decimally.
    pub fn to_integer(&self) -> Result<i64> {
        match self {
            TagValue::Integer(value) => Ok(*value),
            TagValue::Text { value, .. } => value.trim().parse::<i64>().map_err(|_| {
                TagError::Conversion(format!("\"{value}\" is not a decimal number"))
            }),
            TagValue::Empty => Err(TagError::Conversion("value is empty".into())),
            _ => Err(TagError::Conversion(
                "value is not convertible to an integer".into(),
            )),
        }
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text {
            value,
            encoding: TextEncoding::Utf8,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Integer(value)
    }
}
