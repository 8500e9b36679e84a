//! Small shared enums describing parsing state and element placement.

use serde::{Deserialize, Serialize};

/// Whether a certain facet of a file (tracks, tags, ...) has been parsed
/// yet, and what the outcome was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParsingStatus {
    /// The facet has not been parsed yet.
    #[default]
    NotParsedYet,
    /// The facet has been parsed without critical errors.
    Ok,
    /// Parsing was attempted but the format is not supported.
    NotSupported,
    /// Parsing was attempted but critical errors occurred.
    CriticalFailure,
}

impl ParsingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStatus::NotParsedYet => "not parsed yet",
            ParsingStatus::Ok => "ok",
            ParsingStatus::NotSupported => "not supported",
            ParsingStatus::CriticalFailure => "critical failure",
        }
    }
}

/// Placement of a tag or index region relative to the media data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementPosition {
    /// Put (or found) the element before the media data.
    #[default]
    BeforeData,
    /// Put (or found) the element after the media data.
    AfterData,
    /// Keep the current position; undetermined when reported.
    Keep,
}

impl ElementPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementPosition::BeforeData => "before data",
            ElementPosition::AfterData => "after data",
            ElementPosition::Keep => "keep",
        }
    }
}
