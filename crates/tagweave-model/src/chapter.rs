//! Chapter information.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One display string of a chapter in a particular language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLabel {
    pub text: String,
    /// ISO 639-2 language code; "und" when undeclared.
    pub language: String,
}

/// A single chapter, possibly with nested sub-chapters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chapter {
    pub uid: u64,
    pub start: Duration,
    pub end: Option<Duration>,
    pub labels: Vec<ChapterLabel>,
    pub nested: Vec<Chapter>,
    pub hidden: bool,
}

impl Chapter {
    /// The first display label, if any.
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(|l| l.text.as_str())
    }
}
