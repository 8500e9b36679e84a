//! Diagnostic messages collected while parsing and writing files.
//!
//! Engines never print; they append to a [`Diagnostics`] collector which the
//! embedding application inspects afterwards. A single parse may produce
//! several warnings and still succeed, so the collector is append-only and
//! ordered by call sequence.

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagLevel {
    Debug,
    Information,
    Warning,
    Critical,
}

impl DiagLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagLevel::Debug => "debug",
            DiagLevel::Information => "information",
            DiagLevel::Warning => "warning",
            DiagLevel::Critical => "critical",
        }
    }
}

/// A single diagnostic record: what happened and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagMessage {
    pub level: DiagLevel,
    pub message: String,
    /// Which operation produced the message, e.g. "parsing Vorbis comment".
    pub context: String,
}

/// Append-only collector of diagnostic messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    messages: Vec<DiagMessage>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, level: DiagLevel, message: impl Into<String>, context: impl Into<String>) {
        self.messages.push(DiagMessage {
            level,
            message: message.into(),
            context: context.into(),
        });
    }

    /// The worst level recorded so far, or `None` when empty.
    pub fn level(&self) -> Option<DiagLevel> {
        self.messages.iter().map(|m| m.level).max()
    }

    pub fn has_critical(&self) -> bool {
        self.messages.iter().any(|m| m.level == DiagLevel::Critical)
    }

    pub fn messages(&self) -> &[DiagMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagMessage;
    type IntoIter = std::slice::Iter<'a, DiagMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
