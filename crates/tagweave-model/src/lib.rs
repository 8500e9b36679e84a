//! # tagweave-model
//!
//! Format-independent data model for the tagweave metadata library:
//! typed tag values, the abstract [`Tag`] interface with its portable
//! [`KnownField`] facade, track/chapter/attachment descriptors, the
//! diagnostics collector, and the shared error taxonomy.
//!
//! Everything that touches bytes lives in `tagweave-format`; this crate is
//! pure data and is usable on its own by applications that only consume
//! parse results.

pub mod attachment;
pub mod chapter;
pub mod diag;
pub mod error;
pub mod field;
pub mod progress;
pub mod tag;
pub mod track;
pub mod types;
pub mod value;

pub use attachment::{Attachment, AttachmentData};
pub use chapter::{Chapter, ChapterLabel};
pub use diag::{DiagLevel, DiagMessage, Diagnostics};
pub use error::{Result, TagError};
pub use field::{FieldMap, TagField};
pub use progress::AbortableProgressFeedback;
pub use tag::{KnownField, Tag, TagTarget, TagType};
pub use track::{MediaFormat, MediaType, Track};
pub use types::{ElementPosition, ParsingStatus};
pub use value::{Picture, TagValue, TextEncoding};
