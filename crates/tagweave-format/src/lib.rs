//! # tagweave-format
//!
//! Container-format dispatcher and metadata I/O engines: reads and writes
//! embedded tags, track descriptors, chapters and attachments in media
//! container files.
//!
//! ## Overview
//!
//! [`MediaFile`] is the entry point. It sniffs the container format from
//! the leading bytes, dispatches to the matching engine (the EBML-based
//! Matroska/WebM container, the ADTS/MPEG frame-stream reader, the FLAC
//! block walker with its Vorbis comment, or the ID3 readers), exposes the
//! parsed state through the abstract interfaces of `tagweave-model`, and
//! writes modifications back. Existing padding is reused in place when the
//! configured padding policy allows it; otherwise the file is rewritten
//! through a backup.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tagweave_format::MediaFile;
//! use tagweave_model::{AbortableProgressFeedback, Diagnostics, KnownField, Tag, TagValue};
//!
//! let mut diag = Diagnostics::new();
//! let mut file = MediaFile::open("album.mka").unwrap();
//! file.parse_everything(&mut diag).unwrap();
//! for tag in file.tags_mut() {
//!     tag.set_value(KnownField::Title, TagValue::text("A Better Title"));
//! }
//! let progress = AbortableProgressFeedback::new();
//! file.apply_changes(&mut diag, &progress).unwrap();
//! ```

pub mod container;
pub mod ebml;
pub mod flac;
pub mod framestream;
pub mod id3;
pub mod io;
pub mod matroska;
pub mod mediafile;
pub mod planner;
pub mod settings;
pub mod signature;
pub mod vorbis;

pub use container::{Container, Facet};
pub use flac::FlacStream;
pub use framestream::FrameStream;
pub use id3::{Id3v1Tag, Id3v2Tag};
pub use io::ByteStream;
pub use matroska::{MatroskaContainer, MatroskaTag};
pub use mediafile::MediaFile;
pub use planner::SavePlan;
pub use settings::{ParseOptions, SaveSettings, DEFAULT_MAX_FULL_PARSE_SIZE};
pub use signature::ContainerFormat;
pub use vorbis::{VorbisComment, VorbisCommentFlags};
