//! Error types shared by all tagweave crates.

use thiserror::Error;

/// Errors that can occur while parsing or writing media file metadata.
#[derive(Error, Debug)]
pub enum TagError {
    #[error("No data found at the required offset")]
    NoDataFound,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Truncated data: {0}")]
    TruncatedData(String),

    #[error("Cannot convert tag value: {0}")]
    Conversion(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Operation aborted")]
    OperationAbort,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TagError {
    /// Short kind name used as diagnostic context.
    pub fn kind(&self) -> &'static str {
        match self {
            TagError::NoDataFound => "no data found",
            TagError::InvalidData(_) => "invalid data",
            TagError::TruncatedData(_) => "truncated data",
            TagError::Conversion(_) => "conversion error",
            TagError::NotSupported(_) => "not supported",
            TagError::OperationAbort => "aborted",
            TagError::Io(_) => "io error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TagError>;
