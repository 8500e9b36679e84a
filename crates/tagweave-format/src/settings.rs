//! Behaviour settings controlling parsing depth and the save path.

use std::path::PathBuf;

use tagweave_model::ElementPosition;

/// Maximum file size for which a linear full scan is attempted when a
/// format provides no index to jump by (50 MiB).
pub const DEFAULT_MAX_FULL_PARSE_SIZE: u64 = 50 * 1024 * 1024;

/// Options consulted while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Analyse the file structure exhaustively even when heuristics would
    /// skip deep scans.
    pub force_full_parse: bool,
    /// Upper file-size bound for linear scans without an index.
    pub max_full_parse_size: u64,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            force_full_parse: false,
            max_full_parse_size: DEFAULT_MAX_FULL_PARSE_SIZE,
        }
    }
}

/// Options consulted while applying changes.
#[derive(Debug, Clone, Default)]
pub struct SaveSettings {
    /// Where backup files go; next to the original when unset.
    pub backup_directory: Option<PathBuf>,
    /// When set, changes are written to this path and the original file is
    /// left untouched; on success it becomes the new working path.
    pub save_file_path: Option<PathBuf>,
    /// Embedded as container-level metadata where the format supports it.
    pub writing_application: Option<String>,
    /// Never splice; always rewrite the whole file.
    pub force_rewrite: bool,
    /// Splice is only taken when the resulting padding lands in
    /// `min_padding..=max_padding` (or vanishes entirely).
    pub min_padding: u64,
    pub max_padding: u64,
    /// Padding written when the file is rewritten anyway.
    pub preferred_padding: u64,
    pub tag_position: ElementPosition,
    /// Fail instead of degrading when the requested tag position is not
    /// supported by the format.
    pub force_tag_position: bool,
    pub index_position: ElementPosition,
    pub force_index_position: bool,
}
