// deepscan/src/error.rs
//
// Request-level and media-level errors. Only `DetectError` reaches the caller;
// detector and fusion failures degrade instead of erroring.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("unsupported {kind} type: .{extension}")]
    UnsupportedExtension { kind: crate::types::MediaKind, extension: String },

    #[error("file has no extension: {0}")]
    MissingExtension(PathBuf),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("temporary artifacts: {0}")]
    Artifacts(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// True for the errors raised before any temporary state exists.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedExtension { .. }
                | Self::MissingExtension(_)
                | Self::NotAFile(_)
                | Self::FileTooLarge { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("cannot decode frame {path}: {source}")]
    Frame { path: PathBuf, source: image::ImageError },

    #[error("cannot read audio {path}: {source}")]
    Audio { path: PathBuf, source: hound::Error },

    #[error("audio track is empty: {0}")]
    EmptyAudio(PathBuf),
}
