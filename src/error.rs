//! Validation failures.
//!
//! Everything here is detected before the tool mutates anything on disk.
//! The variants travel inside `anyhow::Error`; callers that need to tell a
//! validation failure apart from an I/O failure use `downcast_ref`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("not an initramfs image: {}", .0.display())]
    NotAnInitramfs(PathBuf),

    #[error("destination directory is not empty: {}", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no segment0 directory under {}; not an extracted initramfs tree", .0.display())]
    MissingSegmentZero(PathBuf),

    #[error("no output image path given")]
    MissingOutputPath,

    #[error("unsupported extra_args token '{token}' for {compression}")]
    InvalidCodecArgs { compression: String, token: String },

    #[error("invalid segment descriptor {}: {reason}", .path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// True when `err` (or anything in its context chain) is a [`ValidationError`].
pub fn is_validation_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ValidationError>().is_some())
}
