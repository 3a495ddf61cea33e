//! Image extraction.
//!
//! Splits an image into `segment{N}/` trees with a `segment{N}.meta`
//! descriptor beside each. Validation happens before anything is written:
//! the destination must be an empty directory and the image must sniff as
//! an initramfs. After that every I/O error aborts the run and leaves the
//! segments written so far in place for inspection.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::artifact::cpio::{decode, Decoded, DirectorySink};
use crate::artifact::sniff::looks_like_initramfs;
use crate::config::Config;
use crate::error::ValidationError;
use crate::segment::layout::{descriptor_path, ensure_empty_dir, segment_dir};
use crate::segment::{walk_segments, WalkReport};

/// Outcome of an extraction: one summary per `segment{N}/` written.
pub type ExtractReport = WalkReport;

/// Extract `image` into the empty directory `dest`.
pub fn extract_image(image: &Path, dest: &Path, config: &Config) -> Result<ExtractReport> {
    ensure_empty_dir(dest)?;
    let bytes = fs::read(image).with_context(|| format!("reading image '{}'", image.display()))?;
    if !looks_like_initramfs(&bytes) {
        return Err(ValidationError::NotAnInitramfs(image.to_path_buf()).into());
    }

    log::info!(
        "extracting '{}' ({} bytes) into '{}'",
        image.display(),
        bytes.len(),
        dest.display()
    );
    let report = extract_bytes(&bytes, dest, config)?.require_segments(image)?;
    log::info!(
        "extracted {} segment(s); {}",
        report.segments.len(),
        report.end
    );
    Ok(report)
}

/// Extract an in-memory image into `dest`, which must already be empty.
pub fn extract_bytes(image: &[u8], dest: &Path, config: &Config) -> Result<ExtractReport> {
    walk_segments(image, config, |at, payload| {
        let mut sink = DirectorySink::new(&segment_dir(dest, at.index), config)?;
        let decoded = decode(payload.reader(), &mut sink)?;
        match &decoded {
            Decoded::Complete { .. } => {
                payload
                    .descriptor
                    .write(&descriptor_path(dest, at.index))?;
            }
            Decoded::Malformed(_) => {
                log::debug!("discarding partial '{}'", sink.dest().display());
                sink.discard()?;
            }
        }
        Ok(decoded)
    })
}
