//! Image rebuild.
//!
//! Walks `segment0/`, `segment1/`, ... until the first missing index,
//! re-encodes each tree as newc, applies the compression recorded in its
//! `segment{N}.meta` and concatenates the results. Every segment is padded
//! with zeros to the block size so extraction finds the same boundaries.

use anyhow::{Context, Result};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::artifact::counting::CountingWriter;
use crate::artifact::cpio::{encode, Encoded};
use crate::artifact::{SegmentDescriptor, SegmentEncoder};
use crate::config::Config;
use crate::error::ValidationError;
use crate::segment::boundary::align_up;
use crate::segment::layout::{
    descriptor_path, is_extracted_tree, orphaned_segments, segment_dir, segment_indices,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuiltSegment {
    pub index: usize,
    pub descriptor: SegmentDescriptor,
    pub entries: usize,
    /// Bytes written before block padding.
    pub encoded_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub segments: Vec<RebuiltSegment>,
    pub image_len: u64,
}

/// Rebuild the tree under `root` into the image file `output`.
///
/// The image is staged next to `output` and renamed over it once complete.
pub fn rebuild_image(root: &Path, output: &Path, config: &Config) -> Result<RebuildReport> {
    if !is_extracted_tree(root) {
        return Err(ValidationError::MissingSegmentZero(root.to_path_buf()).into());
    }

    let parent = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temporary image in '{}'", parent.display()))?;

    log::info!("rebuilding '{}' from '{}'", output.display(), root.display());
    let (writer, report) = rebuild_to_writer(root, BufWriter::new(staged), config)?;
    let staged = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .context("flushing rebuilt image")?;
    staged
        .persist(output)
        .map_err(|err| err.error)
        .with_context(|| format!("writing image '{}'", output.display()))?;

    log::info!(
        "wrote {} segment(s), {} bytes",
        report.segments.len(),
        report.image_len
    );
    Ok(report)
}

/// Rebuild the tree under `root` into `out`, returning the writer when done.
pub fn rebuild_to_writer<W: Write>(
    root: &Path,
    out: W,
    config: &Config,
) -> Result<(W, RebuildReport)> {
    let mut out = CountingWriter::new(out);
    let mut segments = Vec::new();

    let mut indices = segment_indices(root);
    for index in indices.by_ref() {
        let segment = rebuild_segment(root, index, &mut out, config)
            .with_context(|| format!("rebuilding segment {index}"))?;
        log::info!(
            "segment {}: {} entries, {} bytes, compression={}",
            index,
            segment.entries,
            segment.encoded_len,
            segment.descriptor.compression
        );
        segments.push(segment);
    }

    for orphan in orphaned_segments(root, indices.gap())? {
        log::warn!(
            "segment{} ignored: segment{} is missing",
            orphan,
            indices.gap()
        );
    }

    out.flush().context("flushing image")?;
    let image_len = out.count();
    Ok((out.into_inner(), RebuildReport { segments, image_len }))
}

fn rebuild_segment<W: Write>(
    root: &Path,
    index: usize,
    out: &mut CountingWriter<W>,
    config: &Config,
) -> Result<RebuiltSegment> {
    let descriptor = SegmentDescriptor::read(&descriptor_path(root, index))?;
    let start = out.count();

    let encoder = SegmentEncoder::new(
        descriptor.compression,
        &descriptor.codec_args,
        config,
        &mut *out,
    )?;
    let Encoded { writer, entries } =
        encode(&segment_dir(root, index), encoder, config.ownership)?;
    writer
        .finish()
        .with_context(|| format!("finishing {} stream", descriptor.compression))?;

    let encoded_len = out.count() - start;
    let padded = align_up(encoded_len as usize, config.block_size) as u64;
    let padding = vec![0u8; (padded - encoded_len) as usize];
    out.write_all(&padding).context("padding segment")?;

    Ok(RebuiltSegment {
        index,
        descriptor,
        entries,
        encoded_len,
    })
}
