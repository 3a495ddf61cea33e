//! Splitting an image into its segments.
//!
//! - [`boundary`] - Where each segment starts, as a fold over lengths
//! - [`segmenter`] - Sniffing and decompressing the segment at a boundary
//! - [`layout`] - `segment{N}/` and `segment{N}.meta` naming and enumeration
//!
//! [`walk_segments`] ties the three together. Extraction and listing differ
//! only in what they do with each decompressed payload.

pub mod boundary;
pub mod layout;
pub mod segmenter;

use anyhow::Result;
use std::path::Path;

use crate::artifact::cpio::Decoded;
use crate::artifact::SegmentDescriptor;
use crate::config::Config;
use crate::error::ValidationError;
use boundary::{align_up, Boundary, EndReason, Step};
use segmenter::{open_segment, Opened, SegmentPayload};

/// What the walk learned about one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub index: usize,
    pub offset: usize,
    /// Encoded length rounded up to the block size.
    pub byte_length: usize,
    pub descriptor: SegmentDescriptor,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub segments: Vec<SegmentSummary>,
    pub end: EndReason,
}

impl WalkReport {
    /// Fail when not even the first segment decoded.
    pub fn require_segments(self, image: &Path) -> Result<Self> {
        if self.segments.is_empty() {
            log::warn!("{}: first segment unreadable: {}", image.display(), self.end);
            return Err(ValidationError::NotAnInitramfs(image.to_path_buf()).into());
        }
        Ok(self)
    }
}

/// Walk every segment of `image` in order.
///
/// `visit` decodes the payload of one segment and reports the outcome. A
/// malformed archive, an undecodable compressed stream or a boundary that
/// does not advance ends the walk normally; only errors returned by `visit`
/// or by scratch I/O abort it.
pub fn walk_segments<F>(image: &[u8], config: &Config, mut visit: F) -> Result<WalkReport>
where
    F: FnMut(Boundary, &mut SegmentPayload<'_>) -> Result<Decoded>,
{
    let scratch_dir = config.scratch_dir();
    let mut segments = Vec::new();
    let mut step = Boundary::FIRST.check(image, config.block_size);

    let end = loop {
        let at = match step {
            Step::Segment(at) => at,
            Step::End(reason) => break reason,
        };
        step = match walk_one(image, at, config, &scratch_dir, &mut visit)? {
            (Some(summary), next) => {
                segments.push(summary);
                next
            }
            (None, next) => next,
        };
    };

    log::debug!("walk ended after {} segment(s): {end}", segments.len());
    Ok(WalkReport { segments, end })
}

fn walk_one<F>(
    image: &[u8],
    at: Boundary,
    config: &Config,
    scratch_dir: &Path,
    visit: &mut F,
) -> Result<(Option<SegmentSummary>, Step)>
where
    F: FnMut(Boundary, &mut SegmentPayload<'_>) -> Result<Decoded>,
{
    let mut payload = match open_segment(&image[at.offset..], scratch_dir)? {
        Opened::Payload(payload) => payload,
        Opened::Unreadable(reason) => {
            log::warn!("segment {} at offset {}: {reason}", at.index, at.offset);
            return Ok((None, Step::End(EndReason::Malformed(reason))));
        }
    };

    let entries = match visit(at, &mut payload)? {
        Decoded::Complete { consumed, entries } => {
            if payload.encoded_len.is_none() {
                payload.encoded_len = Some(consumed as usize);
            }
            entries
        }
        Decoded::Malformed(reason) => {
            if at.index == 0 {
                log::debug!("offset {}: {reason}", at.offset);
            } else {
                log::info!(
                    "stopping at offset {} after {} segment(s): {reason}",
                    at.offset,
                    at.index
                );
            }
            return Ok((None, Step::End(EndReason::Malformed(reason))));
        }
    };

    if payload.has_trailing_data()? {
        log::warn!(
            "segment {}: data after the archive trailer inside the {} stream is not kept",
            at.index,
            payload.descriptor.compression
        );
    }

    let encoded_len = payload.encoded_len.unwrap_or_default();
    let summary = SegmentSummary {
        index: at.index,
        offset: at.offset,
        byte_length: align_up(encoded_len, config.block_size),
        descriptor: payload.descriptor.clone(),
        entries,
    };
    log::info!(
        "segment {}: offset {}, {} bytes, {} entries, compression={}",
        summary.index,
        summary.offset,
        encoded_len,
        summary.entries,
        summary.descriptor.compression
    );

    let next = at.advance(encoded_len, image, config.block_size);
    if next == Step::End(EndReason::NoAdvance) {
        log::warn!(
            "segment {} reported no progress at offset {}; stopping",
            at.index,
            at.offset
        );
    }
    Ok((Some(summary), next))
}
