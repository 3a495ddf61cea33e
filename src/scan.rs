//! Read-only listing of an image's segments.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::artifact::cpio::{decode, Decoded, ListedEntry, ListingSink};
use crate::artifact::sniff::looks_like_initramfs;
use crate::config::Config;
use crate::error::ValidationError;
use crate::segment::boundary::EndReason;
use crate::segment::{walk_segments, SegmentSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentListing {
    pub summary: SegmentSummary,
    pub entries: Vec<ListedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub segments: Vec<SegmentListing>,
    pub end: EndReason,
}

/// List every segment of the image file at `image` without extracting it.
pub fn scan_image(image: &Path, config: &Config) -> Result<ScanReport> {
    let bytes = fs::read(image).with_context(|| format!("reading image '{}'", image.display()))?;
    if !looks_like_initramfs(&bytes) {
        return Err(ValidationError::NotAnInitramfs(image.to_path_buf()).into());
    }
    let report = scan_bytes(&bytes, config)?;
    if report.segments.is_empty() {
        return Err(ValidationError::NotAnInitramfs(image.to_path_buf()).into());
    }
    Ok(report)
}

pub fn scan_bytes(image: &[u8], config: &Config) -> Result<ScanReport> {
    let mut listings: Vec<Vec<ListedEntry>> = Vec::new();
    let walk = walk_segments(image, config, |_, payload| {
        let mut sink = ListingSink::default();
        let decoded = decode(payload.reader(), &mut sink)?;
        if matches!(decoded, Decoded::Complete { .. }) {
            listings.push(sink.entries);
        }
        Ok(decoded)
    })?;

    let segments = walk
        .segments
        .into_iter()
        .zip(listings)
        .map(|(summary, entries)| SegmentListing { summary, entries })
        .collect();
    Ok(ScanReport {
        segments,
        end: walk.end,
    })
}
