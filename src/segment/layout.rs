//! On-disk layout of an extracted image.
//!
//! ```text
//! <root>/
//!   segment0/        unpacked tree of archive 0
//!   segment0.meta    its descriptor
//!   segment1/
//!   segment1.meta
//! ```
//!
//! The names and the gap-free numbering are the whole contract between
//! extraction and rebuild.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ValidationError;

const SEGMENT_PREFIX: &str = "segment";
const DESCRIPTOR_SUFFIX: &str = ".meta";

pub fn segment_name(index: usize) -> String {
    format!("{SEGMENT_PREFIX}{index}")
}

pub fn segment_dir(root: &Path, index: usize) -> PathBuf {
    root.join(segment_name(index))
}

pub fn descriptor_path(root: &Path, index: usize) -> PathBuf {
    root.join(format!("{}{DESCRIPTOR_SUFFIX}", segment_name(index)))
}

/// A tree counts as extracted once `segment0/` exists.
pub fn is_extracted_tree(root: &Path) -> bool {
    segment_dir(root, 0).is_dir()
}

/// Consecutive segment indices present under `root`, starting at 0.
///
/// Stops at the first index without a directory, so dropping a trailing
/// `segmentN/` drops that segment from a rebuild.
pub fn segment_indices(root: &Path) -> SegmentIndices {
    SegmentIndices {
        root: root.to_path_buf(),
        next: 0,
    }
}

#[derive(Debug, Clone)]
pub struct SegmentIndices {
    root: PathBuf,
    next: usize,
}

impl SegmentIndices {
    /// Index that ended the enumeration, once it has ended.
    pub fn gap(&self) -> usize {
        self.next
    }
}

impl Iterator for SegmentIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if segment_dir(&self.root, self.next).is_dir() {
            self.next += 1;
            Some(self.next - 1)
        } else {
            None
        }
    }
}

/// Segment directories past the first gap; these are ignored by a rebuild.
pub fn orphaned_segments(root: &Path, gap: usize) -> Result<Vec<usize>> {
    let mut orphans = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("reading '{}'", root.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let index = name
            .to_str()
            .and_then(|name| name.strip_prefix(SEGMENT_PREFIX))
            .and_then(|digits| digits.parse::<usize>().ok());
        if let Some(index) = index.filter(|index| *index > gap) {
            orphans.push(index);
        }
    }
    orphans.sort_unstable();
    Ok(orphans)
}

/// The extraction destination must exist, be a directory and be empty.
pub fn ensure_empty_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(ValidationError::NotADirectory(path.to_path_buf()).into());
    }
    let mut entries =
        fs::read_dir(path).with_context(|| format!("reading '{}'", path.display()))?;
    if entries.next().is_some() {
        return Err(ValidationError::DestinationNotEmpty(path.to_path_buf()).into());
    }
    Ok(())
}
