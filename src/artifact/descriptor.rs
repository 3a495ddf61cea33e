//! Segment descriptors.
//!
//! One `segment{N}.meta` file per segment records how that segment was
//! compressed so a rebuild can replay it without sniffing again. The file is
//! plain `key=value` text and meant to be edited by hand:
//!
//! ```text
//! compression=gzip
//! extra_args=-9
//! ```

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use super::sniff::Compression;
use crate::error::ValidationError;

const KEY_COMPRESSION: &str = "compression";
const KEY_EXTRA_ARGS: &str = "extra_args";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub compression: Compression,
    /// Compressor flags needed to reproduce the original stream, e.g. `-9`.
    pub codec_args: String,
}

impl SegmentDescriptor {
    pub fn new(compression: Compression, codec_args: impl Into<String>) -> Self {
        Self {
            compression,
            codec_args: codec_args.into(),
        }
    }

    /// Parse the sidecar text. `origin` only names the file in errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut descriptor = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ValidationError::InvalidDescriptor {
                    path: origin.to_path_buf(),
                    reason: format!("line {}: expected key=value, got '{line}'", lineno + 1),
                }
                .into());
            };
            match key.trim() {
                KEY_COMPRESSION => {
                    descriptor.compression = value.parse().map_err(|reason| {
                        ValidationError::InvalidDescriptor {
                            path: origin.to_path_buf(),
                            reason,
                        }
                    })?;
                }
                KEY_EXTRA_ARGS => descriptor.codec_args = value.trim().to_string(),
                other => {
                    log::warn!(
                        "{}: ignoring unknown key '{}' on line {}",
                        origin.display(),
                        other,
                        lineno + 1
                    );
                }
            }
        }
        Ok(descriptor)
    }

    /// Read a sidecar; a missing file yields the uncompressed default.
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!(
                    "{} missing; treating segment as uncompressed",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("reading descriptor '{}'", path.display()))
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())
            .with_context(|| format!("writing descriptor '{}'", path.display()))
    }
}

impl fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{KEY_COMPRESSION}={}", self.compression)?;
        writeln!(f, "{KEY_EXTRA_ARGS}={}", self.codec_args)
    }
}
