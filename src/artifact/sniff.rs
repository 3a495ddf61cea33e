//! Content sniffing.
//!
//! Segments carry no framing of their own, so the only way to tell what
//! sits at an offset is to look at its first bytes.

use std::fmt;
use std::str::FromStr;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const NEWC_MAGIC: &[u8; 6] = b"070701";
const NEWC_CRC_MAGIC: &[u8; 6] = b"070702";

/// gzip header byte holding the "extra flags" (XFL).
const GZIP_XFL_OFFSET: usize = 8;
const GZIP_XFL_BEST: u8 = 2;
const GZIP_XFL_FAST: u8 = 4;

/// Compression wrapper around a segment's CPIO archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(format!("unknown compression '{other}'")),
        }
    }
}

/// Detect the compression at the start of `data`.
///
/// Unrecognized content is assumed to be an uncompressed archive.
pub fn detect_compression(data: &[u8]) -> Compression {
    match data {
        [0x1f, 0x8b, ..] => Compression::Gzip,
        [0x28, 0xb5, 0x2f, 0xfd, ..] => Compression::Zstd,
        _ => Compression::None,
    }
}

pub fn is_newc_archive(data: &[u8]) -> bool {
    data.starts_with(NEWC_MAGIC) || data.starts_with(NEWC_CRC_MAGIC)
}

/// Whether `data` can be the start of an initramfs image at all.
pub fn looks_like_initramfs(data: &[u8]) -> bool {
    is_newc_archive(data) || data.starts_with(&GZIP_MAGIC) || data.starts_with(&ZSTD_MAGIC)
}

/// Compressor flags implied by a gzip member header.
///
/// gzip records `XFL=2` when the member was written at maximum compression
/// and `XFL=4` for the fastest level.
pub fn gzip_codec_args(header: &[u8]) -> String {
    match header.get(GZIP_XFL_OFFSET) {
        Some(&GZIP_XFL_BEST) => "-9".to_string(),
        Some(&GZIP_XFL_FAST) => "-1".to_string(),
        _ => String::new(),
    }
}
