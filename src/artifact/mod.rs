//! Building blocks for initramfs segments.
//!
//! - [`sniff`] - Content-based detection of compression and archive magic
//! - [`compression`] - gzip/zstd decoding with exact member lengths, encoders
//! - [`cpio`] - newc decoding into sinks, directory encoding
//! - [`descriptor`] - The `segment{N}.meta` sidecar record
//! - [`counting`] - Byte-counting reader and writer adapters

pub mod compression;
pub mod counting;
pub mod cpio;
pub mod descriptor;
pub mod sniff;

pub use compression::SegmentEncoder;
pub use descriptor::SegmentDescriptor;
pub use sniff::Compression;
