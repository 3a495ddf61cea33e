//! Split concatenated initramfs images into editable trees and rebuild them.
//!
//! An initramfs image is one or more CPIO "newc" archives laid end to end,
//! each optionally gzip- or zstd-compressed. Nothing in the image records
//! where one archive stops and the next begins, so extraction discovers the
//! boundaries one segment at a time and writes down how each segment was
//! compressed. Rebuild replays that record.
//!
//! # Architecture
//!
//! ```text
//! image bytes ──► segment::walk_segments ──► extract ──► segment{N}/ + segment{N}.meta
//!                   │  boundary (fold over lengths)           │
//!                   │  segmenter (sniff + inflate)            ▼
//!                   └► artifact::cpio::decode            rebuild ──► image bytes
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use initramfs_split::{extract_image, rebuild_image, Config};
//! use std::path::Path;
//!
//! let config = Config::load()?;
//! extract_image(Path::new("/boot/initrd.img"), Path::new("work/"), &config)?;
//! // edit work/segment1/...
//! rebuild_image(Path::new("work/"), Path::new("initrd.new"), &config)?;
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod extract;
pub mod rebuild;
pub mod scan;
pub mod segment;

pub use config::Config;
pub use error::ValidationError;
pub use extract::{extract_image, ExtractReport};
pub use rebuild::{rebuild_image, RebuildReport};
pub use scan::{scan_image, ScanReport};
