//! Isolating the archive that starts at a boundary.
//!
//! Nothing in an image says how long a segment is. The segmenter sniffs the
//! bytes at a boundary, records the compression in a [`SegmentDescriptor`]
//! and hands back a readable, decompressed payload. For compressed segments
//! the compressed length is known as soon as the member has been inflated;
//! for plain ones it is whatever the CPIO decoder ends up consuming.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::Path;

use crate::artifact::compression::{decompress_member, InflateOutcome};
use crate::artifact::sniff::{detect_compression, gzip_codec_args, Compression};
use crate::artifact::SegmentDescriptor;

/// Decompressed bytes of one segment.
pub enum PayloadReader<'a> {
    /// Uncompressed segment, read in place from the image.
    Image(&'a [u8]),
    /// Inflated segment staged in an unlinked scratch file.
    Scratch(BufReader<File>),
}

impl Read for PayloadReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Image(data) => data.read(buf),
            Self::Scratch(file) => file.read(buf),
        }
    }
}

pub struct SegmentPayload<'a> {
    pub descriptor: SegmentDescriptor,
    /// Compressed length, when the segment is compressed.
    pub encoded_len: Option<usize>,
    reader: PayloadReader<'a>,
}

impl<'a> SegmentPayload<'a> {
    pub fn reader(&mut self) -> &mut PayloadReader<'a> {
        &mut self.reader
    }

    /// Whether a compressed payload holds non-zero bytes past the point the
    /// decoder stopped. Such bytes are not carried into `segment{N}/`.
    pub fn has_trailing_data(&mut self) -> Result<bool> {
        let PayloadReader::Scratch(file) = &mut self.reader else {
            return Ok(false);
        };
        let mut buf = [0u8; 8192];
        loop {
            let n = file
                .read(&mut buf)
                .context("reading decompressed segment tail")?;
            if n == 0 {
                return Ok(false);
            }
            if buf[..n].iter().any(|b| *b != 0) {
                return Ok(true);
            }
        }
    }
}

pub enum Opened<'a> {
    Payload(SegmentPayload<'a>),
    /// Sniffed as compressed but did not decompress.
    Unreadable(String),
}

/// Open the segment at the start of `data`.
///
/// Compressed segments are inflated into a scratch file under `scratch_dir`;
/// the file has no name and disappears when the payload is dropped.
pub fn open_segment<'a>(data: &'a [u8], scratch_dir: &Path) -> Result<Opened<'a>> {
    let compression = detect_compression(data);
    if !compression.is_compressed() {
        return Ok(Opened::Payload(SegmentPayload {
            descriptor: SegmentDescriptor::default(),
            encoded_len: None,
            reader: PayloadReader::Image(data),
        }));
    }

    let codec_args = match compression {
        Compression::Gzip => gzip_codec_args(data),
        _ => String::new(),
    };

    let scratch = tempfile::tempfile_in(scratch_dir)
        .with_context(|| format!("creating scratch file in '{}'", scratch_dir.display()))?;
    let mut writer = BufWriter::new(scratch);
    let inflated = match decompress_member(compression, data, &mut writer)? {
        InflateOutcome::Done(inflated) => inflated,
        InflateOutcome::Corrupt(err) => {
            return Ok(Opened::Unreadable(format!("{compression} stream: {err}")))
        }
    };
    let mut scratch = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .context("flushing scratch file")?;
    scratch
        .seek(SeekFrom::Start(0))
        .context("rewinding scratch file")?;

    log::debug!(
        "{} member: {} bytes -> {} bytes{}",
        compression,
        inflated.encoded_len,
        inflated.decoded_len,
        if codec_args.is_empty() {
            String::new()
        } else {
            format!(" ({codec_args})")
        }
    );

    Ok(Opened::Payload(SegmentPayload {
        descriptor: SegmentDescriptor::new(compression, codec_args),
        encoded_len: Some(inflated.encoded_len),
        reader: PayloadReader::Scratch(BufReader::new(scratch)),
    }))
}
