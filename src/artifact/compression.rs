//! Segment compression codecs.
//!
//! Decompression runs over the in-memory image so the number of compressed
//! bytes a single gzip member or zstd frame occupied can be measured exactly:
//! the buffered decoders only consume what they need from the slice, and
//! whatever is left over belongs to the next segment.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use std::io::{self, Read, Write};

use super::sniff::Compression;
use crate::config::Config;
use crate::error::ValidationError;

const PUMP_BUFFER: usize = 64 * 1024;

/// A compressed member that decoded cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inflated {
    /// Compressed bytes consumed from the input slice.
    pub encoded_len: usize,
    /// Bytes written to the output.
    pub decoded_len: u64,
}

/// Decompression either finishes or hits a stream it cannot read.
///
/// A corrupt stream is not an error of the tool; the caller decides what it
/// means. Failures writing the output are returned as `Err`.
#[derive(Debug)]
pub enum InflateOutcome {
    Done(Inflated),
    Corrupt(io::Error),
}

/// Decompress the single member at the start of `input` into `out`.
pub fn decompress_member<W: Write>(
    compression: Compression,
    input: &[u8],
    out: &mut W,
) -> Result<InflateOutcome> {
    match compression {
        Compression::None => {
            out.write_all(input)
                .context("copying uncompressed segment")?;
            Ok(InflateOutcome::Done(Inflated {
                encoded_len: input.len(),
                decoded_len: input.len() as u64,
            }))
        }
        Compression::Gzip => {
            let mut decoder = flate2::bufread::GzDecoder::new(input);
            let decoded_len = match pump(&mut decoder, out)? {
                Ok(n) => n,
                Err(err) => return Ok(InflateOutcome::Corrupt(err)),
            };
            let rest = decoder.into_inner();
            Ok(InflateOutcome::Done(Inflated {
                encoded_len: input.len() - rest.len(),
                decoded_len,
            }))
        }
        Compression::Zstd => {
            let mut decoder = match zstd::stream::read::Decoder::with_buffer(input) {
                Ok(decoder) => decoder.single_frame(),
                Err(err) => return Ok(InflateOutcome::Corrupt(err)),
            };
            let decoded_len = match pump(&mut decoder, out)? {
                Ok(n) => n,
                Err(err) => return Ok(InflateOutcome::Corrupt(err)),
            };
            let rest = decoder.finish();
            Ok(InflateOutcome::Done(Inflated {
                encoded_len: input.len() - rest.len(),
                decoded_len,
            }))
        }
    }
}

/// Copy `reader` into `out`, keeping read failures apart from write failures.
fn pump<R: Read, W: Write>(reader: &mut R, out: &mut W) -> Result<io::Result<u64>> {
    let mut buf = vec![0u8; PUMP_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(Ok(total)),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Ok(Err(err)),
        };
        out.write_all(&buf[..n])
            .context("writing decompressed segment")?;
        total += n as u64;
    }
}

/// Compression level requested by a descriptor's `extra_args`.
///
/// Accepts the flags gzip and zstd share: `-N`, `--best` and `--fast`.
/// gzip's `-n`/`--no-name` is accepted and ignored since the encoder never
/// stores a file name. Returns `None` when no level flag is present.
pub fn parse_codec_args(compression: Compression, args: &str) -> Result<Option<i32>> {
    let (max, best) = match compression {
        Compression::None => {
            if !args.trim().is_empty() {
                log::debug!("ignoring extra_args '{}' for uncompressed segment", args.trim());
            }
            return Ok(None);
        }
        Compression::Gzip => (9, 9),
        Compression::Zstd => (22, 19),
    };

    let invalid = |token: &str| ValidationError::InvalidCodecArgs {
        compression: compression.to_string(),
        token: token.to_string(),
    };

    let mut level = None;
    for token in args.split_whitespace() {
        match token {
            "--best" => level = Some(best),
            "--fast" => level = Some(1),
            "-n" | "--no-name" if compression == Compression::Gzip => {}
            _ => {
                let digits = token.strip_prefix('-').ok_or_else(|| invalid(token))?;
                let value: i32 = digits.parse().map_err(|_| invalid(token))?;
                if !(1..=max).contains(&value) {
                    return Err(invalid(token).into());
                }
                level = Some(value);
            }
        }
    }
    Ok(level)
}

/// Writer that applies a segment's recorded compression.
pub enum SegmentEncoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> SegmentEncoder<W> {
    pub fn new(compression: Compression, args: &str, config: &Config, inner: W) -> Result<Self> {
        let level = parse_codec_args(compression, args)?;
        Ok(match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => {
                let level = level.map_or(config.gzip_level, |l| l as u32);
                // mtime 0 keeps repeated rebuilds byte-identical.
                let encoder = GzBuilder::new()
                    .mtime(0)
                    .write(inner, flate2::Compression::new(level));
                Self::Gzip(encoder)
            }
            Compression::Zstd => {
                let level = level.unwrap_or(config.zstd_level);
                let encoder = zstd::stream::write::Encoder::new(inner, level)
                    .context("creating zstd encoder")?;
                Self::Zstd(encoder)
            }
        })
    }

    /// Flush the codec trailer and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(e) => e.finish(),
            Self::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for SegmentEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(e) => e.write(buf),
            Self::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(e) => e.flush(),
            Self::Zstd(e) => e.flush(),
        }
    }
}
