//! Segment boundaries.
//!
//! Where segment N+1 starts depends on how many bytes segment N turned out
//! to occupy, so the walk over an image is a fold: each [`Boundary`] plus
//! the encoded length of the segment found there yields the next [`Step`].
//! Offsets strictly increase; a step that would not move forward ends the
//! walk instead of looping.

use std::fmt;

use crate::artifact::sniff::looks_like_initramfs;

/// newc pads headers and data to four bytes.
const NEWC_ALIGN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub index: usize,
    pub offset: usize,
}

/// Why a walk stopped. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Every byte of the image was consumed.
    EndOfInput,
    /// Fewer than one block left that is not an archive; treated as padding.
    ShortTail { remaining: usize },
    /// The data at the boundary did not decode as an archive.
    Malformed(String),
    /// The reported length did not move the offset forward.
    NoAdvance,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfInput => f.write_str("end of input"),
            Self::ShortTail { remaining } => write!(f, "{remaining} trailing bytes ignored"),
            Self::Malformed(reason) => write!(f, "no further archive ({reason})"),
            Self::NoAdvance => f.write_str("archive length did not advance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Segment(Boundary),
    End(EndReason),
}

impl Boundary {
    pub const FIRST: Boundary = Boundary {
        index: 0,
        offset: 0,
    };

    /// Whether a segment can start at this boundary of `image`.
    ///
    /// Less than a block of data left is trailing padding unless it sniffs
    /// as an archive; small unpadded segments are still segments.
    pub fn check(self, image: &[u8], block_size: usize) -> Step {
        let rest = image.get(self.offset..).unwrap_or_default();
        if rest.is_empty() {
            return Step::End(EndReason::EndOfInput);
        }
        if rest.len() < block_size && !looks_like_initramfs(rest) {
            return Step::End(EndReason::ShortTail {
                remaining: rest.len(),
            });
        }
        Step::Segment(self)
    }

    /// Boundary of the next segment, given that this one occupied `encoded_len` bytes.
    ///
    /// The end is rounded up to `block_size`. When the bytes skipped by the
    /// rounding are not all zero the next archive was packed without block
    /// padding; it then starts at the next newc-aligned non-zero word.
    pub fn advance(self, encoded_len: usize, image: &[u8], block_size: usize) -> Step {
        let end = self.offset.saturating_add(encoded_len);
        let aligned = align_up(end, block_size);
        let padding = &image[end.min(image.len())..aligned.min(image.len())];

        let next = if padding.iter().all(|b| *b == 0) {
            aligned
        } else {
            let mut next = align_up(end, NEWC_ALIGN);
            while image
                .get(next..next + NEWC_ALIGN)
                .is_some_and(|word| word.iter().all(|b| *b == 0))
            {
                next += NEWC_ALIGN;
            }
            log::debug!(
                "segment {} ends unaligned at {end}; next archive at {next}",
                self.index
            );
            next
        };

        if next <= self.offset {
            return Step::End(EndReason::NoAdvance);
        }
        Boundary {
            index: self.index + 1,
            offset: next,
        }
        .check(image, block_size)
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
