//! Low-level big-endian reads and wide-integer bit manipulation.
//!
//! Bits are numbered from the least significant bit of the value they are
//! taken from: bit 0 of a word is its low bit, and bit 0 of a multi-word
//! concatenation is the low bit of its last word.

use crate::errors::DecodeError;

/// Largest packed span, in bits, the wide integer can hold.
pub const WIDE_BITS: u32 = u128::BITS;

/// Widest single sub-field; extracted values must fit an `i64`.
pub const MAX_RANGE_BITS: u32 = 63;

/// Width of an integer word on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum IntWidth {
    W8,
    W16,
    W32,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// A `(start, count, signed)` slice of an integer, LSB-origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    pub start: u32,
    pub count: u32,
    pub signed: bool,
}

impl BitRange {
    pub fn new(start: u32, count: u32) -> Self {
        BitRange {
            start,
            count,
            signed: false,
        }
    }

    pub fn signed(start: u32, count: u32) -> Self {
        BitRange {
            start,
            count,
            signed: true,
        }
    }

    /// A single unsigned bit.
    pub fn bit(index: u32) -> Self {
        BitRange::new(index, 1)
    }

    /// One past the highest bit covered.
    pub fn end(&self) -> u32 {
        self.start + self.count
    }

    /// Extracts this range from `wide`, sign-extending when signed.
    pub fn extract(&self, wide: u128) -> i64 {
        let raw = extract_bits(wide, self.start, self.count);
        if self.signed {
            sign_extend(raw, self.count)
        } else {
            raw as i64
        }
    }
}

/// Reads `width` bytes at `offset` as a big-endian unsigned integer (max 8 bytes).
pub fn read_be(data: &[u8], offset: usize, width: usize) -> Result<u64, DecodeError> {
    let bytes = slice_at(data, offset, width)?;
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Returns `data[offset..offset + width]` or an out-of-bounds error.
pub fn slice_at(data: &[u8], offset: usize, width: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(width)
        .filter(|end| *end <= data.len())
        .map(|end| &data[offset..end])
        .ok_or(DecodeError::OutOfBounds {
            field: String::new(),
            offset,
            width,
            len: data.len(),
        })
}

/// Concatenates `count` consecutive words, most significant word first.
///
/// The caller guarantees `count * word.bits() <= WIDE_BITS`.
pub fn concat_words(
    data: &[u8],
    offset: usize,
    word: IntWidth,
    count: usize,
) -> Result<u128, DecodeError> {
    let bytes = slice_at(data, offset, word.bytes() * count)?;
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

/// Shifts `wide` right by `start` and keeps the low `count` bits (max 64).
pub fn extract_bits(wide: u128, start: u32, count: u32) -> u64 {
    let shifted = wide.checked_shr(start).unwrap_or(0);
    (shifted & low_mask(count)) as u64
}

/// Writes the low `count` bits of `value` into `wide` at `start`, replacing what was there.
pub fn insert_bits(wide: u128, start: u32, count: u32, value: u64) -> u128 {
    let mask = low_mask(count).checked_shl(start).unwrap_or(0);
    let bits = (u128::from(value) & low_mask(count))
        .checked_shl(start)
        .unwrap_or(0);
    (wide & !mask) | bits
}

/// Sign-extends the low `bits` of `value` to a full `i64`.
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn low_mask(count: u32) -> u128 {
    if count >= WIDE_BITS {
        u128::MAX
    } else {
        (1u128 << count) - 1
    }
}
