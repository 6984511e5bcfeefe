//! Define [`BitString`] and the bit-level helpers shared by
//! [`Builder`](crate::builder::Builder) and [`Slice`](crate::slice::Slice).
//!
//! All bit sequences in this crate are most-significant-bit first: bit `0` of
//! a sequence is the top bit of its first byte.

use std::{
    fmt::{self, Debug, Display},
    ops::Range,
};

/// An owned sequence of bits.
///
/// Bits past `len` in the final byte are always kept at zero, so two
/// `BitString`s are equal exactly when their bits are.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct BitString {
    data: Vec<u8>,
    len: usize,
}

impl BitString {
    /// Creates an empty bit string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bit string holding every bit of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            len: bytes.len() * 8,
        }
    }

    /// Creates a bit string from the first `len` bits of `bytes`.
    ///
    /// # Panics
    /// If `bytes` holds fewer than `len` bits.
    pub fn from_raw(bytes: &[u8], len: usize) -> Self {
        assert!(
            bytes.len() * 8 >= len,
            "Attempted to take {} bits from a {} byte buffer!",
            len,
            bytes.len()
        );

        let mut data = bytes[..bytes_for_bits(len)].to_vec();
        clear_tail(&mut data, len);

        Self { data, len }
    }

    /// Creates a bit string of `len` copies of `bit`.
    pub fn repeat(bit: bool, len: usize) -> Self {
        let mut s = Self {
            data: vec![if bit { 0xff } else { 0 }; bytes_for_bits(len)],
            len,
        };
        clear_tail(&mut s.data, len);

        s
    }

    /// Number of bits.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no bits.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packed bytes. Unused bits of the last byte are zero.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Returns the bit at `idx`, or `None` if `idx >= len`.
    pub fn get(&self, idx: usize) -> Option<bool> {
        (idx < self.len).then(|| get_bit(&self.data, idx))
    }

    /// Appends a single bit.
    pub fn push(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        set_bit(&mut self.data, self.len, bit);
        self.len += 1;
    }

    /// Appends every bit of `other`.
    pub fn extend(&mut self, other: &BitString) {
        self.extend_from_raw(&other.data, 0..other.len);
    }

    /// Appends the bits in `range` of a packed buffer.
    pub(crate) fn extend_from_raw(&mut self, data: &[u8], range: Range<usize>) {
        for idx in range {
            self.push(get_bit(data, idx));
        }
    }

    /// Copies out the bits in `range`.
    ///
    /// # Panics
    /// If `range` is not inside the bit string.
    pub fn sub_string(&self, range: Range<usize>) -> BitString {
        assert!(range.end <= self.len && range.start <= range.end);

        let mut out = BitString::new();
        out.extend_from_raw(&self.data, range);
        out
    }

    /// Length of the longest common prefix of `self` and `other`.
    pub fn common_prefix_len(&self, other: &BitString) -> usize {
        self.iter()
            .zip(other.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Iterates over the bits in order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| get_bit(&self.data, idx))
    }
}

impl Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{{{}}}", self)
    }
}

/// Fift-style hex: when the length is not a multiple of four, a completion
/// tag is appended and the string ends with `_`.
impl Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_tagged_hex(&self.data, self.len))
    }
}

pub(crate) const fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(8)
}

pub(crate) fn get_bit(data: &[u8], idx: usize) -> bool {
    (data[idx / 8] >> (7 - idx % 8)) & 1 == 1
}

pub(crate) fn set_bit(data: &mut [u8], idx: usize, bit: bool) {
    let mask = 1 << (7 - idx % 8);
    match bit {
        true => data[idx / 8] |= mask,
        false => data[idx / 8] &= !mask,
    }
}

/// Zeroes every bit at or past `len`.
pub(crate) fn clear_tail(data: &mut [u8], len: usize) {
    if len % 8 != 0 {
        data[len / 8] &= 0xff << (8 - len % 8);
    }
    for b in data.iter_mut().skip(bytes_for_bits(len)) {
        *b = 0;
    }
}

/// Reads `bits` (<= 64) bits starting at `start` as a big-endian unsigned
/// integer.
pub(crate) fn read_uint(data: &[u8], start: usize, bits: usize) -> u64 {
    debug_assert!(bits <= 64);

    (start..start + bits).fold(0, |acc, idx| (acc << 1) | get_bit(data, idx) as u64)
}

/// Packs `len` bits into bytes, appending a completion tag (a single `1`
/// followed by zeroes) when `len` is not byte aligned.
pub(crate) fn with_completion_tag(data: &[u8], len: usize) -> Vec<u8> {
    let mut out = data[..bytes_for_bits(len)].to_vec();
    if len % 8 != 0 {
        set_bit(&mut out, len, true);
    }

    out
}

/// Inverse of [`with_completion_tag`]: the number of meaningful bits in a
/// padded buffer, or `None` if the last byte carries no tag.
pub(crate) fn strip_completion_tag(data: &[u8]) -> Option<usize> {
    let last = *data.last()?;
    match last {
        0 => None,
        _ => Some(data.len() * 8 - last.trailing_zeros() as usize - 1),
    }
}

pub(crate) fn to_tagged_hex(data: &[u8], len: usize) -> String {
    let rem = len % 4;
    if rem == 0 {
        let mut s = hex::encode(&data[..bytes_for_bits(len)]);
        s.truncate(len / 4);
        return s;
    }

    let padded_len = len + 4 - rem;
    let mut padded = data[..bytes_for_bits(len)].to_vec();
    padded.resize(bytes_for_bits(padded_len), 0);
    set_bit(&mut padded, len, true);

    let mut s = hex::encode(&padded);
    s.truncate(padded_len / 4);
    s.push('_');
    s
}
