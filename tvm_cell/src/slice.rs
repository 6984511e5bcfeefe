//! A read cursor over the bits and references of a [`Cell`].

use std::ops::Range;

use num_bigint::{BigInt, BigUint};
use num_traits::One;

use crate::{
    bits::{get_bit, read_uint, BitString},
    builder::Builder,
    cell::{Cell, CellError, CellHash, CellResult},
};

/// A window `bits x refs` into a cell that is consumed from the front.
///
/// Slices compare equal when they view the same cell through the same window.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Slice {
    cell: Cell,
    bit_pos: u16,
    bit_end: u16,
    ref_pos: u8,
    ref_end: u8,
}

impl Slice {
    pub(crate) fn new(cell: Cell) -> Self {
        let bit_end = cell.bit_len();
        let ref_end = cell.refs().len() as u8;

        Self {
            cell,
            bit_pos: 0,
            bit_end,
            ref_pos: 0,
            ref_end,
        }
    }

    /// Creates a slice that only sees `bits` and `refs` of `cell`.
    ///
    /// Fails if either range is reversed or reaches past the end of the cell.
    pub fn with_window(cell: Cell, bits: Range<u16>, refs: Range<u8>) -> CellResult<Self> {
        if bits.start > bits.end || bits.end > cell.bit_len() {
            return Err(CellError::NotEnoughBits {
                requested: bits.end as usize,
                remaining: cell.bit_len() as usize,
            });
        }
        if refs.start > refs.end || refs.end as usize > cell.refs().len() {
            return Err(CellError::NotEnoughRefs);
        }

        Ok(Self {
            cell,
            bit_pos: bits.start,
            bit_end: bits.end,
            ref_pos: refs.start,
            ref_end: refs.end,
        })
    }

    /// The cell being read.
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// The range of bits not yet consumed.
    pub fn bit_range(&self) -> Range<u16> {
        self.bit_pos..self.bit_end
    }

    /// The range of references not yet consumed.
    pub fn ref_range(&self) -> Range<u8> {
        self.ref_pos..self.ref_end
    }

    /// Bits not yet consumed.
    pub fn remaining_bits(&self) -> usize {
        (self.bit_end - self.bit_pos) as usize
    }

    /// References not yet consumed.
    pub fn remaining_refs(&self) -> usize {
        (self.ref_end - self.ref_pos) as usize
    }

    /// Returns `true` when every bit and reference has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    pub(crate) fn remaining_ref_cells(&self) -> &[Cell] {
        &self.cell.refs()[self.ref_pos as usize..self.ref_end as usize]
    }

    /// Reads one bit.
    pub fn load_bit(&mut self) -> CellResult<bool> {
        self.ensure_bits(1)?;
        let bit = get_bit(self.cell.data(), self.bit_pos as usize);
        self.bit_pos += 1;

        Ok(bit)
    }

    /// Reads a `bits` wide (<= 64) big-endian unsigned integer.
    pub fn load_uint(&mut self, bits: usize) -> CellResult<u64> {
        if bits > 64 {
            return Err(CellError::IntegerOverflow { bits });
        }
        self.ensure_bits(bits)?;
        let v = read_uint(self.cell.data(), self.bit_pos as usize, bits);
        self.bit_pos += bits as u16;

        Ok(v)
    }

    /// Reads a `bits` wide (<= 64) two's complement integer.
    pub fn load_int(&mut self, bits: usize) -> CellResult<i64> {
        if bits == 0 {
            return Err(CellError::IntegerOverflow { bits });
        }
        let v = self.load_uint(bits)?;

        Ok(match bits < 64 && (v >> (bits - 1)) & 1 == 1 {
            true => (v | (u64::MAX << bits)) as i64,
            false => v as i64,
        })
    }

    /// Reads a byte.
    pub fn load_u8(&mut self) -> CellResult<u8> {
        self.load_uint(8).map(|v| v as u8)
    }

    /// Reads a big-endian `u16`.
    pub fn load_u16(&mut self) -> CellResult<u16> {
        self.load_uint(16).map(|v| v as u16)
    }

    /// Reads a big-endian `u32`.
    pub fn load_u32(&mut self) -> CellResult<u32> {
        self.load_uint(32).map(|v| v as u32)
    }

    /// Reads a big-endian `u64`.
    pub fn load_u64(&mut self) -> CellResult<u64> {
        self.load_uint(64)
    }

    /// Reads a big-endian `i32`.
    pub fn load_i32(&mut self) -> CellResult<i32> {
        self.load_int(32).map(|v| v as i32)
    }

    /// Reads a `bits` wide unsigned integer of any width.
    pub fn load_big_uint(&mut self, bits: usize) -> CellResult<BigUint> {
        self.ensure_bits(bits)?;

        let mut v = BigUint::default();
        let mut left = bits;
        while left > 0 {
            let chunk = left.min(32);
            v = (v << chunk) + BigUint::from(self.load_uint(chunk)?);
            left -= chunk;
        }

        Ok(v)
    }

    /// Reads a `bits` wide two's complement integer of any width.
    pub fn load_big_int(&mut self, bits: usize) -> CellResult<BigInt> {
        if bits == 0 {
            return Err(CellError::IntegerOverflow { bits });
        }
        self.ensure_bits(bits)?;

        let negative = get_bit(self.cell.data(), self.bit_pos as usize);
        let v = BigInt::from(self.load_big_uint(bits)?);

        Ok(match negative {
            true => v - (BigInt::one() << bits),
            false => v,
        })
    }

    /// Reads `n` whole bytes.
    pub fn load_bytes(&mut self, n: usize) -> CellResult<Vec<u8>> {
        self.ensure_bits(n * 8)?;

        (0..n).map(|_| self.load_u8()).collect()
    }

    /// Reads a 256-bit hash.
    pub fn load_hash(&mut self) -> CellResult<CellHash> {
        let mut h = [0; 32];
        h.copy_from_slice(&self.load_bytes(32)?);

        Ok(h)
    }

    /// Reads `n` bits into an owned [`BitString`].
    pub fn load_bits(&mut self, n: usize) -> CellResult<BitString> {
        self.ensure_bits(n)?;

        let start = self.bit_pos as usize;
        let mut out = BitString::new();
        out.extend_from_raw(self.cell.data(), start..start + n);
        self.bit_pos += n as u16;

        Ok(out)
    }

    /// Skips `n` bits.
    pub fn skip_bits(&mut self, n: usize) -> CellResult<()> {
        self.ensure_bits(n)?;
        self.bit_pos += n as u16;

        Ok(())
    }

    /// Reads a `VarUInteger 16` amount of coins.
    pub fn load_coins(&mut self) -> CellResult<u128> {
        let len = self.load_uint(4)? as usize;
        self.ensure_bits(len * 8)?;

        let bytes = self.load_bytes(len)?;
        Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128))
    }

    /// Reads the next reference.
    pub fn load_ref(&mut self) -> CellResult<Cell> {
        if self.ref_pos >= self.ref_end {
            return Err(CellError::NotEnoughRefs);
        }
        let c = self.cell.refs()[self.ref_pos as usize].clone();
        self.ref_pos += 1;

        Ok(c)
    }

    /// Reads `Maybe ^Cell`.
    pub fn load_maybe_ref(&mut self) -> CellResult<Option<Cell>> {
        match self.load_bit()? {
            true => self.load_ref().map(Some),
            false => Ok(None),
        }
    }

    /// Copies whatever has not been consumed into a new builder.
    pub fn to_builder(&self) -> Builder {
        let mut b = Builder::new();
        b.store_slice(self)
            .expect("a slice always fits in an empty builder");
        b
    }

    fn ensure_bits(&self, requested: usize) -> CellResult<()> {
        match requested <= self.remaining_bits() {
            true => Ok(()),
            false => Err(CellError::NotEnoughBits {
                requested,
                remaining: self.remaining_bits(),
            }),
        }
    }
}
