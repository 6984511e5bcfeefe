//! A write cursor for assembling [`Cell`]s bit by bit.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::One;

use crate::{
    bits::{bytes_for_bits, get_bit, set_bit, BitString},
    cell::{Cell, CellError, CellResult, CellType, MAX_BITS, MAX_REFS},
    slice::Slice,
};

/// Largest byte length of a `VarUInteger 16` (coins) value.
const MAX_COINS_BYTES: usize = 15;

/// Accumulates bits and references for a new cell.
///
/// Every `store_*` method checks cell capacity first and leaves the builder
/// untouched on failure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Builder {
    data: Vec<u8>,
    bit_len: u16,
    refs: Vec<Cell>,
}

impl Builder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(data: &[u8], bit_len: u16, refs: &[Cell]) -> Self {
        Self {
            data: data[..bytes_for_bits(bit_len as usize)].to_vec(),
            bit_len,
            refs: refs.to_vec(),
        }
    }

    /// Number of bits stored so far.
    pub fn bit_len(&self) -> u16 {
        self.bit_len
    }

    /// The packed data stored so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// References stored so far.
    pub fn refs(&self) -> &[Cell] {
        &self.refs
    }

    /// Bits that can still be stored.
    pub fn bits_left(&self) -> usize {
        (MAX_BITS - self.bit_len) as usize
    }

    /// References that can still be stored.
    pub fn refs_left(&self) -> usize {
        MAX_REFS - self.refs.len()
    }

    /// Stores a single bit.
    pub fn store_bit(&mut self, bit: bool) -> CellResult<&mut Self> {
        self.ensure_bits(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Stores the low `bits` bits of `v`, big-endian.
    pub fn store_uint(&mut self, v: u64, bits: usize) -> CellResult<&mut Self> {
        if bits > 64 || (bits < 64 && v >> bits != 0) {
            return Err(CellError::IntegerOverflow { bits });
        }
        self.ensure_bits(bits)?;

        for i in (0..bits).rev() {
            self.push_bit((v >> i) & 1 == 1);
        }

        Ok(self)
    }

    /// Stores `v` as a `bits` wide two's complement integer.
    pub fn store_int(&mut self, v: i64, bits: usize) -> CellResult<&mut Self> {
        if bits == 0 || bits > 64 {
            return Err(CellError::IntegerOverflow { bits });
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        if (v as i128) < min || (v as i128) > max {
            return Err(CellError::IntegerOverflow { bits });
        }

        let mask = match bits {
            64 => u64::MAX,
            _ => (1u64 << bits) - 1,
        };
        self.store_uint(v as u64 & mask, bits)
    }

    /// Stores a byte.
    pub fn store_u8(&mut self, v: u8) -> CellResult<&mut Self> {
        self.store_uint(v as u64, 8)
    }

    /// Stores a big-endian `u16`.
    pub fn store_u16(&mut self, v: u16) -> CellResult<&mut Self> {
        self.store_uint(v as u64, 16)
    }

    /// Stores a big-endian `u32`.
    pub fn store_u32(&mut self, v: u32) -> CellResult<&mut Self> {
        self.store_uint(v as u64, 32)
    }

    /// Stores a big-endian `u64`.
    pub fn store_u64(&mut self, v: u64) -> CellResult<&mut Self> {
        self.store_uint(v, 64)
    }

    /// Stores a big-endian `i32`.
    pub fn store_i32(&mut self, v: i32) -> CellResult<&mut Self> {
        self.store_int(v as i64, 32)
    }

    /// Stores `v` as a `bits` wide two's complement integer. Wider than
    /// [`Builder::store_int`]; used for 257-bit VM integers.
    pub fn store_big_int(&mut self, v: &BigInt, bits: usize) -> CellResult<&mut Self> {
        if bits == 0 {
            return Err(CellError::IntegerOverflow { bits });
        }
        let bound = BigInt::one() << (bits - 1);
        if *v >= bound || *v < -&bound {
            return Err(CellError::IntegerOverflow { bits });
        }

        let unsigned = match v.sign() {
            Sign::Minus => (BigInt::one() << bits) + v,
            _ => v.clone(),
        };
        let (_, bytes) = unsigned.to_bytes_be();

        self.store_be_padded(&bytes, bits)
    }

    /// Stores `v` as a `bits` wide unsigned integer.
    pub fn store_big_uint(&mut self, v: &BigUint, bits: usize) -> CellResult<&mut Self> {
        if v.bits() > bits as u64 {
            return Err(CellError::IntegerOverflow { bits });
        }

        self.store_be_padded(&v.to_bytes_be(), bits)
    }

    /// Stores every bit of `bytes`.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> CellResult<&mut Self> {
        self.store_raw(bytes, 0, bytes.len() * 8)
    }

    /// Stores every bit of `bits`.
    pub fn store_bits(&mut self, bits: &BitString) -> CellResult<&mut Self> {
        self.store_raw(bits.as_raw(), 0, bits.len())
    }

    /// Stores an amount of coins as a `VarUInteger 16`: a four bit byte
    /// length followed by that many bytes.
    pub fn store_coins(&mut self, amount: u128) -> CellResult<&mut Self> {
        let bytes = amount.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let len = bytes.len() - skip;
        if len > MAX_COINS_BYTES {
            return Err(CellError::IntegerOverflow {
                bits: MAX_COINS_BYTES * 8,
            });
        }
        self.ensure_bits(4 + len * 8)?;

        self.store_uint(len as u64, 4)?;
        self.store_bytes(&bytes[skip..])
    }

    /// Stores a reference.
    pub fn store_ref(&mut self, cell: Cell) -> CellResult<&mut Self> {
        if self.refs.len() >= MAX_REFS {
            return Err(CellError::RefsOverflow);
        }

        self.refs.push(cell);
        Ok(self)
    }

    /// Stores `Maybe ^Cell`: a presence bit and, if present, the reference.
    pub fn store_maybe_ref(&mut self, cell: Option<Cell>) -> CellResult<&mut Self> {
        match cell {
            Some(c) => {
                if self.refs.len() >= MAX_REFS {
                    return Err(CellError::RefsOverflow);
                }
                self.store_bit(true)?.store_ref(c)
            }
            None => self.store_bit(false),
        }
    }

    /// Stores the remaining bits and references of a slice.
    pub fn store_slice(&mut self, slice: &Slice) -> CellResult<&mut Self> {
        let range = slice.bit_range();
        let refs = slice.remaining_ref_cells();
        self.ensure_refs(refs.len())?;
        self.store_raw(
            slice.cell().data(),
            range.start as usize,
            (range.end - range.start) as usize,
        )?;
        self.refs.extend_from_slice(refs);

        Ok(self)
    }

    /// Stores the bits and references of another builder.
    pub fn store_builder(&mut self, other: &Builder) -> CellResult<&mut Self> {
        self.ensure_refs(other.refs.len())?;
        self.store_raw(&other.data, 0, other.bit_len as usize)?;
        self.refs.extend_from_slice(&other.refs);

        Ok(self)
    }

    /// Finishes an ordinary cell.
    pub fn build(&self) -> CellResult<Cell> {
        Cell::new(
            CellType::Ordinary,
            self.data.clone(),
            self.bit_len,
            self.refs.clone(),
        )
    }

    /// Finishes an exotic cell whose type is given by the first stored byte.
    pub fn build_exotic(&self) -> CellResult<Cell> {
        if self.bit_len < 8 {
            return Err(CellError::InvalidExotic("missing exotic cell type byte"));
        }
        let cell_type = CellType::from_exotic_tag(self.data[0])
            .ok_or(CellError::InvalidExotic("unknown exotic cell type"))?;

        Cell::new(cell_type, self.data.clone(), self.bit_len, self.refs.clone())
    }

    /// Stores `len` bits of a packed buffer starting at bit `start`.
    pub(crate) fn store_raw(&mut self, data: &[u8], start: usize, len: usize) -> CellResult<&mut Self> {
        self.ensure_bits(len)?;
        for idx in start..start + len {
            self.push_bit(get_bit(data, idx));
        }

        Ok(self)
    }

    /// Stores a big-endian byte string as exactly `bits` bits. The caller
    /// guarantees the value fits.
    fn store_be_padded(&mut self, bytes: &[u8], bits: usize) -> CellResult<&mut Self> {
        self.ensure_bits(bits)?;

        let have = bytes.len() * 8;
        if have >= bits {
            return self.store_raw(bytes, have - bits, bits);
        }

        for _ in 0..bits - have {
            self.push_bit(false);
        }
        self.store_raw(bytes, 0, have)
    }

    fn ensure_bits(&self, storing: usize) -> CellResult<()> {
        match storing <= self.bits_left() {
            true => Ok(()),
            false => Err(CellError::BitsOverflow {
                have: self.bit_len as usize,
                storing,
            }),
        }
    }

    fn ensure_refs(&self, storing: usize) -> CellResult<()> {
        match storing <= self.refs_left() {
            true => Ok(()),
            false => Err(CellError::RefsOverflow),
        }
    }

    fn push_bit(&mut self, bit: bool) {
        let idx = self.bit_len as usize;
        if idx % 8 == 0 {
            self.data.push(0);
        }
        set_bit(&mut self.data, idx, bit);
        self.bit_len += 1;
    }
}
