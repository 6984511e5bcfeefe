//! The TVM value stack and its cell encoding.
//!
//! On the wire a stack is
//! ```text
//! vm_stack#_ depth:(## 24) stack:(VmStackList depth) = VmStack;
//! vm_stk_cons#_ {n:#} rest:^(VmStackList n) tos:VmStackValue = VmStackList (n + 1);
//! vm_stk_nil#_ = VmStackList 0;
//! ```
//! so the top of the stack sits in the root cell and every older entry is one
//! reference further down.

use std::fmt::{self, Display};

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use thiserror::Error;
use tvm_cell::{
    builder::Builder,
    cell::{Cell, CellError},
    slice::Slice,
};

/// Width of the stack depth field.
const DEPTH_BITS: usize = 24;

/// Width of a full VM integer.
const INT_BITS: usize = 257;

/// Width of the slice bound fields.
const SLICE_BITS_FIELD: usize = 10;
const SLICE_REFS_FIELD: usize = 3;

const TAG_NULL: u8 = 0x00;
const TAG_TINY_INT: u8 = 0x01;
/// `0x02` is shared by `vm_stk_int#0201_` and `vm_stk_nan#02ff`, which
/// differ in the bits that follow.
const TAG_INT_OR_NAN: u8 = 0x02;
const TAG_CELL: u8 = 0x03;
const TAG_SLICE: u8 = 0x04;
const TAG_BUILDER: u8 = 0x05;
const TAG_CONT: u8 = 0x06;
const TAG_TUPLE: u8 = 0x07;

/// Errors from encoding values onto a stack cell.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StackEncodeError {
    /// The integer does not fit into 257 signed bits.
    #[error("Integer {0} does not fit in {} bits!", INT_BITS)]
    IntegerOutOfRange(BigInt),

    /// The stack has more entries than the depth field can count.
    #[error("Stack of {0} entries is too deep to encode!")]
    TooDeep(usize),

    /// The tuple has more entries than its length field can count.
    #[error("Tuple of {0} entries is too long to encode!")]
    TupleTooLong(usize),

    /// A cell could not hold the encoded value.
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Errors from decoding a stack cell.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StackDecodeError {
    /// A value starts with a tag no value has.
    #[error("Unknown stack value tag {0:#04x}!")]
    UnknownTag(u8),

    /// The stack holds a NaN, which has no integer value.
    #[error("Stack holds a NaN integer!")]
    NaN,

    /// The stack holds a continuation, which can not be represented.
    #[error("Stack holds a continuation!")]
    Continuation,

    /// A slice value describes a window outside of its cell.
    #[error("Slice value is out of the bounds of its cell! (bits: {bits:?}, refs: {refs:?})")]
    InvalidSlice {
        /// Bit window.
        bits: std::ops::Range<u16>,
        /// Reference window.
        refs: std::ops::Range<u8>,
    },

    /// Tried to pop from an empty stack.
    #[error("Tried to pop from an empty stack!")]
    EmptyStack,

    /// The cell ran out of bits or references mid value.
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// A single stack entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StackValue {
    /// An integer of at most 257 signed bits.
    Int(BigInt),
    /// A cell.
    Cell(Cell),
    /// A window into a cell.
    Slice(Slice),
    /// A partially built cell.
    Builder(Builder),
    /// An ordered sequence of values.
    Tuple(Vec<StackValue>),
    /// The null value.
    Nil,
}

/// The kind of a [`StackValue`], without its payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StackValueKind {
    /// [`StackValue::Int`].
    Int,
    /// [`StackValue::Cell`].
    Cell,
    /// [`StackValue::Slice`].
    Slice,
    /// [`StackValue::Builder`].
    Builder,
    /// [`StackValue::Tuple`].
    Tuple,
    /// [`StackValue::Nil`].
    Nil,
}

impl StackValue {
    /// The kind of this value.
    pub fn kind(&self) -> StackValueKind {
        match self {
            StackValue::Int(_) => StackValueKind::Int,
            StackValue::Cell(_) => StackValueKind::Cell,
            StackValue::Slice(_) => StackValueKind::Slice,
            StackValue::Builder(_) => StackValueKind::Builder,
            StackValue::Tuple(_) => StackValueKind::Tuple,
            StackValue::Nil => StackValueKind::Nil,
        }
    }
}

impl Display for StackValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackValueKind::Int => "int",
            StackValueKind::Cell => "cell",
            StackValueKind::Slice => "slice",
            StackValueKind::Builder => "builder",
            StackValueKind::Tuple => "tuple",
            StackValueKind::Nil => "nil",
        };

        write!(f, "{}", s)
    }
}

macro_rules! impl_from_for_stack_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for StackValue {
                fn from(v: $t) -> Self {
                    StackValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_stack_value!(
    BigInt => Int,
    i64 => Int,
    u64 => Int,
    i32 => Int,
    u32 => Int,
    Cell => Cell,
    Slice => Slice,
    Builder => Builder,
    Vec<StackValue> => Tuple,
);

/// A TVM stack. The last element is the top.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stack {
    values: Vec<StackValue>,
}

impl Stack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    /// Pushes `v` on top.
    pub fn push(&mut self, v: StackValue) {
        self.values.push(v);
    }

    /// Removes and returns the top entry.
    pub fn pop(&mut self) -> Result<StackValue, StackDecodeError> {
        self.values.pop().ok_or(StackDecodeError::EmptyStack)
    }

    /// Encodes the stack as a `VmStack` cell.
    pub fn to_cell(&self) -> Result<Cell, StackEncodeError> {
        let depth = self.values.len();
        if depth >= 1 << DEPTH_BITS {
            return Err(StackEncodeError::TooDeep(depth));
        }

        // Build the list bottom up, so each cell can reference the one below.
        let mut list = Builder::new();
        for v in self.values.iter() {
            let mut cons = Builder::new();
            cons.store_ref(list.build()?)?;
            store_value(&mut cons, v)?;
            list = cons;
        }

        let mut root = Builder::new();
        root.store_uint(depth as u64, DEPTH_BITS)?
            .store_builder(&list)?;

        Ok(root.build()?)
    }

    /// Decodes a `VmStack` cell.
    pub fn from_cell(cell: &Cell) -> Result<Self, StackDecodeError> {
        let mut s = cell.parse()?;
        let depth = s.load_uint(DEPTH_BITS)? as usize;

        let mut top_first = Vec::with_capacity(depth.min(1024));
        for _ in 0..depth {
            let rest = s.load_ref()?;
            top_first.push(load_value(&mut s)?);
            s = rest.parse()?;
        }

        top_first.reverse();
        Ok(Self { values: top_first })
    }
}

/// Encodes call arguments. They are pushed in reverse, so `values[0]` ends up
/// on top of the stack, which is where a get-method expects its first
/// argument.
pub fn encode(values: &[StackValue]) -> Result<Cell, StackEncodeError> {
    let mut stack = Stack::new();
    for v in values.iter().rev() {
        stack.push(v.clone());
    }

    stack.to_cell()
}

/// Decodes a stack cell into its values, top of the stack first.
pub fn decode(cell: &Cell) -> Result<Vec<StackValue>, StackDecodeError> {
    let mut stack = Stack::from_cell(cell)?;

    let mut values = Vec::with_capacity(stack.depth());
    while stack.depth() > 0 {
        values.push(stack.pop()?);
    }

    Ok(values)
}

fn store_value(b: &mut Builder, v: &StackValue) -> Result<(), StackEncodeError> {
    match v {
        StackValue::Nil => {
            b.store_u8(TAG_NULL)?;
        }
        StackValue::Int(i) => match i.to_i64() {
            Some(small) => {
                b.store_u8(TAG_TINY_INT)?.store_int(small, 64)?;
            }
            None => {
                // `0201_` is the 15 bit prefix 0x0100.
                b.store_uint(0x0100, 15)?
                    .store_big_int(i, INT_BITS)
                    .map_err(|_| StackEncodeError::IntegerOutOfRange(i.clone()))?;
            }
        },
        StackValue::Cell(c) => {
            b.store_u8(TAG_CELL)?.store_ref(c.clone())?;
        }
        StackValue::Slice(s) => {
            let bits = s.bit_range();
            let refs = s.ref_range();
            b.store_u8(TAG_SLICE)?
                .store_ref(s.cell().clone())?
                .store_uint(bits.start as u64, SLICE_BITS_FIELD)?
                .store_uint(bits.end as u64, SLICE_BITS_FIELD)?
                .store_uint(refs.start as u64, SLICE_REFS_FIELD)?
                .store_uint(refs.end as u64, SLICE_REFS_FIELD)?;
        }
        StackValue::Builder(builder) => {
            b.store_u8(TAG_BUILDER)?.store_ref(builder.build()?)?;
        }
        StackValue::Tuple(items) => {
            if items.len() > u16::MAX as usize {
                return Err(StackEncodeError::TupleTooLong(items.len()));
            }
            b.store_u8(TAG_TUPLE)?.store_u16(items.len() as u16)?;
            store_tuple(b, items)?;
        }
    }

    Ok(())
}

fn value_cell(v: &StackValue) -> Result<Cell, StackEncodeError> {
    let mut b = Builder::new();
    store_value(&mut b, v)?;
    Ok(b.build()?)
}

/// `VmTuple n`: the first `n - 1` items behind a `VmTupleRef`, then the last
/// item by reference.
fn store_tuple(b: &mut Builder, items: &[StackValue]) -> Result<(), StackEncodeError> {
    let Some((last, init)) = items.split_last() else {
        return Ok(());
    };

    store_tuple_ref(b, init)?;
    b.store_ref(value_cell(last)?)?;
    Ok(())
}

fn store_tuple_ref(b: &mut Builder, items: &[StackValue]) -> Result<(), StackEncodeError> {
    match items {
        [] => {}
        [only] => {
            b.store_ref(value_cell(only)?)?;
        }
        _ => {
            let mut inner = Builder::new();
            store_tuple(&mut inner, items)?;
            b.store_ref(inner.build()?)?;
        }
    }

    Ok(())
}

fn load_value(s: &mut Slice) -> Result<StackValue, StackDecodeError> {
    let tag = s.load_u8()?;
    let v = match tag {
        TAG_NULL => StackValue::Nil,
        TAG_TINY_INT => StackValue::Int(s.load_int(64)?.into()),
        TAG_INT_OR_NAN => match s.load_uint(7)? {
            0x00 => StackValue::Int(s.load_big_int(INT_BITS)?),
            0x7f => match s.load_bit()? {
                true => return Err(StackDecodeError::NaN),
                false => return Err(StackDecodeError::UnknownTag(tag)),
            },
            _ => return Err(StackDecodeError::UnknownTag(tag)),
        },
        TAG_CELL => StackValue::Cell(s.load_ref()?),
        TAG_SLICE => {
            let cell = s.load_ref()?;
            let st_bits = s.load_uint(SLICE_BITS_FIELD)? as u16;
            let end_bits = s.load_uint(SLICE_BITS_FIELD)? as u16;
            let st_ref = s.load_uint(SLICE_REFS_FIELD)? as u8;
            let end_ref = s.load_uint(SLICE_REFS_FIELD)? as u8;

            let (bits, refs) = (st_bits..end_bits, st_ref..end_ref);

            let slice = Slice::with_window(cell, bits.clone(), refs.clone())
                .map_err(|_| StackDecodeError::InvalidSlice { bits, refs })?;
            StackValue::Slice(slice)
        }
        TAG_BUILDER => StackValue::Builder(s.load_ref()?.to_builder()),
        TAG_CONT => return Err(StackDecodeError::Continuation),
        TAG_TUPLE => {
            let len = s.load_u16()? as usize;
            let mut items = Vec::with_capacity(len);
            load_tuple(s, len, &mut items)?;
            StackValue::Tuple(items)
        }
        _ => return Err(StackDecodeError::UnknownTag(tag)),
    };

    Ok(v)
}

fn load_value_cell(c: &Cell) -> Result<StackValue, StackDecodeError> {
    load_value(&mut c.parse()?)
}

/// Reads `VmTuple len`, appending its items to `out` in order.
fn load_tuple(
    s: &mut Slice,
    len: usize,
    out: &mut Vec<StackValue>,
) -> Result<(), StackDecodeError> {
    if len == 0 {
        return Ok(());
    }

    load_tuple_ref(s, len - 1, out)?;
    out.push(load_value_cell(&s.load_ref()?)?);
    Ok(())
}

fn load_tuple_ref(
    s: &mut Slice,
    len: usize,
    out: &mut Vec<StackValue>,
) -> Result<(), StackDecodeError> {
    match len {
        0 => Ok(()),
        1 => {
            out.push(load_value_cell(&s.load_ref()?)?);
            Ok(())
        }
        _ => load_tuple(&mut s.load_ref()?.parse()?, len, out),
    }
}
