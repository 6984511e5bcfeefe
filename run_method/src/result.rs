//! Typed access to the values a get-method returned.

use num_bigint::BigInt;
use thiserror::Error;
use tvm_cell::{builder::Builder, cell::Cell, slice::Slice};

use crate::{
    stack::{StackValue, StackValueKind},
    tlb::{DepthBalanceInfo, ShardAccount},
};

/// Errors from reading a result value.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ResultError {
    /// There is no value at the index.
    #[error("Result index {index} is out of range! (results: {len})")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of values.
        len: usize,
    },

    /// The value at the index has a different type.
    #[error("Result {index} has an incorrect type! (expected: {expected}, found: {found})")]
    IncorrectType {
        /// The requested index.
        index: usize,
        /// The type asked for.
        expected: StackValueKind,
        /// The type present.
        found: StackValueKind,
    },
}

/// The account a result was checked against, as the state proof shows it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifiedAccount {
    /// The account entry of the shard state.
    pub shard_account: ShardAccount,
    /// The balance summary stored next to it.
    pub balance: DepthBalanceInfo,
}

/// The values returned by a get-method, first returned value first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionResult {
    values: Vec<StackValue>,
    account: Option<VerifiedAccount>,
}

impl ExecutionResult {
    /// Wraps values that were not checked against any proof.
    pub fn new(values: Vec<StackValue>) -> Self {
        Self {
            values,
            account: None,
        }
    }

    /// Wraps values together with the account the proofs showed.
    pub fn verified(values: Vec<StackValue>, account: VerifiedAccount) -> Self {
        Self {
            values,
            account: Some(account),
        }
    }

    /// All values.
    pub fn as_slice(&self) -> &[StackValue] {
        &self.values
    }

    /// Takes the values out.
    pub fn into_values(self) -> Vec<StackValue> {
        self.values
    }

    /// The verified account, unless proof checks were disabled.
    pub fn account_state(&self) -> Option<&VerifiedAccount> {
        self.account.as_ref()
    }
}

macro_rules! typed_getter {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $t:ty) => {
        $(#[$doc])*
        fn $name(&self, index: usize) -> Result<&$t, ResultError> {
            match self.value(index)? {
                StackValue::$variant(v) => Ok(v),
                other => Err(ResultError::IncorrectType {
                    index,
                    expected: StackValueKind::$variant,
                    found: other.kind(),
                }),
            }
        }
    };
}

/// Bounds- and type-checked access to a list of result values.
pub trait ResultAccess {
    /// The values to read from.
    fn values(&self) -> &[StackValue];

    /// Number of values.
    fn len(&self) -> usize {
        self.values().len()
    }

    /// Whether there are no values.
    fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    /// The value at `index`, whatever its type.
    fn value(&self, index: usize) -> Result<&StackValue, ResultError> {
        let values = self.values();
        values.get(index).ok_or(ResultError::IndexOutOfRange {
            index,
            len: values.len(),
        })
    }

    typed_getter!(
        /// The integer at `index`.
        int, Int, BigInt
    );
    typed_getter!(
        /// The cell at `index`.
        cell, Cell, Cell
    );
    typed_getter!(
        /// The slice at `index`.
        slice, Slice, Slice
    );
    typed_getter!(
        /// The builder at `index`.
        builder, Builder, Builder
    );
    typed_getter!(
        /// The tuple at `index`.
        tuple, Tuple, [StackValue]
    );

    /// Whether the value at `index` is null.
    fn is_nil(&self, index: usize) -> Result<bool, ResultError> {
        Ok(matches!(self.value(index)?, StackValue::Nil))
    }
}

impl ResultAccess for ExecutionResult {
    fn values(&self) -> &[StackValue] {
        &self.values
    }
}

impl ResultAccess for [StackValue] {
    fn values(&self) -> &[StackValue] {
        self
    }
}

impl ResultAccess for Vec<StackValue> {
    fn values(&self) -> &[StackValue] {
        self
    }
}

/// Panicking counterparts of the [`ResultAccess`] getters, for callers that
/// know the shape of a result in advance.
pub trait MustAccess: ResultAccess {
    /// Like [`ResultAccess::int`], but panics on error.
    fn must_int(&self, index: usize) -> &BigInt {
        self.int(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`ResultAccess::cell`], but panics on error.
    fn must_cell(&self, index: usize) -> &Cell {
        self.cell(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`ResultAccess::slice`], but panics on error.
    fn must_slice(&self, index: usize) -> &Slice {
        self.slice(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`ResultAccess::builder`], but panics on error.
    fn must_builder(&self, index: usize) -> &Builder {
        self.builder(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`ResultAccess::tuple`], but panics on error.
    fn must_tuple(&self, index: usize) -> &[StackValue] {
        self.tuple(index).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`ResultAccess::is_nil`], but panics on error.
    fn must_is_nil(&self, index: usize) -> bool {
        self.is_nil(index).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<T: ResultAccess + ?Sized> MustAccess for T {}
