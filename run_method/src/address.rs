//! Account addresses.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use thiserror::Error;
use tvm_cell::bits::BitString;

/// Workchain id of the masterchain.
pub const MASTERCHAIN_ID: i32 = -1;

/// Errors from parsing a raw `workchain:hex` address.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AddressParseError {
    /// The input has no `:` separator.
    #[error("Address {0:?} is not of the form `workchain:hex`!")]
    MissingSeparator(String),

    /// The workchain part is not a 32-bit integer.
    #[error("Invalid workchain id {0:?}!")]
    InvalidWorkchain(String),

    /// The account part is not 64 hex digits.
    #[error("Invalid account id {0:?}! (expected 64 hex digits)")]
    InvalidAccountId(String),
}

/// An account: the workchain it lives in plus its 256-bit id.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    workchain: i32,
    data: [u8; 32],
}

impl Address {
    /// Creates an address from its parts.
    pub const fn new(workchain: i32, data: [u8; 32]) -> Self {
        Self { workchain, data }
    }

    /// The workchain id.
    pub const fn workchain(&self) -> i32 {
        self.workchain
    }

    /// The 256-bit account id.
    pub const fn data(&self) -> &[u8; 32] {
        &self.data
    }

    /// Returns `true` for masterchain accounts.
    pub const fn is_masterchain(&self) -> bool {
        self.workchain == MASTERCHAIN_ID
    }

    /// The account id as a dictionary key.
    pub fn key(&self) -> BitString {
        BitString::from_bytes(&self.data)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (wc, id) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError::MissingSeparator(s.to_string()))?;

        let workchain = wc
            .parse()
            .map_err(|_| AddressParseError::InvalidWorkchain(wc.to_string()))?;

        let mut data = [0; 32];
        hex::decode_to_slice(id, &mut data)
            .map_err(|_| AddressParseError::InvalidAccountId(id.to_string()))?;

        Ok(Self { workchain, data })
    }
}

/// The raw form, `workchain:hex`.
impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.data))
    }
}
