//! References to blocks and accounts as the lite server protocol names them.

use std::fmt::{self, Display};

use tvm_cell::cell::CellHash;

use crate::address::Address;

/// A block, fully identified by its position and its hashes.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct BlockIdExt {
    /// Workchain of the block.
    pub workchain: i32,
    /// Shard prefix of the block.
    pub shard: i64,
    /// Sequence number within the shard.
    pub seqno: u32,
    /// Hash of the block's root cell.
    pub root_hash: CellHash,
    /// Hash of the serialized block file.
    pub file_hash: CellHash,
}

/// Short form `(workchain,shard,seqno):root_hash`.
impl Display for BlockIdExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{:016x},{}):{}",
            self.workchain,
            self.shard,
            self.seqno,
            hex::encode(self.root_hash)
        )
    }
}

/// An account id as sent to the lite server.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AccountId {
    /// Workchain of the account.
    pub workchain: i32,
    /// The 256-bit account id.
    pub id: [u8; 32],
}

impl From<&Address> for AccountId {
    fn from(addr: &Address) -> Self {
        Self {
            workchain: addr.workchain(),
            id: *addr.data(),
        }
    }
}
