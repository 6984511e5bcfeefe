//! The parts of the block and state schemas that proof checking walks
//! through.
//!
//! Only the fields a proof check needs are decoded. Everything else is kept
//! as an opaque [`Cell`] (which may well be a pruned branch inside a proof).

use thiserror::Error;
use tvm_cell::{
    bits::BitString,
    cell::{Cell, CellError, CellHash, CellType},
    dict::{lookup, DictError},
    slice::Slice,
};

use crate::address::Address;

const BLOCK_TAG: u32 = 0x11ef_55aa;
const SHARD_STATE_TAG: u32 = 0x9023_afe2;
const MC_STATE_EXTRA_TAG: u16 = 0xcc26;
const MERKLE_UPDATE_TAG: u8 = 4;

/// `shard_descr#b`, `shard_descr_new#a` and the older `#c` layout share the
/// fields this crate reads.
const SHARD_DESCR_TAGS: [u8; 3] = [0xa, 0xb, 0xc];

/// The output type of schema decoding.
pub type TlbResult<T> = Result<T, TlbError>;

/// Errors that may occur when decoding a schema object.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TlbError {
    /// A constructor tag does not match the expected type.
    #[error("Invalid {ty} tag! (found: {found:#x})")]
    InvalidTag {
        /// The type being decoded.
        ty: &'static str,
        /// The tag read.
        found: u64,
    },

    /// A cell ran out of data, or is a pruned branch where data is needed.
    #[error("Failed to read {ty}: {source}")]
    Cell {
        /// The type being decoded.
        ty: &'static str,
        /// The underlying cell error.
        #[source]
        source: CellError,
    },

    /// A dictionary lookup failed.
    #[error(transparent)]
    Dict(#[from] DictError),
}

/// Attaches the name of the type being read to a [`CellError`].
trait Context<T> {
    fn context(self, ty: &'static str) -> TlbResult<T>;
}

impl<T> Context<T> for Result<T, CellError> {
    fn context(self, ty: &'static str) -> TlbResult<T> {
        self.map_err(|source| TlbError::Cell { ty, source })
    }
}

/// Decoding of a schema type from the front of a slice.
pub trait FromSlice: Sized {
    /// Reads `Self`, consuming what it reads.
    fn load(s: &mut Slice) -> TlbResult<Self>;

    /// Reads `Self` from the start of an ordinary cell.
    fn from_cell(c: &Cell) -> TlbResult<Self> {
        Self::load(&mut c.parse().context(std::any::type_name::<Self>())?)
    }
}

fn expect_tag(ty: &'static str, found: u64, expected: u64) -> TlbResult<()> {
    match found == expected {
        true => Ok(()),
        false => Err(TlbError::InvalidTag { ty, found }),
    }
}

/// `block#11ef55aa`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    /// Network id.
    pub global_id: i32,
    /// `^BlockInfo`.
    pub info: Cell,
    /// `^ValueFlow`.
    pub value_flow: Cell,
    /// `^(MERKLE_UPDATE ShardState)`.
    pub state_update: Cell,
    /// `^BlockExtra`.
    pub extra: Cell,
}

impl Block {
    /// The hash of the shard state after this block, as committed to by its
    /// state update.
    pub fn new_state_hash(&self) -> TlbResult<CellHash> {
        const TY: &str = "state update";

        if self.state_update.cell_type() != CellType::MerkleUpdate {
            return Err(TlbError::Cell {
                ty: TY,
                source: CellError::ExoticAccess(self.state_update.cell_type()),
            });
        }

        let mut s = self.state_update.parse_exotic();
        let tag = s.load_u8().context(TY)?;
        expect_tag(TY, tag as u64, MERKLE_UPDATE_TAG as u64)?;
        s.skip_bits(256).context(TY)?;

        s.load_hash().context(TY)
    }
}

impl FromSlice for Block {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "block";

        expect_tag(TY, s.load_u32().context(TY)? as u64, BLOCK_TAG as u64)?;

        Ok(Self {
            global_id: s.load_i32().context(TY)?,
            info: s.load_ref().context(TY)?,
            value_flow: s.load_ref().context(TY)?,
            state_update: s.load_ref().context(TY)?,
            extra: s.load_ref().context(TY)?,
        })
    }
}

/// `shard_ident$00`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShardIdent {
    /// Number of meaningful prefix bits.
    pub prefix_bits: u8,
    /// Workchain id.
    pub workchain: i32,
    /// Shard prefix.
    pub prefix: u64,
}

impl FromSlice for ShardIdent {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "shard ident";

        expect_tag(TY, s.load_uint(2).context(TY)?, 0)?;

        Ok(Self {
            prefix_bits: s.load_uint(6).context(TY)? as u8,
            workchain: s.load_i32().context(TY)?,
            prefix: s.load_u64().context(TY)?,
        })
    }
}

/// `shard_state#9023afe2`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardStateUnsplit {
    /// Network id.
    pub global_id: i32,
    /// The shard this state belongs to.
    pub shard_id: ShardIdent,
    /// Sequence number of the block that produced this state.
    pub seq_no: u32,
    /// Vertical sequence number.
    pub vert_seq_no: u32,
    /// Generation time.
    pub gen_utime: u32,
    /// Logical time of generation.
    pub gen_lt: u64,
    /// Lowest masterchain block referenced.
    pub min_ref_mc_seqno: u32,
    /// `^OutMsgQueueInfo`.
    pub out_msg_queue_info: Cell,
    /// Set when the shard is about to split.
    pub before_split: bool,
    /// `^ShardAccounts`.
    pub accounts: Cell,
    /// The unnamed `^[ ... ]` part with balances and libraries.
    pub misc: Cell,
    /// `Maybe ^McStateExtra`, only present in masterchain states.
    pub custom: Option<Cell>,
}

impl FromSlice for ShardStateUnsplit {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "shard state";

        expect_tag(TY, s.load_u32().context(TY)? as u64, SHARD_STATE_TAG as u64)?;

        Ok(Self {
            global_id: s.load_i32().context(TY)?,
            shard_id: ShardIdent::load(s)?,
            seq_no: s.load_u32().context(TY)?,
            vert_seq_no: s.load_u32().context(TY)?,
            gen_utime: s.load_u32().context(TY)?,
            gen_lt: s.load_u64().context(TY)?,
            min_ref_mc_seqno: s.load_u32().context(TY)?,
            out_msg_queue_info: s.load_ref().context(TY)?,
            before_split: s.load_bit().context(TY)?,
            accounts: s.load_ref().context(TY)?,
            misc: s.load_ref().context(TY)?,
            custom: s.load_maybe_ref().context(TY)?,
        })
    }
}

impl ShardStateUnsplit {
    /// Looks an account up in the state's `ShardAccounts`.
    ///
    /// Returns `None` if the dictionary has no entry for `addr`. Fails if the
    /// path to the entry was pruned out of the proof.
    pub fn find_account(
        &self,
        addr: &Address,
    ) -> TlbResult<Option<(ShardAccount, DepthBalanceInfo)>> {
        const TY: &str = "shard accounts";

        let key = addr.key();

        // ahme_empty$0 extra / ahme_root$1 root:^HashmapAug extra
        let mut s = self.accounts.parse().context(TY)?;
        let Some(root) = s.load_maybe_ref().context(TY)? else {
            return Ok(None);
        };

        match lookup(&root, &key)? {
            Some(mut leaf) => {
                let balance = DepthBalanceInfo::load(&mut leaf)?;
                let account = ShardAccount::load(&mut leaf)?;
                Ok(Some((account, balance)))
            }
            None => Ok(None),
        }
    }
}

/// `masterchain_state_extra#cc26`. Only the shard hashes are decoded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct McStateExtra {
    /// `HashmapE 32 ^(BinTree ShardDescr)`, keyed by workchain id.
    pub shard_hashes: Option<Cell>,
}

impl FromSlice for McStateExtra {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "masterchain state extra";

        expect_tag(TY, s.load_u16().context(TY)? as u64, MC_STATE_EXTRA_TAG as u64)?;

        Ok(Self {
            shard_hashes: s.load_maybe_ref().context(TY)?,
        })
    }
}

impl McStateExtra {
    /// Every shard description of `workchain` that the (possibly pruned)
    /// shard hashes still contain. Subtrees pruned out of a proof are
    /// skipped.
    pub fn shards_of(&self, workchain: i32) -> TlbResult<Vec<ShardDescr>> {
        const TY: &str = "shard hashes";

        let Some(root) = &self.shard_hashes else {
            return Ok(Vec::new());
        };

        let key = BitString::from_bytes(&workchain.to_be_bytes());
        let Some(mut leaf) = lookup(root, &key)? else {
            return Ok(Vec::new());
        };

        let mut shards = Vec::new();
        collect_bin_tree(&leaf.load_ref().context(TY)?, &mut shards)?;
        Ok(shards)
    }
}

/// Walks `bt_leaf$0 leaf:X` / `bt_fork$1 left:^(BinTree X) right:^(BinTree X)`.
fn collect_bin_tree(c: &Cell, out: &mut Vec<ShardDescr>) -> TlbResult<()> {
    const TY: &str = "shard bin tree";

    if c.cell_type() == CellType::PrunedBranch {
        return Ok(());
    }

    let mut s = c.parse().context(TY)?;
    match s.load_bit().context(TY)? {
        false => out.push(ShardDescr::load(&mut s)?),
        true => {
            collect_bin_tree(&s.load_ref().context(TY)?, out)?;
            collect_bin_tree(&s.load_ref().context(TY)?, out)?;
        }
    }

    Ok(())
}

/// The leading fields of a `ShardDescr`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShardDescr {
    /// Sequence number of the shard's latest block.
    pub seq_no: u32,
    /// Masterchain block that registered it.
    pub reg_mc_seqno: u32,
    /// First logical time of the block.
    pub start_lt: u64,
    /// Last logical time of the block.
    pub end_lt: u64,
    /// Root hash of the shard block.
    pub root_hash: CellHash,
    /// File hash of the shard block.
    pub file_hash: CellHash,
}

impl FromSlice for ShardDescr {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "shard descr";

        let tag = s.load_uint(4).context(TY)?;
        if !SHARD_DESCR_TAGS.contains(&(tag as u8)) {
            return Err(TlbError::InvalidTag { ty: TY, found: tag });
        }

        Ok(Self {
            seq_no: s.load_u32().context(TY)?,
            reg_mc_seqno: s.load_u32().context(TY)?,
            start_lt: s.load_u64().context(TY)?,
            end_lt: s.load_u64().context(TY)?,
            root_hash: s.load_hash().context(TY)?,
            file_hash: s.load_hash().context(TY)?,
        })
    }
}

/// `account_descr$_`: an account together with its last transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardAccount {
    /// `^Account`. Usually a pruned branch, whose hash is what matters.
    pub account: Cell,
    /// Hash of the last transaction.
    pub last_trans_hash: CellHash,
    /// Logical time of the last transaction.
    pub last_trans_lt: u64,
}

impl FromSlice for ShardAccount {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "shard account";

        Ok(Self {
            account: s.load_ref().context(TY)?,
            last_trans_hash: s.load_hash().context(TY)?,
            last_trans_lt: s.load_u64().context(TY)?,
        })
    }
}

/// `currencies$_ grams:Grams other:ExtraCurrencyCollection`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CurrencyCollection {
    /// Amount of the native currency, in nanotons.
    pub grams: u128,
    /// `HashmapE 32 (VarUInteger 32)` of other currencies, undecoded.
    pub other: Option<Cell>,
}

impl FromSlice for CurrencyCollection {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "currency collection";

        Ok(Self {
            grams: s.load_coins().context(TY)?,
            other: s.load_maybe_ref().context(TY)?,
        })
    }
}

/// `depth_balance$_`: the extra of every node of the accounts dictionary.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepthBalanceInfo {
    /// Split depth of the subtree.
    pub split_depth: u8,
    /// Total balance of the subtree.
    pub balance: CurrencyCollection,
}

impl FromSlice for DepthBalanceInfo {
    fn load(s: &mut Slice) -> TlbResult<Self> {
        const TY: &str = "depth balance info";

        Ok(Self {
            split_depth: s.load_uint(5).context(TY)? as u8,
            balance: CurrencyCollection::load(s)?,
        })
    }
}
