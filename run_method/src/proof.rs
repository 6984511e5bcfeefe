//! Checking lite server proofs against a trusted block.
//!
//! An account proof is a chain: the trusted block hash opens a block proof,
//! the block's state update names the hash of the state after the block, and
//! that hash opens a state proof in which the account can be looked up. For
//! accounts outside the masterchain the chain starts one step earlier: the
//! masterchain block must list the shard block that holds the account.

use thiserror::Error;
use tracing::{debug, trace};
use tvm_cell::{
    boc::BocError,
    cell::{Cell, CellHash},
    merkle_proof::{proof_root, unwrap_proof, MerkleProofError},
};

use crate::{
    address::Address,
    block::BlockIdExt,
    tlb::{
        Block, DepthBalanceInfo, FromSlice, McStateExtra, ShardAccount, ShardStateUnsplit,
        TlbError,
    },
};

/// Number of roots in a block-plus-state proof.
const PROOF_ROOTS: usize = 2;

/// The output type of proof checks.
pub type ProofResult<T> = Result<T, ProofError>;

/// Errors that may occur when checking a proof.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ProofError {
    /// A block-plus-state proof does not have exactly two roots.
    #[error("Proof should have {} roots, got {0}!", PROOF_ROOTS)]
    RootCount(usize),

    /// The block proof does not open with the trusted block hash.
    #[error("Block proof does not match the block hash: {0}")]
    BlockHashMismatch(#[source] MerkleProofError),

    /// The state proof does not open with the state hash the block names.
    #[error("State proof does not match the block's state hash: {0}")]
    StateHashMismatch(#[source] MerkleProofError),

    /// The account lives outside the masterchain but no shard proof came
    /// with it.
    #[error("Lite server has no proof for this account in the given block, request a newer block or disable proof checks!")]
    NoShardProof,

    /// The account lives outside the masterchain but the shard block it is
    /// in was not named.
    #[error("Shard block not passed!")]
    ShardBlockNotPassed,

    /// The shard proof itself failed.
    #[error("Shard proof is incorrect: {0}")]
    InvalidShardProof(Box<ProofError>),

    /// A masterchain state proof has no `McStateExtra`.
    #[error("Masterchain state has no extra data!")]
    NoMcStateExtra,

    /// The masterchain state does not list the shard block.
    #[error("Shard block {hash} of workchain {workchain} is not in the masterchain state!")]
    ShardNotInMaster {
        /// The account's workchain.
        workchain: i32,
        /// The shard block root hash, hex encoded.
        hash: String,
    },

    /// The state has no entry for the account.
    #[error("Account {0} not found in state!")]
    AccountNotFound(Address),

    /// The account proof does not open with the account cell hash.
    #[error("State proof does not match the account state hash: {0}")]
    AccountStateMismatch(#[source] MerkleProofError),

    /// A proof is not a valid bag of cells.
    #[error("Proof is not a valid bag of cells: {0}")]
    InvalidBoc(#[from] BocError),

    /// A proof opens but its contents do not follow the schema.
    #[error("Malformed proof: {0}")]
    Malformed(#[from] TlbError),
}

/// Opens a block proof against `block_hash`.
pub fn check_block_proof(proof: &Cell, block_hash: &CellHash) -> ProofResult<Block> {
    let root = unwrap_proof(proof, block_hash).map_err(ProofError::BlockHashMismatch)?;
    Ok(Block::from_cell(&root)?)
}

/// Opens a two-root `[block proof, state proof]` pair against `block_hash`
/// and returns the state after that block.
pub fn check_block_state_proof(
    proof: &[Cell],
    block_hash: &CellHash,
) -> ProofResult<ShardStateUnsplit> {
    let [block_proof, state_proof] = proof else {
        return Err(ProofError::RootCount(proof.len()));
    };

    let block = check_block_proof(block_proof, block_hash)?;
    let state_hash = block.new_state_hash()?;
    trace!(
        "Block {} commits to state {}",
        hex::encode(block_hash),
        hex::encode(state_hash)
    );

    let state = unwrap_proof(state_proof, &state_hash).map_err(ProofError::StateHashMismatch)?;
    Ok(ShardStateUnsplit::from_cell(&state)?)
}

/// Checks that `shard_root_hash` is a shard block of `workchain` listed in
/// the state of the masterchain block `master`.
pub fn check_shard_in_master_proof(
    master: &BlockIdExt,
    shard_proof: &[Cell],
    workchain: i32,
    shard_root_hash: &CellHash,
) -> ProofResult<()> {
    let state = check_block_state_proof(shard_proof, &master.root_hash)?;
    let extra = state.custom.as_ref().ok_or(ProofError::NoMcStateExtra)?;
    let extra = McStateExtra::from_cell(extra)?;

    let found = extra
        .shards_of(workchain)?
        .iter()
        .any(|shard| &shard.root_hash == shard_root_hash);

    match found {
        true => {
            debug!(
                "Shard block {} found in masterchain block {}",
                hex::encode(shard_root_hash),
                master
            );
            Ok(())
        }
        false => Err(ProofError::ShardNotInMaster {
            workchain,
            hash: hex::encode(shard_root_hash),
        }),
    }
}

/// Checks the account proof of `addr` and returns the account with its
/// balance summary.
///
/// `block` is the trusted masterchain block. For accounts outside the
/// masterchain `shard_proof` and `shard_hash` must link `block` to the shard
/// block the account proof is rooted in. With `skip_block_check` the account
/// proof is opened without comparing any hash and the shard arguments are
/// ignored.
pub fn check_account_state_proof(
    addr: &Address,
    block: &BlockIdExt,
    state_proof: &[Cell],
    shard_proof: &[Cell],
    shard_hash: Option<&CellHash>,
    skip_block_check: bool,
) -> ProofResult<(ShardAccount, DepthBalanceInfo)> {
    if state_proof.len() != PROOF_ROOTS {
        return Err(ProofError::RootCount(state_proof.len()));
    }

    let state = match skip_block_check {
        true => {
            let state = proof_root(&state_proof[1]).map_err(ProofError::StateHashMismatch)?;
            ShardStateUnsplit::from_cell(&state)?
        }
        false => {
            let mut block_hash = &block.root_hash;
            if !addr.is_masterchain() {
                if shard_proof.is_empty() {
                    return Err(ProofError::NoShardProof);
                }
                let shard_hash = shard_hash.ok_or(ProofError::ShardBlockNotPassed)?;

                check_shard_in_master_proof(block, shard_proof, addr.workchain(), shard_hash)
                    .map_err(|e| ProofError::InvalidShardProof(Box::new(e)))?;
                block_hash = shard_hash;
            }

            check_block_state_proof(state_proof, block_hash)?
        }
    };

    let (account, balance) = state
        .find_account(addr)?
        .ok_or(ProofError::AccountNotFound(*addr))?;

    debug!(
        "Account {} verified (last transaction lt: {})",
        addr, account.last_trans_lt
    );
    Ok((account, balance))
}

/// Opens the proof of an account cell against the hash the account proof
/// committed to, returning the account cell.
pub fn check_state_proof(state_proof: &Cell, account_hash: &CellHash) -> ProofResult<Cell> {
    unwrap_proof(state_proof, account_hash).map_err(ProofError::AccountStateMismatch)
}
